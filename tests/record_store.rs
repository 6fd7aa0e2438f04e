mod common;

use std::fs;

use birthdb::error::{open_result_of, DbError, OpenResult, OpenStatus};
use birthdb::storage::{BabySex, Field, OpenMode, Record, RecordStore};
use common::{birth, Scratch};

fn store_with(scratch: &Scratch, records: &[Record]) -> RecordStore {
    let mut store = RecordStore::new();
    store.open(scratch.path("births.bin"), OpenMode::Create).unwrap();
    store.insert_at_end(records).unwrap();
    store
}

#[test]
fn records_survive_reopen() {
    let scratch = Scratch::new();
    let empty_cities = Record::default().with_id(1).with_baby_sex(BabySex::Male);
    let full_cities = birth(2, &"m".repeat(40), &"b".repeat(57), "MG");
    let plain = birth(3, "Santos", "Guaruja", "SP");

    let mut store = store_with(&scratch, &[empty_cities.clone(), full_cities.clone(), plain.clone()]);
    store.close().unwrap();

    let mut store = RecordStore::new();
    assert_eq!(store.open(scratch.path("births.bin"), OpenMode::Read).unwrap(), OpenStatus::Ready);
    assert_eq!(store.fetch_at(0).unwrap(), Some(empty_cities));
    assert_eq!(store.fetch_at(1).unwrap(), Some(full_cities));
    assert_eq!(store.fetch_at(2).unwrap(), Some(plain));
    assert_eq!(store.fetch_at(3).unwrap(), None);
    assert_eq!(store.header().next_rrn(), 3);
}

#[test]
fn file_is_header_plus_slots() {
    let scratch = Scratch::new();
    let mut store = store_with(&scratch, &[birth(1, "a", "b", "SP"), birth(2, "c", "d", "RJ")]);
    store.close().unwrap();

    let bytes = fs::read(scratch.path("births.bin")).unwrap();
    assert_eq!(bytes.len(), 3 * 128);
    assert_eq!(bytes[0], b'1');
    assert_eq!(&bytes[1..5], &2i32.to_le_bytes());
    assert_eq!(&bytes[5..9], &2i32.to_le_bytes());
    assert_eq!(bytes[127], b'$');
}

#[test]
fn invalid_batch_writes_nothing() {
    let scratch = Scratch::new();
    let mut store = store_with(&scratch, &[]);
    let too_long = Record::default().with_mother_city(&"x".repeat(98));
    let res = store.insert_at_end(&[birth(1, "a", "b", "SP"), too_long]);
    assert!(matches!(res, Err(DbError::InvalidValue(_))));
    assert_eq!(store.header().next_rrn(), 0);
    assert_eq!(store.header().live(), 0);
    store.close().unwrap();
    assert_eq!(fs::metadata(scratch.path("births.bin")).unwrap().len(), 128);
}

#[test]
fn removing_twice_changes_nothing() {
    let scratch = Scratch::new();
    let mut store = store_with(&scratch, &[birth(1, "a", "b", "SP"), birth(2, "c", "d", "RJ")]);

    assert!(store.remove_at(1).unwrap());
    let live = store.header().live();
    let deleted = store.header().deleted();
    let before = fs::read(scratch.path("births.bin")).unwrap();

    assert!(!store.remove_at(1).unwrap());
    assert!(!store.remove_at(9).unwrap());
    assert_eq!(store.header().live(), live);
    assert_eq!(store.header().deleted(), deleted);
    assert_eq!(fs::read(scratch.path("births.bin")).unwrap(), before);
    assert_eq!(store.fetch_at(1).unwrap(), None);
}

#[test]
fn matches_any_filter_on_shared_fields() {
    let scratch = Scratch::new();
    let mut store = store_with(
        &scratch,
        &[
            birth(1, "Recife", "Olinda", "PE"),
            birth(2, "Santos", "Santos", "SP"),
            birth(3, "Recife", "Recife", "PE"),
            birth(4, "Campinas", "Campinas", "SP"),
        ],
    );

    let recife = Record::partial().with_mother_city("Recife");
    let hits = store.fetch_matches(&[recife.clone()]).unwrap();
    assert_eq!(hits.iter().map(|(rrn, _)| *rrn).collect::<Vec<_>>(), vec![0, 2]);

    let or_four = Record::partial().with_id(4);
    let mut seen = Vec::new();
    let n = store
        .for_each_match(&[recife, or_four], |rrn, record| seen.push((rrn, record.id())))
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(seen, vec![(0, Some(1)), (2, Some(3)), (3, Some(4))]);

    let both = Record::partial().with_mother_state("SP").with_baby_city("Santos");
    assert_eq!(store.fetch_matches(&[both]).unwrap().len(), 1);

    assert!(matches!(store.fetch_matches(&[Record::partial()]), Err(DbError::DisjointMasks)));
}

#[test]
fn filter_on_absent_field_matches_absent_values() {
    let scratch = Scratch::new();
    let mut store = store_with(
        &scratch,
        &[Record::default().with_id(1), birth(2, "Belem", "Belem", "PA")],
    );
    let mut no_city = Record::partial();
    no_city.set_field(Field::MotherCity, "").unwrap();
    let hits = store.fetch_matches(&[no_city]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1.id(), Some(1));
}

#[test]
fn remove_matches_tombstones_and_persists() {
    let scratch = Scratch::new();
    let mut store = store_with(
        &scratch,
        &[
            birth(1, "a", "b", "SP"),
            birth(2, "c", "d", "RJ"),
            birth(3, "e", "f", "SP"),
            birth(4, "g", "h", "BA"),
        ],
    );
    let sp = Record::partial().with_baby_state("SP");
    assert_eq!(store.remove_matches(&[sp.clone()]).unwrap(), 2);
    assert_eq!(store.remove_matches(&[sp]).unwrap(), 0);
    assert_eq!(store.header().live(), 2);
    assert_eq!(store.header().deleted(), 2);
    store.close().unwrap();

    let bytes = fs::read(scratch.path("births.bin")).unwrap();
    assert_eq!(&bytes[128..132], &(-1i32).to_le_bytes());
    assert_eq!(&bytes[384..388], &(-1i32).to_le_bytes());

    let mut store = RecordStore::new();
    store.open(scratch.path("births.bin"), OpenMode::Read).unwrap();
    let mut ids = Vec::new();
    assert_eq!(store.for_each(|_, r| ids.push(r.id())).unwrap(), 2);
    assert_eq!(ids, vec![Some(2), Some(4)]);
}

#[test]
fn update_in_place() {
    let scratch = Scratch::new();
    let mut store = store_with(&scratch, &[birth(1, "Sorocaba", "Itu", "SP"), birth(2, "a", "b", "RJ")]);

    let payload = Record::partial()
        .with_mother_city("Sao Jose dos Campos")
        .with_mother_age(41);
    assert!(store.update_at(0, &payload).unwrap());
    assert_eq!(store.header().updated(), 1);

    let got = store.fetch_at(0).unwrap().unwrap();
    assert_eq!(got.mother_city(), Some("Sao Jose dos Campos"));
    assert_eq!(got.baby_city(), Some("Itu"));
    assert_eq!(got.mother_age(), Some(41));
    assert_eq!(got.id(), Some(1));
    assert_eq!(store.fetch_at(1).unwrap(), Some(birth(2, "a", "b", "RJ")));

    assert!(store.remove_at(1).unwrap());
    assert!(!store.update_at(1, &payload).unwrap());
    assert!(!store.update_at(5, &payload).unwrap());
    assert_eq!(store.header().updated(), 1);

    let oversized = Record::partial().with_baby_city(&"z".repeat(90));
    assert!(matches!(store.update_at(0, &oversized), Err(DbError::InvalidValue(_))));
    assert!(matches!(store.update_at(0, &Record::partial()), Err(DbError::InvalidArgument(_))));
}

#[test]
fn status_flag_tracks_open_for_write() {
    let scratch = Scratch::new();
    let path = scratch.path("births.bin");
    let mut store = store_with(&scratch, &[birth(1, "a", "b", "SP")]);
    assert_eq!(fs::read(&path).unwrap()[0], b'0');
    store.close().unwrap();
    assert_eq!(fs::read(&path).unwrap()[0], b'1');

    let mut store = RecordStore::new();
    store.open(&path, OpenMode::Modify).unwrap();
    assert_eq!(fs::read(&path).unwrap()[0], b'0');
    drop(store);
    assert_eq!(fs::read(&path).unwrap()[0], b'1');
}

#[test]
fn dirty_or_short_files_are_inconsistent() {
    let scratch = Scratch::new();
    let path = scratch.path("births.bin");
    let mut store = store_with(&scratch, &[birth(1, "a", "b", "SP")]);
    store.close().unwrap();

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b'0';
    fs::write(&path, &bytes).unwrap();
    let res = RecordStore::new().open(&path, OpenMode::Read);
    assert!(matches!(res, Err(DbError::Inconsistent(_))));
    assert_eq!(open_result_of(&res), OpenResult::Inconsistent);

    fs::write(&path, b"1\x00").unwrap();
    let res = RecordStore::new().open(&path, OpenMode::Modify);
    assert_eq!(open_result_of(&res), OpenResult::Inconsistent);

    let res = RecordStore::new().open(scratch.path("missing.bin"), OpenMode::Read);
    assert_eq!(open_result_of(&res), OpenResult::Failed);
}

#[test]
fn empty_store_reports_empty() {
    let scratch = Scratch::new();
    let path = scratch.path("births.bin");
    let mut store = store_with(&scratch, &[birth(1, "a", "b", "SP")]);
    assert!(store.remove_at(0).unwrap());
    store.close().unwrap();

    let mut store = RecordStore::new();
    assert_eq!(store.open(&path, OpenMode::Read).unwrap(), OpenStatus::Empty);
    assert!(store.is_empty());
    assert_eq!(store.for_each(|_, _| {}).unwrap(), 0);
}
