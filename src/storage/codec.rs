use std::io::{Cursor, Read, Seek, Write};

use crate::error::{DbError, DbResult};
use crate::storage::binary::{
    fixed_field, garbage, read_bytes, read_fixed_field, read_i32, read_u8, write_i32, FieldWriter,
};
use crate::storage::layout::*;
use crate::storage::record::{BabySex, Field, Record};

/// What an in-place update touched on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchReport {
    pub fields_written: usize,
    pub seeks: usize,
}

fn int_to_disk(v: Option<i32>) -> i32 {
    v.unwrap_or(ABSENT)
}

fn str_len(s: Option<&str>) -> usize {
    s.map_or(0, str::len)
}

/// Serialize one full record slot.
pub fn encode_record(record: &Record) -> DbResult<Vec<u8>> {
    record.validate()?;
    let mother = record.mother_city().unwrap_or("").as_bytes();
    let baby = record.baby_city().unwrap_or("").as_bytes();

    let mut buf = Vec::with_capacity(RECORD_SLOT_SIZE);
    write_i32(&mut buf, mother.len() as i32)?;
    write_i32(&mut buf, baby.len() as i32)?;
    buf.extend_from_slice(mother);
    buf.extend_from_slice(baby);
    buf.extend(garbage(VARIABLE_REGION_SIZE - buf.len()));

    write_i32(&mut buf, int_to_disk(record.id()))?;
    write_i32(&mut buf, int_to_disk(record.mother_age()))?;
    buf.extend(fixed_field(record.birth_date(), BIRTH_DATE_LEN));
    buf.push(record.baby_sex().to_byte());
    buf.extend(fixed_field(record.mother_state(), STATE_LEN));
    buf.extend(fixed_field(record.baby_state(), STATE_LEN));

    debug_assert_eq!(buf.len(), RECORD_SLOT_SIZE);
    Ok(buf)
}

pub fn write_record<W: Write>(w: &mut W, record: &Record) -> DbResult<()> {
    let buf = encode_record(record)?;
    w.write_all(&buf)?;
    Ok(())
}

/// Decode one slot image. `None` for a tombstone.
pub fn decode_record(slot: &[u8]) -> DbResult<Option<Record>> {
    if slot.len() != RECORD_SLOT_SIZE {
        return Err(DbError::Corrupt(format!("record slot of {} bytes", slot.len())));
    }
    let mut c = Cursor::new(slot);
    let mother_len = read_i32(&mut c)?;
    if mother_len == TOMBSTONE {
        return Ok(None);
    }
    let baby_len = read_i32(&mut c)?;
    if mother_len < 0 || baby_len < 0 || mother_len as i64 + baby_len as i64 > MAX_CITIES_LEN as i64 {
        return Err(DbError::Corrupt(format!(
            "city lengths {} and {} do not fit the slot",
            mother_len, baby_len
        )));
    }

    let mother = read_bytes(&mut c, mother_len as usize)?;
    let baby = read_bytes(&mut c, baby_len as usize)?;
    c.set_position(ID_OFFSET);

    let mut record = Record::default();
    record.set_mother_city(Some(&String::from_utf8_lossy(&mother)));
    record.set_baby_city(Some(&String::from_utf8_lossy(&baby)));
    record.set_id(Some(read_i32(&mut c)?));
    record.set_mother_age(Some(read_i32(&mut c)?));
    record.set_birth_date(read_fixed_field(&mut c, BIRTH_DATE_LEN)?.as_deref());
    record.set_baby_sex(BabySex::from_byte(read_u8(&mut c)?));
    record.set_mother_state(read_fixed_field(&mut c, STATE_LEN)?.as_deref());
    record.set_baby_state(read_fixed_field(&mut c, STATE_LEN)?.as_deref());
    Ok(Some(record))
}

/// Read the slot at the reader's cursor, leaving the cursor at the slot end.
pub fn read_record<R: Read>(r: &mut R) -> DbResult<Option<Record>> {
    let mut slot = [0u8; RECORD_SLOT_SIZE];
    r.read_exact(&mut slot)?;
    decode_record(&slot)
}

/// Apply `payload` to the record at the cursor, writing only what changed.
///
/// The cursor must sit at the slot start; it is left at the slot end. Returns
/// `None` (and writes nothing) for a tombstone.
pub fn update_record<F: Read + Write + Seek>(
    f: &mut F,
    payload: &Record,
) -> DbResult<Option<PatchReport>> {
    let base = f.stream_position()?;
    let old = match read_record(f)? {
        Some(r) => r,
        None => return Ok(None),
    };
    let mut new = old.clone();
    new.apply(payload);
    new.validate()?;

    let mask = payload.mask();
    let changed = |field: Field| mask.contains(field) && !old.field_eq(&new, field);

    let old_a = str_len(old.mother_city());
    let new_a = str_len(new.mother_city());
    let old_b = str_len(old.baby_city());
    let new_b = str_len(new.baby_city());

    let rewrite_mother = changed(Field::MotherCity);
    // A shifted mother city moves the baby city's start.
    let rewrite_baby = changed(Field::BabyCity) || (rewrite_mother && new_a != old_a);

    let mut w = FieldWriter::new(f, base, Some(RECORD_SLOT_SIZE as u64));

    if new_a != old_a {
        w.write_at(MOTHER_CITY_LEN_OFFSET, &(new_a as i32).to_le_bytes())?;
    }
    if new_b != old_b {
        w.write_at(BABY_CITY_LEN_OFFSET, &(new_b as i32).to_le_bytes())?;
    }
    if rewrite_mother && new_a > 0 {
        w.write_at(CITIES_OFFSET, new.mother_city().unwrap_or("").as_bytes())?;
    }
    if rewrite_baby && new_b > 0 {
        w.write_at(CITIES_OFFSET + new_a as u64, new.baby_city().unwrap_or("").as_bytes())?;
    }

    if changed(Field::Id) {
        w.write_at(ID_OFFSET, &int_to_disk(new.id()).to_le_bytes())?;
    }
    if changed(Field::MotherAge) {
        w.write_at(MOTHER_AGE_OFFSET, &int_to_disk(new.mother_age()).to_le_bytes())?;
    }
    if changed(Field::BirthDate) {
        w.write_at(BIRTH_DATE_OFFSET, &fixed_field(new.birth_date(), BIRTH_DATE_LEN))?;
    }
    if changed(Field::BabySex) {
        w.write_at(BABY_SEX_OFFSET, &[new.baby_sex().to_byte()])?;
    }
    if changed(Field::MotherState) {
        w.write_at(MOTHER_STATE_OFFSET, &fixed_field(new.mother_state(), STATE_LEN))?;
    }
    if changed(Field::BabyState) {
        w.write_at(BABY_STATE_OFFSET, &fixed_field(new.baby_state(), STATE_LEN))?;
    }
    w.finish_at(RECORD_SLOT_SIZE as u64)?;

    Ok(Some(PatchReport { fields_written: w.fields_written(), seeks: w.seeks() }))
}
