#![allow(dead_code)]

use std::path::PathBuf;

use birthdb::storage::{BabySex, Record};
use tempfile::TempDir;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Temporary directory that lives as long as the test needs its files.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new() -> Self {
        init_logger();
        Scratch { dir: tempfile::tempdir().unwrap() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn birth(id: i32, mother_city: &str, baby_city: &str, state: &str) -> Record {
    Record::default()
        .with_id(id)
        .with_mother_city(mother_city)
        .with_baby_city(baby_city)
        .with_mother_age(20 + id % 20)
        .with_birth_date("2016-01-01")
        .with_baby_sex(if id % 2 == 0 { BabySex::Female } else { BabySex::Male })
        .with_mother_state(state)
        .with_baby_state(state)
}
