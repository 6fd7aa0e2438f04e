use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use chrono::NaiveDate;

use crate::error::{DbError, DbResult};
use crate::storage::layout::{BIRTH_DATE_LEN, MAX_CITIES_LEN, STATE_LEN};

pub const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

/// One of the eight fields of a birth record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    MotherCity,
    BabyCity,
    Id,
    MotherAge,
    BirthDate,
    BabySex,
    MotherState,
    BabyState,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::MotherCity,
        Field::BabyCity,
        Field::Id,
        Field::MotherAge,
        Field::BirthDate,
        Field::BabySex,
        Field::MotherState,
        Field::BabyState,
    ];

    pub fn bit(self) -> u8 {
        match self {
            Field::MotherCity => 1,
            Field::BabyCity => 2,
            Field::Id => 4,
            Field::MotherAge => 8,
            Field::BirthDate => 16,
            Field::BabySex => 32,
            Field::MotherState => 64,
            Field::BabyState => 128,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::MotherCity => "mother_city",
            Field::BabyCity => "baby_city",
            Field::Id => "id",
            Field::MotherAge => "mother_age",
            Field::BirthDate => "birth_date",
            Field::BabySex => "baby_sex",
            Field::MotherState => "mother_state",
            Field::BabyState => "baby_state",
        }
    }
}

impl FromStr for Field {
    type Err = DbError;

    /// Accepts the snake_case names as well as the column names used by the
    /// CSV exports (`idNascimento`, `cidadeMae`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s {
            "mother_city" | "cidadeMae" => Field::MotherCity,
            "baby_city" | "cidadeBebe" => Field::BabyCity,
            "id" | "idNascimento" => Field::Id,
            "mother_age" | "idadeMae" => Field::MotherAge,
            "birth_date" | "dataNascimento" => Field::BirthDate,
            "baby_sex" | "sexoBebe" => Field::BabySex,
            "mother_state" | "estadoMae" => Field::MotherState,
            "baby_state" | "estadoBebe" => Field::BabyState,
            other => return Err(DbError::InvalidArgument(format!("unknown field '{}'", other))),
        };
        Ok(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bitset over [`Field`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldMask(u8);

impl FieldMask {
    pub const NONE: FieldMask = FieldMask(0);
    pub const ALL: FieldMask = FieldMask(0xff);

    pub fn from_bits(bits: u8) -> Self {
        FieldMask(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn insert(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn fields(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<Field> for FieldMask {
    fn from(field: Field) -> Self {
        FieldMask(field.bit())
    }
}

impl BitAnd for FieldMask {
    type Output = FieldMask;
    fn bitand(self, rhs: FieldMask) -> FieldMask {
        FieldMask(self.0 & rhs.0)
    }
}

impl BitOr for FieldMask {
    type Output = FieldMask;
    fn bitor(self, rhs: FieldMask) -> FieldMask {
        FieldMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldMask {
    fn bitor_assign(&mut self, rhs: FieldMask) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BabySex {
    #[default]
    Unknown,
    Male,
    Female,
}

impl BabySex {
    pub fn to_byte(self) -> u8 {
        match self {
            BabySex::Unknown => b'0',
            BabySex::Male => b'1',
            BabySex::Female => b'2',
        }
    }

    /// Anything unrecognised decodes as `Unknown`.
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'1' => BabySex::Male,
            b'2' => BabySex::Female,
            _ => BabySex::Unknown,
        }
    }
}

/// A birth record, or a sparse filter / update payload when its mask does not
/// cover every field.
///
/// Strings are normalised on the way in: an empty string is stored as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    mask: FieldMask,
    mother_city: Option<String>,
    baby_city: Option<String>,
    id: Option<i32>,
    mother_age: Option<i32>,
    birth_date: Option<String>,
    baby_sex: BabySex,
    mother_state: Option<String>,
    baby_state: Option<String>,
}

impl Default for Record {
    fn default() -> Self {
        Record::with_mask(FieldMask::ALL)
    }
}

fn normalise(s: Option<&str>) -> Option<String> {
    s.filter(|v| !v.is_empty()).map(str::to_string)
}

fn normalise_int(v: Option<i32>) -> Option<i32> {
    v.filter(|n| *n >= 0)
}

impl Record {
    /// A record with every field absent and the given mask.
    pub fn with_mask(mask: FieldMask) -> Self {
        Record {
            mask,
            mother_city: None,
            baby_city: None,
            id: None,
            mother_age: None,
            birth_date: None,
            baby_sex: BabySex::Unknown,
            mother_state: None,
            baby_state: None,
        }
    }

    /// An empty filter or update payload; each setter adds its field to the mask.
    pub fn partial() -> Self {
        Record::with_mask(FieldMask::NONE)
    }

    pub fn mask(&self) -> FieldMask {
        self.mask
    }

    pub fn mother_city(&self) -> Option<&str> {
        self.mother_city.as_deref()
    }

    pub fn baby_city(&self) -> Option<&str> {
        self.baby_city.as_deref()
    }

    pub fn id(&self) -> Option<i32> {
        self.id
    }

    pub fn mother_age(&self) -> Option<i32> {
        self.mother_age
    }

    pub fn birth_date(&self) -> Option<&str> {
        self.birth_date.as_deref()
    }

    pub fn baby_sex(&self) -> BabySex {
        self.baby_sex
    }

    pub fn mother_state(&self) -> Option<&str> {
        self.mother_state.as_deref()
    }

    pub fn baby_state(&self) -> Option<&str> {
        self.baby_state.as_deref()
    }

    /// `birth_date` as a calendar date, when present and well formed.
    pub fn birth_date_parsed(&self) -> Option<NaiveDate> {
        let raw = self.birth_date.as_deref()?;
        NaiveDate::parse_from_str(raw, BIRTH_DATE_FORMAT).ok()
    }

    pub fn set_mother_city(&mut self, v: Option<&str>) {
        self.mother_city = normalise(v);
        self.mask.insert(Field::MotherCity);
    }

    pub fn set_baby_city(&mut self, v: Option<&str>) {
        self.baby_city = normalise(v);
        self.mask.insert(Field::BabyCity);
    }

    /// Negative ids are the on-disk "absent" marker and are stored as `None`.
    pub fn set_id(&mut self, v: Option<i32>) {
        self.id = normalise_int(v);
        self.mask.insert(Field::Id);
    }

    pub fn set_mother_age(&mut self, v: Option<i32>) {
        self.mother_age = normalise_int(v);
        self.mask.insert(Field::MotherAge);
    }

    pub fn set_birth_date(&mut self, v: Option<&str>) {
        self.birth_date = normalise(v);
        self.mask.insert(Field::BirthDate);
    }

    pub fn set_birth_date_ymd(&mut self, date: NaiveDate) {
        let formatted = date.format(BIRTH_DATE_FORMAT).to_string();
        self.set_birth_date(Some(&formatted));
    }

    pub fn set_baby_sex(&mut self, v: BabySex) {
        self.baby_sex = v;
        self.mask.insert(Field::BabySex);
    }

    pub fn set_mother_state(&mut self, v: Option<&str>) {
        self.mother_state = normalise(v);
        self.mask.insert(Field::MotherState);
    }

    pub fn set_baby_state(&mut self, v: Option<&str>) {
        self.baby_state = normalise(v);
        self.mask.insert(Field::BabyState);
    }

    pub fn with_mother_city(mut self, v: &str) -> Self {
        self.set_mother_city(Some(v));
        self
    }

    pub fn with_baby_city(mut self, v: &str) -> Self {
        self.set_baby_city(Some(v));
        self
    }

    pub fn with_id(mut self, v: i32) -> Self {
        self.set_id(Some(v));
        self
    }

    pub fn with_mother_age(mut self, v: i32) -> Self {
        self.set_mother_age(Some(v));
        self
    }

    pub fn with_birth_date(mut self, v: &str) -> Self {
        self.set_birth_date(Some(v));
        self
    }

    pub fn with_baby_sex(mut self, v: BabySex) -> Self {
        self.set_baby_sex(v);
        self
    }

    pub fn with_mother_state(mut self, v: &str) -> Self {
        self.set_mother_state(Some(v));
        self
    }

    pub fn with_baby_state(mut self, v: &str) -> Self {
        self.set_baby_state(Some(v));
        self
    }

    /// Set a field from its textual form. An empty string clears the field.
    pub fn set_field(&mut self, field: Field, raw: &str) -> DbResult<()> {
        let raw = raw.trim();
        let int = |raw: &str| -> DbResult<Option<i32>> {
            if raw.is_empty() {
                return Ok(None);
            }
            raw.parse::<i32>()
                .map(Some)
                .map_err(|_| DbError::InvalidValue(format!("'{}' is not a valid {}", raw, field)))
        };
        match field {
            Field::MotherCity => self.set_mother_city(Some(raw)),
            Field::BabyCity => self.set_baby_city(Some(raw)),
            Field::Id => self.set_id(int(raw)?),
            Field::MotherAge => self.set_mother_age(int(raw)?),
            Field::BirthDate => self.set_birth_date(Some(raw)),
            Field::BabySex => {
                let sex = raw.bytes().next().map(BabySex::from_byte).unwrap_or_default();
                self.set_baby_sex(sex)
            }
            Field::MotherState => self.set_mother_state(Some(raw)),
            Field::BabyState => self.set_baby_state(Some(raw)),
        }
        Ok(())
    }

    /// Value equality on a single field.
    pub fn field_eq(&self, other: &Record, field: Field) -> bool {
        match field {
            Field::MotherCity => self.mother_city == other.mother_city,
            Field::BabyCity => self.baby_city == other.baby_city,
            Field::Id => self.id == other.id,
            Field::MotherAge => self.mother_age == other.mother_age,
            Field::BirthDate => self.birth_date == other.birth_date,
            Field::BabySex => self.baby_sex == other.baby_sex,
            Field::MotherState => self.mother_state == other.mother_state,
            Field::BabyState => self.baby_state == other.baby_state,
        }
    }

    /// True when every field present in both masks holds the same value.
    pub fn matches(&self, filter: &Record) -> DbResult<bool> {
        let shared = self.mask & filter.mask;
        if shared.is_empty() {
            return Err(DbError::DisjointMasks);
        }
        Ok(shared.fields().all(|f| self.field_eq(filter, f)))
    }

    /// Copy every field selected by `payload`'s mask into `self`.
    pub fn apply(&mut self, payload: &Record) {
        for field in payload.mask.fields() {
            match field {
                Field::MotherCity => self.mother_city = payload.mother_city.clone(),
                Field::BabyCity => self.baby_city = payload.baby_city.clone(),
                Field::Id => self.id = payload.id,
                Field::MotherAge => self.mother_age = payload.mother_age,
                Field::BirthDate => self.birth_date = payload.birth_date.clone(),
                Field::BabySex => self.baby_sex = payload.baby_sex,
                Field::MotherState => self.mother_state = payload.mother_state.clone(),
                Field::BabyState => self.baby_state = payload.baby_state.clone(),
            }
        }
    }

    /// Check that the masked fields fit their on-disk slots.
    pub fn validate(&self) -> DbResult<()> {
        let len = |s: &Option<String>| s.as_ref().map_or(0, String::len);

        let cities = len(&self.mother_city) + len(&self.baby_city);
        if cities > MAX_CITIES_LEN {
            return Err(DbError::InvalidValue(format!(
                "cities take {} bytes, at most {} fit",
                cities, MAX_CITIES_LEN
            )));
        }
        if len(&self.birth_date) > BIRTH_DATE_LEN {
            return Err(DbError::InvalidValue(format!(
                "birth date longer than {} bytes",
                BIRTH_DATE_LEN
            )));
        }
        for (name, state) in [("mother_state", &self.mother_state), ("baby_state", &self.baby_state)] {
            if len(state) > STATE_LEN {
                return Err(DbError::InvalidValue(format!(
                    "{} longer than {} bytes",
                    name, STATE_LEN
                )));
            }
        }
        Ok(())
    }
}
