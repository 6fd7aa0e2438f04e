use crate::error::{DbError, DbResult};

// Record file, slot 0 (header):
// ┌─────────────────────────────────────────────────────────────────────────┐
// │ Offset │ Length │ Description                                           │
// │────────┼────────┼───────────────────────────────────────────────────────│
// │   0    │   1    │ STATUS ('0' = dirty, '1' = clean)                     │
// │   1    │   4    │ NEXT_RRN (i32, little-endian)                         │
// │   5    │   4    │ LIVE_COUNT                                            │
// │   9    │   4    │ DELETED_COUNT                                         │
// │   13   │   4    │ UPDATED_COUNT                                         │
// │   17   │  111   │ '$' padding                                           │
// └─────────────────────────────────────────────────────────────────────────┘
//
// Record file, slot N (RRN = N - 1):
// ┌─────────────────────────────────────────────────────────────────────────┐
// │   0    │   4    │ MOTHER_CITY_LEN (i32), -1 marks a tombstone           │
// │   4    │   4    │ BABY_CITY_LEN (i32)                                   │
// │   8    │   a    │ MOTHER_CITY bytes                                     │
// │  8+a   │   b    │ BABY_CITY bytes                                       │
// │ 8+a+b  │   ..   │ '$' padding up to byte 105                            │
// │────────┼────────┼───────────────────────────────────────────────────────│
// │  105   │   4    │ ID (i32, -1 = absent)                                 │
// │  109   │   4    │ MOTHER_AGE (i32, -1 = absent)                         │
// │  113   │   10   │ BIRTH_DATE                                            │
// │  123   │   1    │ BABY_SEX ('0', '1', '2')                              │
// │  124   │   2    │ MOTHER_STATE                                          │
// │  126   │   2    │ BABY_STATE                                            │
// └─────────────────────────────────────────────────────────────────────────┘

pub const RECORD_SLOT_SIZE: usize = 128;

pub const HEADER_STATUS_OFFSET: u64 = 0;
pub const REC_HEADER_NEXT_RRN_OFFSET: u64 = 1;
pub const REC_HEADER_LIVE_OFFSET: u64 = 5;
pub const REC_HEADER_DELETED_OFFSET: u64 = 9;
pub const REC_HEADER_UPDATED_OFFSET: u64 = 13;
pub const REC_HEADER_PADDING_OFFSET: u64 = 17;

pub const MOTHER_CITY_LEN_OFFSET: u64 = 0;
pub const BABY_CITY_LEN_OFFSET: u64 = 4;
pub const CITIES_OFFSET: u64 = 8;

/// Bytes reserved for the two length prefixes plus both cities.
pub const VARIABLE_REGION_SIZE: usize = 105;
/// Combined capacity of the two city strings.
pub const MAX_CITIES_LEN: usize = VARIABLE_REGION_SIZE - CITIES_OFFSET as usize;

pub const ID_OFFSET: u64 = 105;
pub const MOTHER_AGE_OFFSET: u64 = 109;
pub const BIRTH_DATE_OFFSET: u64 = 113;
pub const BABY_SEX_OFFSET: u64 = 123;
pub const MOTHER_STATE_OFFSET: u64 = 124;
pub const BABY_STATE_OFFSET: u64 = 126;

pub const BIRTH_DATE_LEN: usize = 10;
pub const STATE_LEN: usize = 2;

// B-tree file, slot 0 (header):
// ┌─────────────────────────────────────────────────────────────────────────┐
// │   0    │   1    │ STATUS                                                │
// │   1    │   4    │ ROOT_RRN (-1 = empty tree)                            │
// │   5    │   4    │ HEIGHT                                                │
// │   9    │   4    │ NEXT_FREE_RRN                                         │
// │   13   │   4    │ KEY_COUNT                                             │
// │   17   │   55   │ '$' padding                                           │
// └─────────────────────────────────────────────────────────────────────────┘
//
// B-tree file, slot N:
// ┌─────────────────────────────────────────────────────────────────────────┐
// │   0    │   4    │ LEVEL (1 = leaf)                                      │
// │   4    │   4    │ ITEM_COUNT                                            │
// │   8    │   40   │ (KEY, VALUE) x (ORDER - 1), -1 when absent            │
// │   48   │   24   │ CHILD_RRN x ORDER, -1 when absent                     │
// └─────────────────────────────────────────────────────────────────────────┘

pub const BTREE_ORDER: usize = 6;
pub const MAX_ITEMS: usize = BTREE_ORDER - 1;
pub const NODE_SLOT_SIZE: usize = 4 + 4 + MAX_ITEMS * 8 + BTREE_ORDER * 4;

pub const BT_HEADER_ROOT_OFFSET: u64 = 1;
pub const BT_HEADER_HEIGHT_OFFSET: u64 = 5;
pub const BT_HEADER_NEXT_RRN_OFFSET: u64 = 9;
pub const BT_HEADER_KEYS_OFFSET: u64 = 13;
pub const BT_HEADER_PADDING_OFFSET: u64 = 17;

/// On-disk marker for absent integers, absent child pointers and tombstones.
pub const ABSENT: i32 = -1;
pub const TOMBSTONE: i32 = ABSENT;

pub const LEAF_LEVEL: i32 = 1;

/// Relative record number: 0-based slot index, header slot excluded.
pub type Rrn = u32;

/// Byte offset of the record slot `rrn`.
pub fn record_offset(rrn: Rrn) -> u64 {
    (rrn as u64 + 1) * RECORD_SLOT_SIZE as u64
}

/// Byte offset of the B-tree node slot `rrn`.
pub fn node_offset(rrn: Rrn) -> u64 {
    (rrn as u64 + 1) * NODE_SLOT_SIZE as u64
}

/// `value` as an on-disk i32. Counters and RRNs stop at `i32::MAX`.
pub fn to_disk(value: u32, what: &str) -> DbResult<i32> {
    i32::try_from(value)
        .map_err(|_| DbError::InvalidValue(format!("{} {} exceeds i32::MAX", what, value)))
}

pub fn rrn_to_disk(rrn: Option<Rrn>) -> DbResult<i32> {
    match rrn {
        Some(r) => to_disk(r, "RRN"),
        None => Ok(ABSENT),
    }
}

pub fn rrn_from_disk(raw: i32) -> Option<Rrn> {
    if raw < 0 { None } else { Some(raw as Rrn) }
}
