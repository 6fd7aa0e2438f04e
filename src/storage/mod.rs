pub mod binary;
pub mod btree;
pub mod codec;
pub mod header;
pub mod layout;
pub mod node;
pub mod record;
pub mod record_store;

pub use btree::{BTreeIndex, SearchResult};
pub use layout::Rrn;
pub use record::{BabySex, Field, FieldMask, Record};
pub use record_store::{OpenMode, RecordCursor, RecordStore};
