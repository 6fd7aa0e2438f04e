use std::io::{Cursor, Read, Write};

use crate::error::{DbError, DbResult};
use crate::storage::binary::read_i32;
use crate::storage::layout::{
    rrn_from_disk, rrn_to_disk, to_disk, Rrn, ABSENT, BTREE_ORDER, LEAF_LEVEL, MAX_ITEMS,
    NODE_SLOT_SIZE,
};

/// A key and the record RRN it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Item {
    pub key: i32,
    pub value: Rrn,
}

/// Where a key leads inside one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// The key sits at this item position.
    Found(usize),
    /// Follow this child; `None` means we walked off a leaf.
    Descend(Option<Rrn>),
}

/// One node of an order-6 B-tree: up to five sorted items and six children.
///
/// `children[i]` holds keys smaller than `items[i].key`; `children[len]`
/// holds keys greater than every key in the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode {
    level: u32,
    items: Vec<Item>,
    children: [Option<Rrn>; BTREE_ORDER],
}

impl BTreeNode {
    /// Empty node at `level` (1 = leaf).
    pub fn new(level: u32) -> Self {
        BTreeNode {
            level,
            items: Vec::with_capacity(MAX_ITEMS),
            children: [None; BTREE_ORDER],
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.level == LEAF_LEVEL as u32
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == MAX_ITEMS
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.items.iter().map(|it| it.key)
    }

    pub fn children(&self) -> &[Option<Rrn>] {
        &self.children[..=self.items.len()]
    }

    pub fn child(&self, pos: usize) -> Option<Rrn> {
        self.children.get(pos).copied().flatten()
    }

    /// Insert in key order. `None` when the node is full or the key is the
    /// absent marker; otherwise the position the item landed at. Children
    /// are left alone.
    pub fn insert_sorted(&mut self, key: i32, value: Rrn) -> Option<usize> {
        if self.is_full() || key == ABSENT {
            return None;
        }
        let pos = self.items.iter().position(|it| it.key > key).unwrap_or(self.items.len());
        self.items.insert(pos, Item { key, value });
        Some(pos)
    }

    /// Put `child` at `pos`, shifting later children right.
    pub fn insert_child(&mut self, pos: usize, child: Option<Rrn>) {
        for i in (pos + 1..BTREE_ORDER).rev() {
            self.children[i] = self.children[i - 1];
        }
        self.children[pos] = child;
    }

    /// Remove and return the item at `pos`. Children are not shifted.
    pub fn remove_item(&mut self, pos: usize) -> Item {
        self.items.remove(pos)
    }

    pub fn route(&self, key: i32) -> DbResult<Route> {
        if key < 0 {
            return Err(DbError::InvalidArgument(format!("negative key {}", key)));
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.key == key {
                return Ok(Route::Found(i));
            }
            if item.key > key {
                return Ok(Route::Descend(self.children[i]));
            }
        }
        Ok(Route::Descend(self.children[self.items.len()]))
    }

    /// Split a full node while inserting `(key, value)` with `child` as the
    /// right neighbour of the new item.
    ///
    /// `self` keeps the lower half; the returned node (same level) holds the
    /// upper half, whose first item is meant to be promoted.
    pub fn split(&mut self, key: i32, value: Rrn, child: Option<Rrn>) -> BTreeNode {
        let mut items = std::mem::take(&mut self.items);
        let pos = items.iter().position(|it| it.key > key).unwrap_or(items.len());
        items.insert(pos, Item { key, value });

        let mut children: Vec<Option<Rrn>> = self.children.to_vec();
        children.insert(pos + 1, child);

        let keep_items = BTREE_ORDER / 2;
        let keep_children = keep_items + 1;

        let mut right = BTreeNode::new(self.level);
        right.items = items.split_off(keep_items);
        for (slot, c) in right.children.iter_mut().zip(&children[keep_children..]) {
            *slot = *c;
        }

        self.items = items;
        self.children = [None; BTREE_ORDER];
        self.children[..keep_children].copy_from_slice(&children[..keep_children]);
        right
    }

    /// Fails when a value or child RRN does not fit the on-disk i32.
    pub fn encode(&self) -> DbResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(NODE_SLOT_SIZE);
        buf.extend((self.level as i32).to_le_bytes());
        buf.extend((self.items.len() as i32).to_le_bytes());
        for i in 0..MAX_ITEMS {
            let (key, value) = match self.items.get(i) {
                Some(it) => (it.key, to_disk(it.value, "RRN")?),
                None => (ABSENT, ABSENT),
            };
            buf.extend(key.to_le_bytes());
            buf.extend(value.to_le_bytes());
        }
        for child in self.children {
            buf.extend(rrn_to_disk(child)?.to_le_bytes());
        }
        Ok(buf)
    }

    pub fn decode(slot: &[u8]) -> DbResult<Self> {
        if slot.len() != NODE_SLOT_SIZE {
            return Err(DbError::Corrupt(format!("node slot of {} bytes", slot.len())));
        }
        let mut c = Cursor::new(slot);
        let level = read_i32(&mut c)?;
        let count = read_i32(&mut c)?;
        if level < LEAF_LEVEL || !(0..=MAX_ITEMS as i32).contains(&count) {
            return Err(DbError::Corrupt(format!("node with level {} and {} items", level, count)));
        }

        let mut node = BTreeNode::new(level as u32);
        for i in 0..MAX_ITEMS {
            let key = read_i32(&mut c)?;
            let value = read_i32(&mut c)?;
            if (i as i32) < count {
                let value = rrn_from_disk(value)
                    .ok_or_else(|| DbError::Corrupt(format!("key {} has no value", key)))?;
                node.items.push(Item { key, value });
            }
        }
        for slot in node.children.iter_mut() {
            *slot = rrn_from_disk(read_i32(&mut c)?);
        }
        Ok(node)
    }
}

pub fn read_node<R: Read>(r: &mut R) -> DbResult<BTreeNode> {
    let mut slot = [0u8; NODE_SLOT_SIZE];
    r.read_exact(&mut slot)?;
    BTreeNode::decode(&slot)
}

pub fn write_node<W: Write>(w: &mut W, node: &BTreeNode) -> DbResult<()> {
    w.write_all(&node.encode()?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(keys: &[i32]) -> BTreeNode {
        let mut n = BTreeNode::new(1);
        for &k in keys {
            n.insert_sorted(k, k as Rrn * 10).unwrap();
        }
        n
    }

    #[test]
    fn sorted_insert_reports_position() {
        let mut n = leaf(&[10, 30]);
        assert_eq!(n.insert_sorted(20, 0), Some(1));
        assert_eq!(n.insert_sorted(5, 0), Some(0));
        assert_eq!(n.insert_sorted(40, 0), Some(4));
        assert!(n.is_full());
        assert_eq!(n.insert_sorted(50, 0), None);
        assert_eq!(n.keys().collect::<Vec<_>>(), vec![5, 10, 20, 30, 40]);
        assert_eq!(BTreeNode::new(1).insert_sorted(-1, 0), None);
    }

    #[test]
    fn route_picks_child_between_keys() {
        let mut n = BTreeNode::new(2);
        n.insert_sorted(20, 0);
        n.insert_sorted(40, 1);
        n.insert_child(0, Some(7));
        n.insert_child(1, Some(8));
        n.insert_child(2, Some(9));
        assert_eq!(n.children(), &[Some(7), Some(8), Some(9)]);

        assert_eq!(n.route(10).unwrap(), Route::Descend(Some(7)));
        assert_eq!(n.route(30).unwrap(), Route::Descend(Some(8)));
        assert_eq!(n.route(99).unwrap(), Route::Descend(Some(9)));
        assert_eq!(n.route(40).unwrap(), Route::Found(1));
        assert!(n.route(-3).is_err());
        assert_eq!(leaf(&[1]).route(2).unwrap(), Route::Descend(None));
    }

    #[test]
    fn leaf_split_keeps_lower_half() {
        let mut n = leaf(&[10, 20, 30, 40, 50]);
        let mut right = n.split(35, 350, None);
        assert_eq!(n.keys().collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(right.keys().collect::<Vec<_>>(), vec![35, 40, 50]);
        assert_eq!(right.level(), 1);

        let promoted = right.remove_item(0);
        assert_eq!(promoted, Item { key: 35, value: 350 });
        assert_eq!(right.keys().collect::<Vec<_>>(), vec![40, 50]);
    }

    #[test]
    fn internal_split_distributes_children() {
        let mut n = BTreeNode::new(2);
        for (i, k) in [10, 20, 30, 40, 50].into_iter().enumerate() {
            n.insert_sorted(k, i as Rrn);
        }
        for c in 0..6 {
            n.insert_child(c, Some(100 + c as Rrn));
        }
        // 45's right neighbour is the new child 200.
        let mut right = n.split(45, 9, Some(200));
        assert_eq!(n.children(), &[Some(100), Some(101), Some(102), Some(103)]);

        let promoted = right.remove_item(0);
        assert_eq!(promoted.key, 40);
        assert_eq!(right.keys().collect::<Vec<_>>(), vec![45, 50]);
        assert_eq!(right.children(), &[Some(104), Some(200), Some(105)]);
    }

    #[test]
    fn codec_writes_sentinels_for_empty_slots() {
        let n = leaf(&[3, 1]);
        let bytes = n.encode().unwrap();
        assert_eq!(bytes.len(), NODE_SLOT_SIZE);
        assert_eq!(&bytes[0..4], &1i32.to_le_bytes());
        assert_eq!(&bytes[4..8], &2i32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1i32.to_le_bytes());
        assert_eq!(&bytes[24..28], &(-1i32).to_le_bytes());
        assert_eq!(&bytes[48..52], &(-1i32).to_le_bytes());
        assert_eq!(BTreeNode::decode(&bytes).unwrap(), n);
    }

    #[test]
    fn decode_rejects_bad_count() {
        let mut bytes = leaf(&[1]).encode().unwrap();
        bytes[4..8].copy_from_slice(&6i32.to_le_bytes());
        assert!(matches!(BTreeNode::decode(&bytes), Err(DbError::Corrupt(_))));
    }

    #[test]
    fn encode_refuses_rrn_past_i32() {
        let mut n = BTreeNode::new(2);
        n.insert_sorted(5, 0);
        n.insert_child(0, Some(1));
        n.insert_child(1, Some(i32::MAX as Rrn + 1));
        assert!(matches!(n.encode(), Err(DbError::InvalidValue(_))));

        let mut far_value = BTreeNode::new(1);
        far_value.insert_sorted(5, u32::MAX);
        let mut sink = Vec::new();
        assert!(write_node(&mut sink, &far_value).is_err());
        assert!(sink.is_empty());
    }
}
