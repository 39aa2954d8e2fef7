//! Heap page: an ordered, capacity-bounded run of tuples.
//!
//! Tuples inside a page are kept sorted ascending by clustering key. A page
//! is always written and read as a whole record:
//! ```text
//! +---------------------+
//! | page_num: u32       |
//! | tuple_count: u32    |
//! +---------------------+
//! | tuple 0             |  arity: u32, then tagged values
//! | ...                 |
//! +---------------------+
//! ```

use crate::codec::{seal, unseal, Decoder, RecordKind};
use crate::store::ObjectStore;
use crate::tuple::Tuple;
use bytes::{BufMut, Bytes, BytesMut};
use ordo_common::{OrdoError, PageId, Result, Value};

/// A heap page.
#[derive(Debug, Clone)]
pub struct Page {
    page_id: PageId,
    capacity: usize,
    tuples: Vec<Tuple>,
}

impl Page {
    /// Creates an empty page.
    pub fn new(page_id: PageId, capacity: usize) -> Self {
        Self {
            page_id,
            capacity,
            tuples: Vec::with_capacity(capacity.min(1024)),
        }
    }

    /// Creates a page holding a single tuple.
    pub fn with_tuple(page_id: PageId, capacity: usize, tuple: Tuple) -> Self {
        let mut page = Self::new(page_id, capacity);
        page.tuples.push(tuple);
        page
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn tuple_mut(&mut self, offset: usize) -> Option<&mut Tuple> {
        self.tuples.get_mut(offset)
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    /// Appends a tuple.
    ///
    /// Fails with `CapacityExceeded` if the page is full; full pages only
    /// accept rows through [`Page::insert_displacing`].
    pub fn add_tuple(&mut self, tuple: Tuple) -> Result<()> {
        if self.is_full() {
            return Err(OrdoError::CapacityExceeded {
                page: self.page_id.page_num(),
                capacity: self.capacity,
            });
        }
        self.tuples.push(tuple);
        Ok(())
    }

    /// Inserts a tuple at `offset` and, if the page grew past capacity,
    /// pushes out and returns its trailing tuple.
    pub fn insert_displacing(&mut self, offset: usize, tuple: Tuple) -> Option<Tuple> {
        let offset = offset.min(self.tuples.len());
        self.tuples.insert(offset, tuple);
        if self.tuples.len() > self.capacity {
            self.tuples.pop()
        } else {
            None
        }
    }

    /// Removes the first tuple equal to `tuple`. Returns true if one was removed.
    pub fn remove_tuple(&mut self, tuple: &Tuple) -> bool {
        match self.tuples.iter().position(|t| t == tuple) {
            Some(pos) => {
                self.tuples.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Removes every tuple matching `pred`, returning the removed tuples in order.
    pub fn remove_matching<F>(&mut self, mut pred: F) -> Vec<Tuple>
    where
        F: FnMut(&Tuple) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.tuples.len());
        for tuple in self.tuples.drain(..) {
            if pred(&tuple) {
                removed.push(tuple);
            } else {
                kept.push(tuple);
            }
        }
        self.tuples = kept;
        removed
    }

    /// Upper-bound search: smallest offset whose clustering key is strictly
    /// greater than `target`. Inserting there keeps the page sorted and
    /// places the row after any rows with an equal key.
    pub fn find_insertion_offset(&self, target: &Value, clustering_column: usize) -> usize {
        self.tuples
            .partition_point(|t| t.key(clustering_column) <= target)
    }

    /// Offset of the first tuple whose clustering key equals `key`.
    pub fn find_row(&self, key: &Value, clustering_column: usize) -> Option<usize> {
        let offset = self
            .tuples
            .partition_point(|t| t.key(clustering_column) < key);
        match self.tuples.get(offset) {
            Some(t) if t.key(clustering_column) == key => Some(offset),
            _ => None,
        }
    }

    /// Smallest and largest clustering key on the page.
    pub fn key_range(&self, clustering_column: usize) -> Option<(Value, Value)> {
        let first = self.tuples.first()?;
        let last = self.tuples.last()?;
        Some((
            first.key(clustering_column).clone(),
            last.key(clustering_column).clone(),
        ))
    }

    /// Serializes the page into a framed record.
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.page_id.page_num());
        buf.put_u32_le(self.tuples.len() as u32);
        for tuple in &self.tuples {
            tuple.encode(&mut buf);
        }
        seal(RecordKind::Page, &buf)
    }

    /// Deserializes a page record.
    pub fn from_record(object: &str, capacity: usize, data: &[u8]) -> Result<Self> {
        let payload = unseal(object, RecordKind::Page, data)?;
        let mut dec = Decoder::new(object, payload);
        let page_id = PageId::new(dec.u32()?);
        let count = dec.u32()? as usize;
        let mut tuples = Vec::with_capacity(count.min(capacity.max(1)));
        for _ in 0..count {
            tuples.push(Tuple::decode(&mut dec)?);
        }
        dec.finish()?;
        Ok(Self {
            page_id,
            capacity,
            tuples,
        })
    }

    /// Loads a page of `table` whose tuples hold `arity` values. A page
    /// listed by the table but absent from the store, or holding tuples of
    /// another shape, is reported as corruption.
    pub fn load(
        store: &dyn ObjectStore,
        table: &str,
        page_id: PageId,
        capacity: usize,
        arity: usize,
    ) -> Result<Self> {
        let object_id = page_id.object_id();
        let object = format!("{}/{}", table, object_id);
        let data = store
            .load(table, &object_id)?
            .ok_or_else(|| OrdoError::corrupted(&object, "page missing from store"))?;
        let page = Self::from_record(&object, capacity, &data)?;
        if page.page_id != page_id {
            return Err(OrdoError::corrupted(
                &object,
                format!("record holds {}", page.page_id),
            ));
        }
        if page.tuples.len() > capacity {
            return Err(OrdoError::corrupted(
                &object,
                format!("{} tuples exceed capacity {}", page.tuples.len(), capacity),
            ));
        }
        if let Some(tuple) = page.tuples.iter().find(|t| t.arity() != arity) {
            return Err(OrdoError::corrupted(
                &object,
                format!("tuple has {} values, expected {}", tuple.arity(), arity),
            ));
        }
        Ok(page)
    }
}

impl std::fmt::Display for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, tuple) in self.tuples.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", tuple)?;
        }
        Ok(())
    }
}
