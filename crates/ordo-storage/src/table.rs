//! Clustered table: pages kept in global clustering-key order.
//!
//! The table keeps a page directory, the ordered list of its pages with
//! each page's cached key range and row count, so it can find the page
//! owning a key by binary search without reading page contents.
//!
//! ```text
//! directory:  page-0 [0, 199] 200 | page-1 [200, 350] 151 | page-4 [351, 380] 30
//! ```
//!
//! Pages never split. An insert into a full page pushes that page's last
//! tuple into the next page, which may push its own last tuple onward; the
//! cascade ends at the first page with room or at a new page appended to
//! the end. Pages emptied by deletes are removed; pages are never merged.
//!
//! Every mutation stages its page writes, index node writes and the table
//! metadata into a single [`WriteBatch`] that is applied once all in-memory
//! work has succeeded.

use crate::catalog::{IndexBinding, TableSchema};
use crate::codec::{put_value, seal, unseal, Decoder, RecordKind};
use crate::index::SecondaryIndex;
use crate::page::Page;
use crate::store::{ObjectStore, WriteBatch};
use crate::tuple::Tuple;
use bytes::{BufMut, Bytes, BytesMut};
use ordo_common::{OrdoError, PageId, Result, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Object id of the table metadata record within the table's scope.
pub const TABLE_META_OBJECT: &str = "table.meta";

/// Cached clustering-key range and row count of a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRange {
    pub min: Value,
    pub max: Value,
    pub rows: usize,
}

impl PageRange {
    fn of(page: &Page, clustering_position: usize) -> Result<Self> {
        let (min, max) = page.key_range(clustering_position).ok_or_else(|| {
            OrdoError::Internal(format!("no key range for empty {}", page.page_id()))
        })?;
        Ok(Self {
            min,
            max,
            rows: page.len(),
        })
    }
}

/// A table whose tuples are sorted by clustering key across all its pages.
pub struct ClusteredTable {
    schema: TableSchema,
    capacity: usize,
    directory: Vec<(PageId, PageRange)>,
    next_page: u32,
    indexes: Vec<SecondaryIndex>,
    store: Arc<dyn ObjectStore>,
}

impl ClusteredTable {
    /// Creates an empty table and persists its metadata.
    ///
    /// Index bindings already present on `schema` get empty indexes.
    pub fn create(
        schema: TableSchema,
        capacity: usize,
        index_node_keys: usize,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(OrdoError::InvalidParameter {
                name: "max_rows_per_page".to_string(),
                value: capacity.to_string(),
            });
        }
        let mut indexes = Vec::with_capacity(schema.indexes().len());
        for binding in schema.indexes() {
            let pos = schema.column_position(&binding.column)?;
            indexes.push(SecondaryIndex::new(schema.name(), binding, pos, index_node_keys));
        }
        let mut table = Self {
            schema,
            capacity,
            directory: Vec::new(),
            next_page: 0,
            indexes,
            store,
        };

        let mut batch = WriteBatch::new();
        table.stage_metadata(&mut batch);
        table.store.apply(batch)?;
        info!(table = table.name(), capacity, "created clustered table");
        Ok(table)
    }

    /// Opens a table previously created in `store`, loading its directory
    /// and every index bound in `schema`.
    pub fn open(schema: TableSchema, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let name = schema.name().to_string();
        let object = format!("{}/{}", name, TABLE_META_OBJECT);
        let data = store
            .load(&name, TABLE_META_OBJECT)?
            .ok_or_else(|| OrdoError::corrupted(&object, "table metadata missing"))?;

        let payload = unseal(&object, RecordKind::TableMeta, &data)?;
        let mut dec = Decoder::new(&object, payload);
        let capacity = dec.u32()? as usize;
        let next_page = dec.u32()?;
        let count = dec.u32()? as usize;
        let mut directory = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let page_id = PageId::new(dec.u32()?);
            let rows = dec.u32()? as usize;
            let min = dec.value()?;
            let max = dec.value()?;
            directory.push((page_id, PageRange { min, max, rows }));
        }
        dec.finish()?;
        if capacity == 0 {
            return Err(OrdoError::corrupted(&object, "zero page capacity"));
        }

        let mut indexes = Vec::with_capacity(schema.indexes().len());
        for binding in schema.indexes() {
            let pos = schema.column_position(&binding.column)?;
            indexes.push(SecondaryIndex::load(store.as_ref(), &name, binding, pos)?);
        }

        debug!(table = %name, pages = directory.len(), indexes = indexes.len(), "opened clustered table");
        Ok(Self {
            schema,
            capacity,
            directory,
            next_page,
            indexes,
            store,
        })
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Maximum tuples per page.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Page ids in clustering-key order.
    pub fn page_ids(&self) -> Vec<PageId> {
        self.directory.iter().map(|(id, _)| *id).collect()
    }

    /// Page ids with their cached ranges, in clustering-key order.
    pub fn page_ranges(&self) -> &[(PageId, PageRange)] {
        &self.directory
    }

    pub fn page_range(&self, page_id: PageId) -> Option<&PageRange> {
        self.directory
            .iter()
            .find(|(id, _)| *id == page_id)
            .map(|(_, range)| range)
    }

    pub fn page_count(&self) -> usize {
        self.directory.len()
    }

    /// Number of tuples, from the cached row counts.
    pub fn row_count(&self) -> usize {
        self.directory.iter().map(|(_, r)| r.rows).sum()
    }

    pub fn indexes(&self) -> &[SecondaryIndex] {
        &self.indexes
    }

    /// Index on `column`, if any.
    pub fn index(&self, column: &str) -> Option<&SecondaryIndex> {
        self.indexes.iter().find(|i| i.column() == column)
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Reads one page of this table.
    pub fn load_page(&self, page_id: PageId) -> Result<Page> {
        Page::load(
            self.store.as_ref(),
            self.name(),
            page_id,
            self.capacity,
            self.schema.arity(),
        )
    }

    /// Reads every page in clustering-key order.
    pub fn pages(&self) -> Result<Vec<Page>> {
        self.directory
            .iter()
            .map(|(id, _)| self.load_page(*id))
            .collect()
    }

    /// Lazily iterates every tuple in clustering-key order.
    ///
    /// The scan works on a snapshot of the page list taken now.
    pub fn scan(&self) -> Scan {
        Scan {
            store: Arc::clone(&self.store),
            table: self.name().to_string(),
            capacity: self.capacity,
            arity: self.schema.arity(),
            pages: self.page_ids().into_iter(),
            current: Vec::new().into_iter(),
            failed: false,
        }
    }

    /// Directory positions of pages whose range contains `key`.
    fn pages_covering(&self, key: &Value) -> std::ops::Range<usize> {
        let start = self.directory.partition_point(|(_, r)| r.max < *key);
        let end = self.directory.partition_point(|(_, r)| r.min <= *key);
        start..end.max(start)
    }

    /// Finds where a tuple with clustering key `key` goes: a directory
    /// position (equal to the page count for a new trailing page) and a
    /// row offset inside that page. A page read to resolve the offset is
    /// handed back so the caller need not read it again.
    fn locate(&self, key: &Value) -> Result<(usize, usize, Option<Page>)> {
        let n = self.directory.len();
        if n == 0 {
            return Ok((0, 0, None));
        }

        // first page holding a key strictly greater than `key`
        let p = self.directory.partition_point(|(_, r)| r.max <= *key);
        let (idx, offset, page) = if p == n {
            (n - 1, self.directory[n - 1].1.rows, None)
        } else if self.directory[p].1.min <= *key {
            let page = self.load_page(self.directory[p].0)?;
            let offset = page.find_insertion_offset(key, self.schema.clustering_position());
            (p, offset, Some(page))
        } else if p > 0 && self.directory[p - 1].1.rows < self.capacity {
            // falls between two pages and the left one has room
            (p - 1, self.directory[p - 1].1.rows, None)
        } else {
            (p, 0, None)
        };

        if offset >= self.capacity {
            Ok((idx + 1, 0, None))
        } else {
            Ok((idx, offset, page))
        }
    }

    /// Inserts a row given as named column values.
    ///
    /// Returns the page the row was placed in.
    pub fn insert_row(&mut self, values: &[(&str, Value)]) -> Result<PageId> {
        let tuple = self.schema.build_tuple(values)?;
        self.insert_tuple(tuple)
    }

    /// Inserts a tuple already in schema order.
    ///
    /// On an error returned after page reads succeeded (index or store
    /// failure) the in-memory table may be ahead of the store; callers must
    /// discard it and [`open`](Self::open) it again.
    pub fn insert_tuple(&mut self, tuple: Tuple) -> Result<PageId> {
        if tuple.arity() != self.schema.arity() {
            return Err(OrdoError::InvalidParameter {
                name: format!("{} tuple arity", self.name()),
                value: tuple.arity().to_string(),
            });
        }
        let cpos = self.schema.clustering_position();
        let key = tuple.key(cpos).clone();
        let index_keys = self
            .indexes
            .iter()
            .map(|index| index.key_of(&tuple).cloned())
            .collect::<Result<Vec<_>>>()?;

        let (mut idx, mut offset, mut loaded) = self.locate(&key)?;
        let mut next_page = self.next_page;
        let mut staged: Vec<Page> = Vec::new();
        let mut appended: Option<PageId> = None;
        // tuples pushed out of one page into the next: (tuple, from, to)
        let mut moves: Vec<(Tuple, PageId, PageId)> = Vec::new();
        let mut carry = tuple;
        let mut origin: Option<PageId> = None;

        let target = loop {
            if idx == self.directory.len() {
                let page_id = PageId::new(next_page);
                next_page += 1;
                if let Some(from) = origin {
                    moves.push((carry.clone(), from, page_id));
                }
                staged.push(Page::with_tuple(page_id, self.capacity, carry));
                appended = Some(page_id);
                debug!(table = self.name(), page = %page_id, "allocated page");
                break staged[0].page_id();
            }

            let page_id = self.directory[idx].0;
            let mut page = match loaded.take() {
                Some(page) => page,
                None => self.load_page(page_id)?,
            };
            if let Some(from) = origin {
                moves.push((carry.clone(), from, page_id));
            }
            let displaced = page.insert_displacing(offset, carry);
            staged.push(page);
            match displaced {
                Some(tuple) => {
                    carry = tuple;
                    origin = Some(page_id);
                    idx += 1;
                    offset = 0;
                }
                None => break staged[0].page_id(),
            }
        };

        for (index, value) in self.indexes.iter_mut().zip(&index_keys) {
            index.add_page(value, target)?;
            for (tuple, from, to) in &moves {
                index.move_tuple(tuple, *from, *to)?;
            }
        }

        let mut ranges = Vec::with_capacity(staged.len());
        for page in &staged {
            ranges.push((page.page_id(), PageRange::of(page, cpos)?));
        }
        if let Some(page_id) = appended {
            let range = PageRange::of(&staged[staged.len() - 1], cpos)?;
            self.directory.push((page_id, range));
        }
        for (page_id, range) in ranges {
            if let Some(slot) = self.directory.iter_mut().find(|(id, _)| *id == page_id) {
                slot.1 = range;
            }
        }
        self.next_page = next_page;

        let mut batch = WriteBatch::new();
        for page in &staged {
            batch.put(self.name(), page.page_id().object_id(), page.to_record());
        }
        self.stage_metadata(&mut batch);
        self.store.apply(batch)?;

        if moves.is_empty() {
            debug!(table = self.name(), page = %target, key = %key, "inserted row");
        } else {
            debug!(
                table = self.name(),
                page = %target,
                key = %key,
                shifted = moves.len(),
                "inserted row with cascading shift"
            );
        }
        Ok(target)
    }

    /// Finds the first row with clustering key `key`, in page order.
    ///
    /// Uses the index on the clustering column when there is one, and the
    /// page directory otherwise; both yield the same row.
    fn find_row(&self, key: &Value) -> Result<Option<(Page, usize)>> {
        let cpos = self.schema.clustering_position();
        let candidates: Vec<PageId> = match self.index(self.schema.clustering_key()) {
            Some(index) => index.pages_for(key)?,
            None => self.directory[self.pages_covering(key)]
                .iter()
                .map(|(id, _)| *id)
                .collect(),
        };
        for page_id in candidates {
            let page = self.load_page(page_id)?;
            if let Some(offset) = page.find_row(key, cpos) {
                return Ok(Some((page, offset)));
            }
        }
        Ok(None)
    }

    /// Returns the first row with clustering key `key`.
    pub fn get_row(&self, key: &Value) -> Result<Option<Tuple>> {
        self.schema
            .check_value(self.schema.clustering_key(), key)?;
        Ok(self
            .find_row(key)?
            .and_then(|(page, offset)| page.tuples().get(offset).cloned()))
    }

    /// Overwrites columns of the row with clustering key `key`.
    ///
    /// The clustering key itself cannot be changed.
    pub fn update_row(&mut self, key: &Value, values: &[(&str, Value)]) -> Result<()> {
        let clustering_key = self.schema.clustering_key().to_string();
        self.schema.check_value(&clustering_key, key)?;
        let mut changes = Vec::with_capacity(values.len());
        for (column, value) in values {
            if *column == clustering_key {
                return Err(OrdoError::ClusteringKeyImmutable(format!(
                    "{}.{}",
                    self.name(),
                    clustering_key
                )));
            }
            changes.push((self.schema.check_value(column, value)?, value.clone()));
        }

        let (mut page, offset) = self
            .find_row(key)?
            .ok_or_else(|| OrdoError::RowNotFound(key.to_string()))?;
        let page_id = page.page_id();
        let tuple = page.tuple_mut(offset).ok_or_else(|| {
            OrdoError::Internal(format!("offset {} outside {}", offset, page_id))
        })?;
        let before = tuple.clone();
        for (pos, value) in changes {
            tuple.set(pos, value);
        }
        let after = tuple.clone();

        for index in &mut self.indexes {
            let old = index.key_of(&before)?;
            let new = index.key_of(&after)?;
            if old != new {
                index.remove_page(old, page_id)?;
                index.add_page(new, page_id)?;
            }
        }

        let mut batch = WriteBatch::new();
        batch.put(self.name(), page_id.object_id(), page.to_record());
        for index in &mut self.indexes {
            index.flush_into(&mut batch);
        }
        self.store.apply(batch)?;
        debug!(table = self.name(), page = %page_id, key = %key, "updated row");
        Ok(())
    }

    /// Deletes every row whose columns equal all the given values.
    ///
    /// Candidate pages come from the clustering key when it is among the
    /// conditions, else from intersecting the page lists of indexed
    /// columns, else from the whole table. An empty condition list deletes
    /// every row. Returns the number of rows removed.
    pub fn delete_rows(&mut self, conditions: &[(&str, Value)]) -> Result<usize> {
        let mut resolved = Vec::with_capacity(conditions.len());
        for (column, value) in conditions {
            resolved.push((self.schema.check_value(column, value)?, value.clone()));
        }
        let cpos = self.schema.clustering_position();

        let candidates: Vec<PageId> = match resolved.iter().find(|(pos, _)| *pos == cpos) {
            Some((_, key)) => self.directory[self.pages_covering(key)]
                .iter()
                .map(|(id, _)| *id)
                .collect(),
            None => {
                let mut narrowed: Option<Vec<PageId>> = None;
                for (pos, value) in &resolved {
                    let Some(index) = self.indexes.iter().find(|i| i.column_position() == *pos)
                    else {
                        continue;
                    };
                    let pages = index.pages_for(value)?;
                    narrowed = Some(match narrowed {
                        None => pages,
                        Some(prev) => prev
                            .into_iter()
                            .filter(|p| pages.binary_search(p).is_ok())
                            .collect(),
                    });
                }
                narrowed.unwrap_or_else(|| self.page_ids())
            }
        };
        if candidates.is_empty() {
            return Ok(0);
        }

        let mut rewritten: Vec<Page> = Vec::new();
        let mut emptied: Vec<PageId> = Vec::new();
        let mut removed: Vec<(Tuple, PageId)> = Vec::new();
        for page_id in candidates {
            let mut page = self.load_page(page_id)?;
            let gone = page.remove_matching(|t| {
                resolved.iter().all(|(pos, value)| t.get(*pos) == Some(value))
            });
            if gone.is_empty() {
                continue;
            }
            removed.extend(gone.into_iter().map(|t| (t, page_id)));
            if page.is_empty() {
                emptied.push(page_id);
            } else {
                rewritten.push(page);
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }

        for index in &mut self.indexes {
            for (tuple, page_id) in &removed {
                index.remove_page(index.key_of(tuple)?, *page_id)?;
            }
        }

        let mut ranges = HashMap::with_capacity(rewritten.len());
        for page in &rewritten {
            ranges.insert(page.page_id(), PageRange::of(page, cpos)?);
        }
        self.directory.retain(|(id, _)| !emptied.contains(id));
        for (id, range) in self.directory.iter_mut() {
            if let Some(updated) = ranges.remove(id) {
                *range = updated;
            }
        }

        let mut batch = WriteBatch::new();
        for page in &rewritten {
            batch.put(self.name(), page.page_id().object_id(), page.to_record());
        }
        for page_id in &emptied {
            batch.remove(self.name(), page_id.object_id());
        }
        self.stage_metadata(&mut batch);
        self.store.apply(batch)?;

        if !emptied.is_empty() {
            debug!(table = self.name(), pages = emptied.len(), "removed emptied pages");
        }
        debug!(table = self.name(), rows = removed.len(), "deleted rows");
        Ok(removed.len())
    }

    /// Adds an index on a column and fills it from the existing rows.
    pub fn create_index(&mut self, binding: &IndexBinding, index_node_keys: usize) -> Result<()> {
        let mut schema = self.schema.clone();
        schema.add_index(&binding.column, &binding.index_name)?;
        let pos = schema.column_position(&binding.column)?;

        let mut index = SecondaryIndex::new(self.name(), binding, pos, index_node_keys);
        let mut rows = 0usize;
        for (page_id, _) in &self.directory {
            let page = self.load_page(*page_id)?;
            for tuple in page.tuples() {
                index.add_page(index.key_of(tuple)?, *page_id)?;
                rows += 1;
            }
        }

        let mut batch = WriteBatch::new();
        index.flush_into(&mut batch);
        self.store.apply(batch)?;

        info!(
            table = self.name(),
            column = %binding.column,
            index = %binding.index_name,
            rows,
            "created index"
        );
        self.schema = schema;
        self.indexes.push(index);
        Ok(())
    }

    /// Stages dirty index nodes and the table metadata into `batch`.
    fn stage_metadata(&mut self, batch: &mut WriteBatch) {
        for index in &mut self.indexes {
            index.flush_into(batch);
        }
        batch.put(self.schema.name(), TABLE_META_OBJECT, self.meta_record());
    }

    fn meta_record(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.capacity as u32);
        buf.put_u32_le(self.next_page);
        buf.put_u32_le(self.directory.len() as u32);
        for (page_id, range) in &self.directory {
            buf.put_u32_le(page_id.page_num());
            buf.put_u32_le(range.rows as u32);
            put_value(&mut buf, &range.min);
            put_value(&mut buf, &range.max);
        }
        seal(RecordKind::TableMeta, &buf)
    }

    /// Reads every page and checks the table invariants: global key order,
    /// no empty or duplicate pages, cached ranges matching page contents,
    /// and every index holding exactly one entry per tuple.
    pub fn verify(&self) -> Result<()> {
        let cpos = self.schema.clustering_position();
        let mut expected: Vec<BTreeMap<Value, Vec<PageId>>> =
            vec![BTreeMap::new(); self.indexes.len()];
        let mut last: Option<Value> = None;

        for (i, (page_id, range)) in self.directory.iter().enumerate() {
            if self.directory[..i].iter().any(|(id, _)| id == page_id) {
                return Err(OrdoError::Internal(format!("{} listed twice", page_id)));
            }
            let page = self.load_page(*page_id)?;
            if page.is_empty() || page.len() > self.capacity {
                return Err(OrdoError::Internal(format!(
                    "{} holds {} rows",
                    page_id,
                    page.len()
                )));
            }
            if PageRange::of(&page, cpos)? != *range {
                return Err(OrdoError::Internal(format!(
                    "cached range of {} is stale",
                    page_id
                )));
            }
            for tuple in page.tuples() {
                let key = tuple.key(cpos);
                if last.as_ref().is_some_and(|prev| prev > key) {
                    return Err(OrdoError::Internal(format!(
                        "{} breaks clustering order at {}",
                        page_id, key
                    )));
                }
                last = Some(key.clone());
                for (index, entries) in self.indexes.iter().zip(expected.iter_mut()) {
                    entries
                        .entry(index.key_of(tuple)?.clone())
                        .or_default()
                        .push(*page_id);
                }
            }
        }

        for (index, entries) in self.indexes.iter().zip(expected) {
            index.tree().verify()?;
            let actual: Vec<(Value, Vec<PageId>)> = index.entries()?;
            let wanted: Vec<(Value, Vec<PageId>)> = entries
                .into_iter()
                .map(|(value, mut pages)| {
                    pages.sort();
                    (value, pages)
                })
                .collect();
            if actual != wanted {
                return Err(OrdoError::Internal(format!(
                    "index {} disagrees with table contents",
                    index.name()
                )));
            }
        }
        Ok(())
    }
}

/// Lazy tuple iterator over a snapshot of a table's pages.
///
/// Stops after yielding the first error.
pub struct Scan {
    store: Arc<dyn ObjectStore>,
    table: String,
    capacity: usize,
    arity: usize,
    pages: std::vec::IntoIter<PageId>,
    current: std::vec::IntoIter<Tuple>,
    failed: bool,
}

impl Iterator for Scan {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.current.next() {
                return Some(Ok(tuple));
            }
            if self.failed {
                return None;
            }
            let page_id = self.pages.next()?;
            let loaded = Page::load(
                self.store.as_ref(),
                &self.table,
                page_id,
                self.capacity,
                self.arity,
            );
            match loaded {
                Ok(page) => self.current = page.into_tuples().into_iter(),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ColumnDef;
    use crate::store::MemoryStore;
    use ordo_common::TypeId;

    fn students_schema() -> TableSchema {
        TableSchema::new(
            "students",
            "id",
            vec![
                ColumnDef::new("id", TypeId::Int),
                ColumnDef::new("name", TypeId::Text),
                ColumnDef::new("gpa", TypeId::Double),
            ],
        )
        .unwrap()
    }

    fn create_test_table(capacity: usize) -> (ClusteredTable, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let table = ClusteredTable::create(students_schema(), capacity, 4, store.clone()).unwrap();
        (table, store)
    }

    fn insert(table: &mut ClusteredTable, id: i64, name: &str) -> PageId {
        table
            .insert_row(&[
                ("id", Value::Int(id)),
                ("name", Value::from(name)),
                ("gpa", Value::Double(0.5)),
            ])
            .unwrap()
    }

    fn ids(table: &ClusteredTable) -> Vec<Vec<i64>> {
        table
            .pages()
            .unwrap()
            .iter()
            .map(|p| p.tuples().iter().filter_map(|t| t.key(0).as_int()).collect())
            .collect()
    }

    fn rows(table: &ClusteredTable) -> Vec<Tuple> {
        table.scan().map(|t| t.unwrap()).collect()
    }

    fn lookup_all(table: &ClusteredTable, keys: std::ops::Range<i64>) -> Vec<Option<Tuple>> {
        keys.map(|k| table.get_row(&Value::Int(k)).unwrap()).collect()
    }

    fn name_index() -> IndexBinding {
        IndexBinding {
            column: "name".to_string(),
            index_name: "nameIndex".to_string(),
        }
    }

    #[test]
    fn test_create_persists_metadata() {
        let (table, store) = create_test_table(3);
        assert_eq!(table.page_count(), 0);
        assert!(store.load("students", TABLE_META_OBJECT).unwrap().is_some());
        assert_eq!(table.scan().count(), 0);
    }

    #[test]
    fn test_append_fills_pages_in_order() {
        let (mut table, _store) = create_test_table(3);
        for id in 0..7 {
            insert(&mut table, id, "a");
        }
        assert_eq!(ids(&table), vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
        assert_eq!(table.page_ids(), vec![PageId(0), PageId(1), PageId(2)]);
        assert_eq!(table.row_count(), 7);
        table.verify().unwrap();
    }

    #[test]
    fn test_cascading_shift() {
        let (mut table, _store) = create_test_table(3);
        for id in [10, 20, 30, 40, 50, 60] {
            insert(&mut table, id, "a");
        }
        let page = insert(&mut table, 5, "a");
        assert_eq!(page, PageId(0));
        assert_eq!(ids(&table), vec![vec![5, 10, 20], vec![30, 40, 50], vec![60]]);

        insert(&mut table, 15, "a");
        assert_eq!(
            ids(&table),
            vec![vec![5, 10, 15], vec![20, 30, 40], vec![50, 60]]
        );
        table.verify().unwrap();
    }

    #[test]
    fn test_insert_into_gap_prefers_left_page_with_room() {
        let (mut table, _store) = create_test_table(3);
        for id in [1, 2, 3, 10, 11, 12] {
            insert(&mut table, id, "a");
        }
        table.delete_rows(&[("id", Value::Int(3))]).unwrap();
        insert(&mut table, 5, "a");
        assert_eq!(ids(&table), vec![vec![1, 2, 5], vec![10, 11, 12]]);
    }

    #[test]
    fn test_duplicate_keys_stay_stable() {
        let (mut table, _store) = create_test_table(2);
        insert(&mut table, 1, "first");
        insert(&mut table, 1, "second");
        insert(&mut table, 1, "third");
        let names: Vec<String> = table
            .scan()
            .map(|t| t.unwrap().get(1).unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        table.verify().unwrap();

        let row = table.get_row(&Value::Int(1)).unwrap().unwrap();
        assert_eq!(row.get(1), Some(&Value::from("first")));
    }

    #[test]
    fn test_index_follows_shifted_rows() {
        let (mut table, _store) = create_test_table(2);
        table.create_index(&name_index(), 4).unwrap();
        insert(&mut table, 10, "x");
        insert(&mut table, 20, "y");
        insert(&mut table, 30, "z");
        insert(&mut table, 5, "w");

        let index = table.index("name").unwrap();
        assert_eq!(index.pages_for(&Value::from("w")).unwrap(), vec![PageId(0)]);
        assert_eq!(index.pages_for(&Value::from("y")).unwrap(), vec![PageId(1)]);
        assert_eq!(index.pages_for(&Value::from("x")).unwrap(), vec![PageId(0)]);
        assert_eq!(index.pages_for(&Value::from("z")).unwrap(), vec![PageId(1)]);
        assert_eq!(ids(&table), vec![vec![5, 10], vec![20, 30]]);
        table.verify().unwrap();
    }

    #[test]
    fn test_update_row() {
        let (mut table, _store) = create_test_table(3);
        table.create_index(&name_index(), 4).unwrap();
        for id in 0..5 {
            insert(&mut table, id, "a");
        }
        table
            .update_row(&Value::Int(4), &[("name", Value::from("b")), ("gpa", Value::Double(3.0))])
            .unwrap();
        let row = table.get_row(&Value::Int(4)).unwrap().unwrap();
        assert_eq!(row.to_string(), "4,b,3");
        assert_eq!(
            table.index("name").unwrap().pages_for(&Value::from("b")).unwrap(),
            vec![PageId(1)]
        );
        table.verify().unwrap();
    }

    #[test]
    fn test_update_errors() {
        let (mut table, _store) = create_test_table(3);
        insert(&mut table, 1, "a");
        assert!(matches!(
            table.update_row(&Value::Int(2), &[("name", Value::from("b"))]),
            Err(OrdoError::RowNotFound(_))
        ));
        assert!(matches!(
            table.update_row(&Value::Int(1), &[("id", Value::Int(3))]),
            Err(OrdoError::ClusteringKeyImmutable(_))
        ));
        assert!(matches!(
            table.update_row(&Value::Int(1), &[("gpa", Value::from("high"))]),
            Err(OrdoError::TypeMismatch { .. })
        ));
        assert!(matches!(
            table.update_row(&Value::from("1"), &[("name", Value::from("b"))]),
            Err(OrdoError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_delete_by_clustering_key() {
        let (mut table, store) = create_test_table(3);
        for id in 0..4 {
            insert(&mut table, id, "a");
        }
        assert_eq!(table.delete_rows(&[("id", Value::Int(3))]).unwrap(), 1);
        assert_eq!(table.page_ids(), vec![PageId(0)]);
        assert!(store.load("students", "page-1").unwrap().is_none());
        assert_eq!(table.delete_rows(&[("id", Value::Int(3))]).unwrap(), 0);
        table.verify().unwrap();
    }

    #[test]
    fn test_delete_by_indexed_column_removes_pages() {
        let (mut table, _store) = create_test_table(3);
        table.create_index(&name_index(), 4).unwrap();
        for id in 0..9 {
            insert(&mut table, id, if id < 3 || id == 7 { "keep" } else { "drop" });
        }
        let deleted = table.delete_rows(&[("name", Value::from("drop"))]).unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(ids(&table), vec![vec![0, 1, 2], vec![7]]);
        assert!(table
            .index("name")
            .unwrap()
            .pages_for(&Value::from("drop"))
            .unwrap()
            .is_empty());
        table.verify().unwrap();
    }

    #[test]
    fn test_delete_with_unindexed_and_missing_values() {
        let (mut table, _store) = create_test_table(3);
        table.create_index(&name_index(), 4).unwrap();
        for id in 0..6 {
            insert(&mut table, id, "a");
        }
        let deleted = table
            .delete_rows(&[("name", Value::from("nobody")), ("gpa", Value::Double(0.5))])
            .unwrap();
        assert_eq!(deleted, 0);

        let deleted = table.delete_rows(&[("gpa", Value::Double(0.5))]).unwrap();
        assert_eq!(deleted, 6);
        assert_eq!(table.page_count(), 0);
        table.verify().unwrap();
    }

    #[test]
    fn test_create_index_over_existing_rows() {
        let (mut table, _store) = create_test_table(2);
        for id in 0..5 {
            insert(&mut table, id, if id % 2 == 0 { "even" } else { "odd" });
        }
        table.create_index(&name_index(), 4).unwrap();
        assert_eq!(
            table.index("name").unwrap().entry(&Value::from("even")).unwrap(),
            vec![PageId(0), PageId(1), PageId(2)]
        );
        assert!(matches!(
            table.create_index(&name_index(), 4),
            Err(OrdoError::IndexAlreadyExists { .. })
        ));
        table.verify().unwrap();
    }

    #[test]
    fn test_open_restores_state() {
        let (mut table, store) = create_test_table(3);
        table.create_index(&name_index(), 4).unwrap();
        for id in [5, 1, 9, 3, 7, 2] {
            insert(&mut table, id, "n");
        }
        let schema = table.schema().clone();
        let reopened = ClusteredTable::open(schema, store).unwrap();
        assert_eq!(reopened.page_ranges(), table.page_ranges());
        assert_eq!(
            reopened.index("name").unwrap().entries().unwrap(),
            table.index("name").unwrap().entries().unwrap()
        );
        reopened.verify().unwrap();
    }

    #[test]
    fn test_failed_cascade_leaves_table_untouched() {
        let (mut table, store) = create_test_table(2);
        table.create_index(&name_index(), 4).unwrap();
        for id in [10, 20, 30, 40] {
            insert(&mut table, id, "a");
        }
        let ranges = table.page_ranges().to_vec();
        let entries = table.index("name").unwrap().entries().unwrap();

        store.save("students", "page-1", b"garbage").unwrap();
        let err = table
            .insert_row(&[
                ("id", Value::Int(1)),
                ("name", Value::from("a")),
                ("gpa", Value::Double(0.1)),
            ])
            .unwrap_err();
        assert!(matches!(err, OrdoError::ObjectCorrupted { .. }));
        assert_eq!(table.page_ranges(), &ranges[..]);
        assert_eq!(table.index("name").unwrap().entries().unwrap(), entries);
        let first = table.load_page(PageId(0)).unwrap();
        assert_eq!(first.key_range(0), Some((Value::Int(10), Value::Int(20))));
    }

    #[test]
    fn test_clustering_index_agrees_with_page_ranges() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let (mut plain, _plain_store) = create_test_table(4);
        let (mut indexed, _indexed_store) = create_test_table(4);
        indexed
            .create_index(
                &IndexBinding {
                    column: "id".to_string(),
                    index_name: "idIndex".to_string(),
                },
                3,
            )
            .unwrap();

        // keys repeat and arrive out of order, so most inserts cascade
        let mut rng = StdRng::seed_from_u64(3);
        for i in 0..150 {
            let id = rng.gen_range(0..40);
            let name = format!("n{}", i);
            insert(&mut plain, id, &name);
            insert(&mut indexed, id, &name);
        }
        assert_eq!(rows(&plain), rows(&indexed));
        assert_eq!(lookup_all(&plain, -1..41), lookup_all(&indexed, -1..41));

        for k in (0..40).step_by(3) {
            let values = [("name", Value::from(format!("u{}", k)))];
            let a = plain.update_row(&Value::Int(k), &values);
            let b = indexed.update_row(&Value::Int(k), &values);
            assert_eq!(a.is_ok(), b.is_ok());
        }
        assert_eq!(rows(&plain), rows(&indexed));
        assert_eq!(lookup_all(&plain, -1..41), lookup_all(&indexed, -1..41));

        for k in (1..40).step_by(4) {
            let a = plain.delete_rows(&[("id", Value::Int(k))]).unwrap();
            let b = indexed.delete_rows(&[("id", Value::Int(k))]).unwrap();
            assert_eq!(a, b);
        }
        assert_eq!(rows(&plain), rows(&indexed));
        assert_eq!(lookup_all(&plain, -1..41), lookup_all(&indexed, -1..41));
        assert_eq!(plain.page_ranges(), indexed.page_ranges());
        plain.verify().unwrap();
        indexed.verify().unwrap();
    }

    #[test]
    fn test_wrong_shape_page_is_corruption() {
        let (mut table, store) = create_test_table(3);
        for id in [10, 20, 30] {
            insert(&mut table, id, "a");
        }
        // well-framed record whose tuples lack the name and gpa columns
        let bogus = Page::with_tuple(PageId(0), 3, Tuple::new(vec![Value::Int(15)]));
        store.save("students", "page-0", &bogus.to_record()).unwrap();

        let err = table
            .insert_row(&[
                ("id", Value::Int(15)),
                ("name", Value::from("a")),
                ("gpa", Value::Double(0.1)),
            ])
            .unwrap_err();
        assert!(matches!(err, OrdoError::ObjectCorrupted { .. }));
        assert!(matches!(
            table.get_row(&Value::Int(10)),
            Err(OrdoError::ObjectCorrupted { .. })
        ));
        assert!(table.scan().next().unwrap().is_err());
    }

    #[test]
    fn test_insert_type_checks() {
        let (mut table, _store) = create_test_table(3);
        let err = table
            .insert_row(&[("id", Value::Int(1)), ("name", Value::Int(2)), ("gpa", Value::Double(0.1))])
            .unwrap_err();
        assert!(matches!(err, OrdoError::TypeMismatch { .. }));
        assert_eq!(table.page_count(), 0);
    }
}
