//! Secondary index: column value to the pages holding that value.

use crate::btree::OrderedIndexTree;
use crate::catalog::IndexBinding;
use crate::store::{ObjectStore, WriteBatch};
use crate::tuple::Tuple;
use ordo_common::{OrdoError, PageId, Result, Value};

/// Store scope holding the nodes of the index on `table.column`.
pub fn index_scope(table: &str, column: &str) -> String {
    format!("{}/index/{}", table, column)
}

/// B+ tree mapping a column value to a sorted list of page ids.
///
/// The list holds one entry per tuple, so a page appears as many times as it
/// has tuples carrying the value. Removing a tuple drops exactly one entry,
/// and a page leaves the list only when its last matching tuple is gone.
#[derive(Debug, Clone)]
pub struct SecondaryIndex {
    table: String,
    column: String,
    name: String,
    column_position: usize,
    tree: OrderedIndexTree<Vec<PageId>>,
}

impl SecondaryIndex {
    /// Creates an empty index.
    pub fn new(
        table: &str,
        binding: &IndexBinding,
        column_position: usize,
        max_keys: usize,
    ) -> Self {
        Self {
            table: table.to_string(),
            column: binding.column.clone(),
            name: binding.index_name.clone(),
            column_position,
            tree: OrderedIndexTree::new(max_keys),
        }
    }

    /// Loads a previously flushed index.
    pub fn load(
        store: &dyn ObjectStore,
        table: &str,
        binding: &IndexBinding,
        column_position: usize,
    ) -> Result<Self> {
        let scope = index_scope(table, &binding.column);
        let tree = OrderedIndexTree::load(store, &scope)?.ok_or_else(|| {
            OrdoError::IndexNotFound(format!("{} on {}.{}", binding.index_name, table, binding.column))
        })?;
        Ok(Self {
            table: table.to_string(),
            column: binding.column.clone(),
            name: binding.index_name.clone(),
            column_position,
            tree,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Position of the indexed column inside tuples.
    pub fn column_position(&self) -> usize {
        self.column_position
    }

    pub fn scope(&self) -> String {
        index_scope(&self.table, &self.column)
    }

    pub fn tree(&self) -> &OrderedIndexTree<Vec<PageId>> {
        &self.tree
    }

    /// Indexed value of a tuple.
    pub fn key_of<'a>(&self, tuple: &'a Tuple) -> Result<&'a Value> {
        tuple.get(self.column_position).ok_or_else(|| {
            OrdoError::Internal(format!(
                "tuple of arity {} has no column {} for index {}",
                tuple.arity(),
                self.column_position,
                self.name
            ))
        })
    }

    /// Adds one entry for `page` under `value`.
    pub fn add_page(&mut self, value: &Value, page: PageId) -> Result<()> {
        let mut pages = self.tree.delete(value)?.unwrap_or_default();
        let pos = pages.partition_point(|p| *p <= page);
        pages.insert(pos, page);
        self.tree.insert(value.clone(), pages)?;
        Ok(())
    }

    /// Removes one entry for `page` under `value`, dropping the key once its
    /// list is empty. Returns false if no such entry existed.
    pub fn remove_page(&mut self, value: &Value, page: PageId) -> Result<bool> {
        let Some(mut pages) = self.tree.delete(value)? else {
            return Ok(false);
        };
        let removed = match pages.binary_search(&page) {
            Ok(pos) => {
                pages.remove(pos);
                true
            }
            Err(_) => false,
        };
        if !pages.is_empty() {
            self.tree.insert(value.clone(), pages)?;
        }
        Ok(removed)
    }

    /// Records that `tuple` now lives in `to` instead of `from`.
    pub fn move_tuple(&mut self, tuple: &Tuple, from: PageId, to: PageId) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let value = self.key_of(tuple)?.clone();
        self.remove_page(&value, from)?;
        self.add_page(&value, to)
    }

    /// Raw entry list under `value`, one page id per tuple.
    pub fn entry(&self, value: &Value) -> Result<Vec<PageId>> {
        Ok(self.tree.search(value)?.cloned().unwrap_or_default())
    }

    /// Distinct pages holding at least one tuple with `value`, ascending.
    pub fn pages_for(&self, value: &Value) -> Result<Vec<PageId>> {
        let mut pages = self.entry(value)?;
        pages.dedup();
        Ok(pages)
    }

    /// Every key with its entry list, ascending by key.
    pub fn entries(&self) -> Result<Vec<(Value, Vec<PageId>)>> {
        self.tree.entries()
    }

    /// Stages changed tree nodes into `batch`.
    pub fn flush_into(&mut self, batch: &mut WriteBatch) {
        let scope = self.scope();
        self.tree.flush_into(&scope, batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn create_test_index() -> SecondaryIndex {
        let binding = IndexBinding {
            column: "name".to_string(),
            index_name: "nameIndex".to_string(),
        };
        SecondaryIndex::new("students", &binding, 1, 4)
    }

    #[test]
    fn test_add_and_remove_pages() {
        let mut index = create_test_index();
        let a = Value::from("a");
        index.add_page(&a, PageId(2)).unwrap();
        index.add_page(&a, PageId(0)).unwrap();
        index.add_page(&a, PageId(2)).unwrap();
        assert_eq!(index.entry(&a).unwrap(), vec![PageId(0), PageId(2), PageId(2)]);
        assert_eq!(index.pages_for(&a).unwrap(), vec![PageId(0), PageId(2)]);

        assert!(index.remove_page(&a, PageId(2)).unwrap());
        assert_eq!(index.pages_for(&a).unwrap(), vec![PageId(0), PageId(2)]);
        assert!(index.remove_page(&a, PageId(2)).unwrap());
        assert!(!index.remove_page(&a, PageId(2)).unwrap());
        assert!(index.remove_page(&a, PageId(0)).unwrap());

        assert!(index.entry(&a).unwrap().is_empty());
        assert!(index.tree().is_empty());
        assert!(!index.remove_page(&Value::from("zz"), PageId(0)).unwrap());
    }

    #[test]
    fn test_move_tuple() {
        let mut index = create_test_index();
        let tuple = Tuple::new(vec![Value::Int(1), Value::from("b"), Value::Double(0.5)]);
        index.add_page(&Value::from("b"), PageId(0)).unwrap();
        index.move_tuple(&tuple, PageId(0), PageId(1)).unwrap();
        assert_eq!(index.entry(&Value::from("b")).unwrap(), vec![PageId(1)]);
    }

    #[test]
    fn test_flush_and_load() {
        let store = MemoryStore::new();
        let mut index = create_test_index();
        for i in 0..50 {
            index
                .add_page(&Value::Text(format!("n{:02}", i)), PageId(i / 10))
                .unwrap();
        }
        let mut batch = WriteBatch::new();
        index.flush_into(&mut batch);
        store.apply(batch).unwrap();
        assert!(!store.object_ids("students/index/name").is_empty());

        let binding = IndexBinding {
            column: "name".to_string(),
            index_name: "nameIndex".to_string(),
        };
        let loaded = SecondaryIndex::load(&store, "students", &binding, 1).unwrap();
        assert_eq!(loaded.entries().unwrap(), index.entries().unwrap());
        assert_eq!(loaded.pages_for(&Value::from("n42")).unwrap(), vec![PageId(4)]);
    }

    #[test]
    fn test_load_missing_index() {
        let store = MemoryStore::new();
        let binding = IndexBinding {
            column: "gpa".to_string(),
            index_name: "gpaIndex".to_string(),
        };
        assert!(matches!(
            SecondaryIndex::load(&store, "students", &binding, 2),
            Err(OrdoError::IndexNotFound(_))
        ));
    }
}
