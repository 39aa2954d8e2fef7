//! Database facade: table lifecycle and row operations.

use crate::catalog::FileCatalog;
use ordo_common::{OrdoError, PageId, Result, StorageConfig, Value};
use ordo_storage::{
    Catalog, ClusteredTable, ColumnDef, Combinator, DiskStore, DiskStoreConfig, IndexBinding,
    MemoryCatalog, MemoryStore, ObjectStore, Page, PageRange, Predicate, Selection, TableSchema,
    Tuple,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A loaded table, or None when it must be reopened from the store.
type TableSlot = Arc<Mutex<Option<ClusteredTable>>>;

/// Entry point for creating tables and reading and writing rows.
///
/// Every call on a table holds that table's lock for its whole duration.
/// A call that fails drops the loaded table so the next call reopens it
/// from the store.
pub struct Database {
    config: StorageConfig,
    store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn Catalog>,
    tables: Mutex<HashMap<String, TableSlot>>,
}

impl Database {
    /// Opens a database on disk under `config.data_dir`.
    pub fn open(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let store = DiskStore::new(DiskStoreConfig {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        })?;
        let catalog = FileCatalog::open(config.catalog_path(), config.fsync_enabled)?;
        info!(data_dir = %config.data_dir.display(), "opened database");
        Self::with_parts(config, Arc::new(store), Arc::new(catalog))
    }

    /// Creates a database that keeps everything in memory.
    pub fn in_memory(config: StorageConfig) -> Result<Self> {
        Self::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCatalog::new()),
        )
    }

    /// Assembles a database from an explicit store and catalog.
    pub fn with_parts(
        config: StorageConfig,
        store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            catalog,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        self.catalog.table_names()
    }

    /// Schema of a table as recorded in the catalog.
    pub fn schema(&self, table: &str) -> Result<TableSchema> {
        self.catalog
            .load_schema(table)?
            .ok_or_else(|| OrdoError::TableNotFound(table.to_string()))
    }

    /// Creates an empty table clustered on `clustering_key`.
    pub fn create_table(
        &self,
        name: &str,
        clustering_key: &str,
        columns: &[ColumnDef],
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.contains_key(name) || self.catalog.load_schema(name)?.is_some() {
            return Err(OrdoError::TableAlreadyExists(name.to_string()));
        }
        let schema = TableSchema::new(name, clustering_key, columns.to_vec())?;
        let table = ClusteredTable::create(
            schema,
            self.config.max_rows_per_page,
            self.config.index_node_keys,
            Arc::clone(&self.store),
        )?;
        self.catalog.save_table_schema(name, clustering_key, columns)?;
        tables.insert(name.to_string(), Arc::new(Mutex::new(Some(table))));
        info!(table = name, clustering_key, columns = columns.len(), "created table");
        Ok(())
    }

    /// Creates a B+ tree index on a column, filled from the existing rows.
    pub fn create_index(&self, table: &str, column: &str, index_name: &str) -> Result<()> {
        let binding = IndexBinding {
            column: column.to_string(),
            index_name: index_name.to_string(),
        };
        let node_keys = self.config.index_node_keys;
        self.with_table(table, |t| t.create_index(&binding, node_keys))?;
        if let Err(e) = self.catalog.record_index_binding(table, column, index_name) {
            // the loaded table already carries the index; reload it from the catalog
            self.tables.lock().remove(table);
            return Err(e);
        }
        info!(table, column, index = index_name, "recorded index");
        Ok(())
    }

    /// Inserts a row given as named column values; every column is required.
    pub fn insert_row(&self, table: &str, values: &[(&str, Value)]) -> Result<PageId> {
        self.with_table(table, |t| t.insert_row(values))
    }

    /// Updates the row with clustering key `key`.
    pub fn update_row(&self, table: &str, key: &Value, values: &[(&str, Value)]) -> Result<()> {
        self.with_table(table, |t| t.update_row(key, values))
    }

    /// Deletes every row equal to all the given column values.
    pub fn delete_row(&self, table: &str, conditions: &[(&str, Value)]) -> Result<usize> {
        self.with_table(table, |t| t.delete_rows(conditions))
    }

    /// Looks up the row with clustering key `key`.
    pub fn get_row(&self, table: &str, key: &Value) -> Result<Option<Tuple>> {
        self.with_table(table, |t| t.get_row(key))
    }

    /// Streams the rows matching `predicates` joined by `combinators`.
    ///
    /// All predicates must name the same table. The stream reads pages as
    /// it goes and sees the page list as it was when the call was made.
    pub fn select(&self, predicates: &[Predicate], combinators: &[Combinator]) -> Result<Selection> {
        let Some(first) = predicates.first() else {
            return Ok(Selection::empty());
        };
        self.with_table(&first.table, |t| Selection::new(t, predicates, combinators))
    }

    /// Every page of a table in clustering-key order.
    pub fn pages(&self, table: &str) -> Result<Vec<Page>> {
        self.with_table(table, |t| t.pages())
    }

    /// Page ids of a table with their cached key ranges.
    pub fn page_ranges(&self, table: &str) -> Result<Vec<(PageId, PageRange)>> {
        self.with_table(table, |t| Ok(t.page_ranges().to_vec()))
    }

    /// Ordered key to page-list entries of the index on `table.column`.
    pub fn index_entries(&self, table: &str, column: &str) -> Result<Vec<(Value, Vec<PageId>)>> {
        self.with_table(table, |t| {
            t.index(column)
                .ok_or_else(|| OrdoError::IndexNotFound(format!("{}.{}", table, column)))?
                .entries()
        })
    }

    /// Level-order rendering of the index tree on `table.column`.
    pub fn index_dump(&self, table: &str, column: &str) -> Result<String> {
        self.with_table(table, |t| {
            t.index(column)
                .ok_or_else(|| OrdoError::IndexNotFound(format!("{}.{}", table, column)))?
                .tree()
                .dump()
        })
    }

    /// Checks the invariants of a table and its indexes.
    pub fn verify_table(&self, table: &str) -> Result<()> {
        self.with_table(table, |t| t.verify())
    }

    fn slot(&self, name: &str) -> Result<TableSlot> {
        let mut tables = self.tables.lock();
        if let Some(slot) = tables.get(name) {
            return Ok(Arc::clone(slot));
        }
        if self.catalog.load_schema(name)?.is_none() {
            return Err(OrdoError::TableNotFound(name.to_string()));
        }
        let slot: TableSlot = Arc::new(Mutex::new(None));
        tables.insert(name.to_string(), Arc::clone(&slot));
        Ok(slot)
    }

    fn with_table<T, F>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut ClusteredTable) -> Result<T>,
    {
        let slot = self.slot(name)?;
        let mut guard = slot.lock();
        if guard.is_none() {
            let schema = self.schema(name)?;
            *guard = Some(ClusteredTable::open(schema, Arc::clone(&self.store))?);
        }
        let Some(table) = guard.as_mut() else {
            return Err(OrdoError::Internal(format!("table {} failed to load", name)));
        };

        let result = f(table);
        if let Err(e) = &result {
            warn!(table = name, error = %e, "table operation failed, reloading on next use");
            *guard = None;
        }
        result
    }
}
