//! Table schemas and the metadata catalog interface.

use crate::tuple::Tuple;
use ordo_common::{OrdoError, Result, TypeId, Value};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Word reserved by the catalog for absent fields.
pub const RESERVED_NAME: &str = "null";

/// Checks a table, column or index name.
///
/// Names become store scopes and directory names, so path separators, the
/// `.` and `..` segments and control characters are rejected, along with
/// the empty name and [`RESERVED_NAME`].
pub fn check_name(kind: &str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name == RESERVED_NAME
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(OrdoError::InvalidParameter {
            name: kind.to_string(),
            value: name.to_string(),
        });
    }
    Ok(())
}

/// A column of a table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub type_id: TypeId,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
        }
    }
}

/// A named secondary index on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBinding {
    pub column: String,
    pub index_name: String,
}

/// Ordered schema of a table.
///
/// Column order is fixed at creation and defines the position of every value
/// inside a [`Tuple`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    clustering_key: String,
    clustering_position: usize,
    columns: Vec<ColumnDef>,
    indexes: Vec<IndexBinding>,
}

impl TableSchema {
    /// Builds a schema, checking every name, that the clustering key is one
    /// of the columns and that column names are unique.
    pub fn new(
        name: impl Into<String>,
        clustering_key: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> Result<Self> {
        let name = name.into();
        let clustering_key = clustering_key.into();
        check_name("table", &name)?;
        if columns.is_empty() {
            return Err(OrdoError::InvalidParameter {
                name: format!("{}.columns", name),
                value: "[]".to_string(),
            });
        }
        for (i, column) in columns.iter().enumerate() {
            check_name("column", &column.name)?;
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(OrdoError::InvalidParameter {
                    name: format!("{}.columns", name),
                    value: format!("duplicate column {}", column.name),
                });
            }
        }
        let clustering_position = columns
            .iter()
            .position(|c| c.name == clustering_key)
            .ok_or_else(|| OrdoError::ColumnNotFound(format!("{}.{}", name, clustering_key)))?;

        Ok(Self {
            name,
            clustering_key,
            clustering_position,
            columns,
            indexes: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clustering_key(&self) -> &str {
        &self.clustering_key
    }

    /// Position of the clustering key inside tuples.
    pub fn clustering_position(&self) -> usize {
        self.clustering_position
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn indexes(&self) -> &[IndexBinding] {
        &self.indexes
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column inside tuples.
    pub fn column_position(&self, column: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| OrdoError::ColumnNotFound(format!("{}.{}", self.name, column)))
    }

    /// Resolves a column and checks that `value` has its declared type.
    /// Returns the column position.
    pub fn check_value(&self, column: &str, value: &Value) -> Result<usize> {
        let pos = self.column_position(column)?;
        let expected = self.columns[pos].type_id;
        if value.type_id() != expected {
            return Err(OrdoError::TypeMismatch {
                column: format!("{}.{}", self.name, column),
                expected: expected.to_string(),
                actual: value.type_id().to_string(),
            });
        }
        Ok(pos)
    }

    /// Index bound to `column`, if any.
    pub fn index_on(&self, column: &str) -> Option<&IndexBinding> {
        self.indexes.iter().find(|b| b.column == column)
    }

    /// Records an index binding. Fails if the column is unknown or already
    /// indexed.
    pub fn add_index(&mut self, column: &str, index_name: &str) -> Result<()> {
        check_name("index", index_name)?;
        self.column_position(column)?;
        if self.index_on(column).is_some() {
            return Err(OrdoError::IndexAlreadyExists {
                table: self.name.clone(),
                column: column.to_string(),
            });
        }
        self.indexes.push(IndexBinding {
            column: column.to_string(),
            index_name: index_name.to_string(),
        });
        Ok(())
    }

    /// Builds a tuple in schema order from named values.
    ///
    /// Every column needs exactly one value of its declared type; names
    /// outside the schema are rejected.
    pub fn build_tuple(&self, values: &[(&str, Value)]) -> Result<Tuple> {
        let mut slots: Vec<Option<Value>> = vec![None; self.columns.len()];
        for (column, value) in values {
            let pos = self.check_value(column, value)?;
            slots[pos] = Some(value.clone());
        }
        let values = slots
            .into_iter()
            .zip(&self.columns)
            .map(|(slot, column)| {
                slot.ok_or_else(|| {
                    OrdoError::MissingColumn(format!("{}.{}", self.name, column.name))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Tuple::new(values))
    }
}

/// Metadata catalog consumed by the storage core.
pub trait Catalog: Send + Sync {
    /// Ordered column names and types of a table.
    fn load_column_types(&self, table: &str) -> Result<Vec<ColumnDef>>;

    /// Full schema of a table, or None if the table is unknown.
    fn load_schema(&self, table: &str) -> Result<Option<TableSchema>>;

    /// Names of every known table.
    fn table_names(&self) -> Result<Vec<String>>;

    /// Persists a new table schema.
    fn save_table_schema(
        &self,
        table: &str,
        clustering_key: &str,
        columns: &[ColumnDef],
    ) -> Result<()>;

    /// Persists an index binding on an existing table column.
    fn record_index_binding(&self, table: &str, column: &str, index_name: &str) -> Result<()>;
}

/// Catalog kept in memory.
#[derive(Default)]
pub struct MemoryCatalog {
    tables: Mutex<HashMap<String, TableSchema>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Catalog for MemoryCatalog {
    fn load_column_types(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.tables
            .lock()
            .get(table)
            .map(|s| s.columns().to_vec())
            .ok_or_else(|| OrdoError::TableNotFound(table.to_string()))
    }

    fn load_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        Ok(self.tables.lock().get(table).cloned())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn save_table_schema(
        &self,
        table: &str,
        clustering_key: &str,
        columns: &[ColumnDef],
    ) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.contains_key(table) {
            return Err(OrdoError::TableAlreadyExists(table.to_string()));
        }
        let schema = TableSchema::new(table, clustering_key, columns.to_vec())?;
        tables.insert(table.to_string(), schema);
        Ok(())
    }

    fn record_index_binding(&self, table: &str, column: &str, index_name: &str) -> Result<()> {
        self.tables
            .lock()
            .get_mut(table)
            .ok_or_else(|| OrdoError::TableNotFound(table.to_string()))?
            .add_index(column, index_name)
    }
}
