//! OrdoDB engine.
//!
//! Ties the storage core to a metadata catalog file and exposes table
//! creation, indexing, row insert/update/delete and predicate selection
//! through [`Database`].

mod catalog;
mod database;

pub use catalog::{FileCatalog, INDEX_TYPE};
pub use database::Database;

pub use ordo_common::{OrdoError, PageId, Result, StorageConfig, TypeId, Value};
pub use ordo_storage::{
    ColumnDef, Combinator, CompareOp, Page, PageRange, Predicate, Selection, TableSchema, Tuple,
};
