//! Storage core for OrdoDB.
//!
//! This crate provides:
//! - Framed binary records and a durable object store (disk or memory)
//! - Tuples and capacity-bounded heap pages
//! - A generic B+ tree and the secondary indexes built on it
//! - Clustered tables that keep rows sorted by clustering key across pages
//! - Predicate evaluation for selections
//! - The metadata catalog interface

pub mod btree;
pub mod catalog;
pub mod codec;
pub mod index;
pub mod page;
pub mod predicate;
pub mod store;
pub mod table;
pub mod tuple;

pub use btree::{OrderedIndexTree, TreeValue};
pub use catalog::{check_name, Catalog, ColumnDef, IndexBinding, MemoryCatalog, TableSchema};
pub use index::{index_scope, SecondaryIndex};
pub use page::Page;
pub use predicate::{combine, CompareOp, Combinator, Predicate, PredicateEvaluator, Selection};
pub use store::{DiskStore, DiskStoreConfig, MemoryStore, ObjectStore, WriteBatch};
pub use table::{ClusteredTable, PageRange, Scan};
pub use tuple::Tuple;
