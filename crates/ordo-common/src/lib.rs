//! OrdoDB common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all OrdoDB components.

pub mod config;
pub mod error;
pub mod page;
pub mod types;
pub mod value;

pub use config::StorageConfig;
pub use error::{OrdoError, Result};
pub use page::PageId;
pub use types::TypeId;
pub use value::Value;
