//! Configuration structures for OrdoDB.

use crate::error::{OrdoError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of tuples a heap page may hold.
pub const DEFAULT_MAX_ROWS_PER_PAGE: usize = 200;

/// Default maximum number of keys in a B+ tree node.
pub const DEFAULT_INDEX_NODE_KEYS: usize = 32;

/// Storage configuration for the database engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for table pages and index nodes.
    pub data_dir: PathBuf,
    /// Maximum number of tuples per heap page.
    pub max_rows_per_page: usize,
    /// Maximum number of keys per B+ tree node before it splits.
    pub index_node_keys: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
    /// Metadata catalog file name, relative to `data_dir`.
    pub catalog_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_rows_per_page: DEFAULT_MAX_ROWS_PER_PAGE,
            index_node_keys: DEFAULT_INDEX_NODE_KEYS,
            fsync_enabled: true,
            catalog_file: PathBuf::from("metadata.csv"),
        }
    }
}

impl StorageConfig {
    /// Loads a configuration from a JSON file. Absent fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: StorageConfig = serde_json::from_str(&text)
            .map_err(|e| OrdoError::ConfigError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks parameter bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows_per_page == 0 {
            return Err(OrdoError::InvalidParameter {
                name: "max_rows_per_page".to_string(),
                value: self.max_rows_per_page.to_string(),
            });
        }
        // a node must split into two halves that each keep at least one key
        if self.index_node_keys < 3 {
            return Err(OrdoError::InvalidParameter {
                name: "index_node_keys".to_string(),
                value: self.index_node_keys.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the absolute location of the metadata catalog file.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_rows_per_page, 200);
        assert_eq!(config.index_node_keys, 32);
        assert!(config.fsync_enabled);
        assert_eq!(config.catalog_path(), PathBuf::from("./data/metadata.csv"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let original = StorageConfig {
            max_rows_per_page: 8,
            ..Default::default()
        };
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(original.data_dir, deserialized.data_dir);
        assert_eq!(original.max_rows_per_page, deserialized.max_rows_per_page);
        assert_eq!(original.index_node_keys, deserialized.index_node_keys);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: StorageConfig = serde_json::from_str(r#"{"max_rows_per_page": 5}"#).unwrap();
        assert_eq!(config.max_rows_per_page, 5);
        assert_eq!(config.index_node_keys, DEFAULT_INDEX_NODE_KEYS);
        assert!(config.fsync_enabled);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ordo.json");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"max_rows_per_page": 3, "fsync_enabled": false}}"#).unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.max_rows_per_page, 3);
        assert!(!config.fsync_enabled);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ordo.json");
        std::fs::write(&path, "max_rows_per_page = 3").unwrap();

        let err = StorageConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, OrdoError::ConfigError(_)));
    }

    #[test]
    fn test_validate_bounds() {
        let config = StorageConfig {
            max_rows_per_page: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OrdoError::InvalidParameter { .. })
        ));

        let config = StorageConfig {
            index_node_keys: 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
