//! Column type identifiers.

use crate::error::{OrdoError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier for all supported column types.
///
/// Type IDs are stored in encoded values and catalog metadata
/// to identify the type of each column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    /// 64-bit signed integer.
    Int = 1,
    /// 64-bit IEEE float.
    Double = 2,
    /// UTF-8 text.
    Text = 3,
}

impl TypeId {
    /// Returns the canonical catalog tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeId::Int => "INT",
            TypeId::Double => "DOUBLE",
            TypeId::Text => "TEXT",
        }
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, TypeId::Int | TypeId::Double)
    }
}

impl TryFrom<u8> for TypeId {
    type Error = OrdoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(TypeId::Int),
            2 => Ok(TypeId::Double),
            3 => Ok(TypeId::Text),
            _ => Err(OrdoError::UnsupportedType(format!("type tag {}", value))),
        }
    }
}

impl FromStr for TypeId {
    type Err = OrdoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "BIGINT" => Ok(TypeId::Int),
            "DOUBLE" | "FLOAT" | "REAL" => Ok(TypeId::Double),
            "TEXT" | "VARCHAR" | "STRING" => Ok(TypeId::Text),
            _ => Err(OrdoError::UnsupportedType(s.to_string())),
        }
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
