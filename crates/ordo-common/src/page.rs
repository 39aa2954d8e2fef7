//! Page identifiers.

use serde::{Deserialize, Serialize};

/// Identifier of a heap page within a table.
///
/// Page numbers come from a per-table monotonic counter and are never
/// reused, so a page locator is the pair (table name, PageId).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Creates a new PageId.
    pub fn new(page_num: u32) -> Self {
        Self(page_num)
    }

    /// Returns the page number.
    pub fn page_num(&self) -> u32 {
        self.0
    }

    /// Returns the identifier that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the object id under which this page is stored.
    pub fn object_id(&self) -> String {
        format!("page-{}", self.0)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}", self.0)
    }
}
