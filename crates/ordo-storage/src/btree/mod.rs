//! Generic B+ tree used by secondary indexes.
//!
//! ```text
//!                 (k3 | k6)                inner: separators + children
//!               /     |     \
//!   [k1 k2] <-> [k3 k4 k5] <-> [k6 k7]    leaves: keys + values, doubly linked
//! ```
//!
//! Nodes hold between `max_keys / 2` and `max_keys` keys (the root may hold
//! fewer). Leaf splits copy the first key of the new right leaf into the
//! parent; inner splits move the median up. Deletes borrow from a sibling
//! when one can spare a key and merge otherwise, collapsing the root when it
//! is left with a single child.

mod node;
mod tree;

pub use node::{InnerNode, LeafNode, Node, NodeId, TreeValue};
pub use tree::{node_object_id, OrderedIndexTree, MIN_NODE_KEYS, TREE_META_OBJECT};
