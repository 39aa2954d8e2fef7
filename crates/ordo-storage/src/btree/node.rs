//! B+ tree node representation and encoding.
//!
//! Node record payload:
//! ```text
//! +-------------------+
//! | node_type: u8     |  0 = inner, 1 = leaf
//! | key_count: u32    |
//! | keys...           |  tagged values
//! +-------------------+
//! inner:                leaf:
//! | child_count: u32  | | prev_leaf: u32    |  u32::MAX = none
//! | children: u32 * n | | next_leaf: u32    |
//! +-------------------+ | values...         |
//!                       +-------------------+
//! ```

use crate::codec::{put_value, seal, unseal, Decoder, RecordKind};
use bytes::{BufMut, Bytes, BytesMut};
use ordo_common::{OrdoError, PageId, Result, Value};

/// Index of a node in the tree arena; also its object id suffix in the store.
pub type NodeId = u32;

/// Encoded form of an absent sibling link.
const NO_NODE: u32 = u32::MAX;

/// A value that can be associated with a key in an [`OrderedIndexTree`].
///
/// [`OrderedIndexTree`]: super::OrderedIndexTree
pub trait TreeValue: Clone + std::fmt::Debug {
    /// Appends the encoded value.
    fn encode(&self, buf: &mut BytesMut);

    /// Reads one value.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self>;
}

impl TreeValue for PageId {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.page_num());
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(PageId::new(dec.u32()?))
    }
}

/// Ordered list of page locators; the payload of a secondary index entry.
impl TreeValue for Vec<PageId> {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        for page_id in self {
            buf.put_u32_le(page_id.page_num());
        }
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        let count = dec.u32()? as usize;
        let mut pages = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            pages.push(PageId::new(dec.u32()?));
        }
        Ok(pages)
    }
}

impl TreeValue for Value {
    fn encode(&self, buf: &mut BytesMut) {
        put_value(buf, self);
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.value()
    }
}

/// Inner node: separator keys and child pointers.
///
/// Child `i` holds keys `k` with `keys[i-1] <= k < keys[i]`.
#[derive(Debug, Clone, Default)]
pub struct InnerNode {
    pub keys: Vec<Value>,
    pub children: Vec<NodeId>,
}

impl InnerNode {
    /// Index of the child whose subtree covers `key`.
    pub fn child_index(&self, key: &Value) -> usize {
        self.keys.partition_point(|k| k <= key)
    }
}

/// Leaf node: keys with values, linked to its neighbours.
#[derive(Debug, Clone)]
pub struct LeafNode<V> {
    pub keys: Vec<Value>,
    pub values: Vec<V>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl<V> Default for LeafNode<V> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            prev: None,
            next: None,
        }
    }
}

/// A B+ tree node.
#[derive(Debug, Clone)]
pub enum Node<V> {
    Inner(InnerNode),
    Leaf(LeafNode<V>),
}

impl<V: TreeValue> Node<V> {
    /// Number of keys held by this node.
    pub fn key_count(&self) -> usize {
        match self {
            Node::Inner(inner) => inner.keys.len(),
            Node::Leaf(leaf) => leaf.keys.len(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Serializes the node into a framed record.
    pub fn to_record(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Node::Inner(inner) => {
                buf.put_u8(0);
                buf.put_u32_le(inner.keys.len() as u32);
                for key in &inner.keys {
                    put_value(&mut buf, key);
                }
                buf.put_u32_le(inner.children.len() as u32);
                for child in &inner.children {
                    buf.put_u32_le(*child);
                }
            }
            Node::Leaf(leaf) => {
                buf.put_u8(1);
                buf.put_u32_le(leaf.keys.len() as u32);
                for key in &leaf.keys {
                    put_value(&mut buf, key);
                }
                buf.put_u32_le(leaf.prev.unwrap_or(NO_NODE));
                buf.put_u32_le(leaf.next.unwrap_or(NO_NODE));
                for value in &leaf.values {
                    value.encode(&mut buf);
                }
            }
        }
        seal(RecordKind::TreeNode, &buf)
    }

    /// Deserializes a node record.
    pub fn from_record(object: &str, data: &[u8]) -> Result<Self> {
        let payload = unseal(object, RecordKind::TreeNode, data)?;
        let mut dec = Decoder::new(object, payload);
        let node_type = dec.u8()?;
        let key_count = dec.u32()? as usize;
        let mut keys = Vec::with_capacity(key_count.min(1024));
        for _ in 0..key_count {
            keys.push(dec.value()?);
        }

        let node = match node_type {
            0 => {
                let child_count = dec.u32()? as usize;
                if child_count != key_count + 1 {
                    return Err(OrdoError::corrupted(
                        object,
                        format!("{} keys with {} children", key_count, child_count),
                    ));
                }
                let mut children = Vec::with_capacity(child_count);
                for _ in 0..child_count {
                    children.push(dec.u32()?);
                }
                Node::Inner(InnerNode { keys, children })
            }
            1 => {
                let prev = decode_link(dec.u32()?);
                let next = decode_link(dec.u32()?);
                let mut values = Vec::with_capacity(key_count);
                for _ in 0..key_count {
                    values.push(V::decode(&mut dec)?);
                }
                Node::Leaf(LeafNode {
                    keys,
                    values,
                    prev,
                    next,
                })
            }
            other => {
                return Err(OrdoError::corrupted(
                    object,
                    format!("invalid node type: {}", other),
                ))
            }
        };
        dec.finish()?;
        Ok(node)
    }
}

fn decode_link(raw: u32) -> Option<NodeId> {
    if raw == NO_NODE {
        None
    } else {
        Some(raw)
    }
}
