//! Arena-backed B+ tree keyed by [`Value`].
//!
//! Nodes live in a slot arena and refer to each other by [`NodeId`]. Leaves
//! are doubly linked so ordered walks never revisit inner nodes. Every
//! mutation records the touched node ids; [`OrderedIndexTree::flush_into`]
//! stages exactly those nodes (plus the tree metadata) into a write batch.

use super::node::{InnerNode, LeafNode, Node, NodeId, TreeValue};
use crate::codec::{seal, unseal, Decoder, RecordKind};
use crate::store::{ObjectStore, WriteBatch};
use bytes::{BufMut, Bytes, BytesMut};
use ordo_common::{OrdoError, Result, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Object id of the tree metadata record within the tree's scope.
pub const TREE_META_OBJECT: &str = "tree.meta";

/// Smallest accepted node fan-out.
pub const MIN_NODE_KEYS: usize = 3;

/// Object id of a node record.
pub fn node_object_id(id: NodeId) -> String {
    format!("node-{}", id)
}

fn missing_node(id: NodeId) -> OrdoError {
    OrdoError::Internal(format!("index node {} missing from arena", id))
}

fn wrong_kind(id: NodeId, expected: &str) -> OrdoError {
    OrdoError::Internal(format!("index node {} is not {} node", id, expected))
}

/// Ordered map from [`Value`] keys to `V`, with unique keys.
#[derive(Debug, Clone)]
pub struct OrderedIndexTree<V> {
    nodes: Vec<Option<Node<V>>>,
    free: Vec<NodeId>,
    root: NodeId,
    height: u32,
    len: usize,
    max_keys: usize,
    dirty: BTreeSet<NodeId>,
    removed: BTreeSet<NodeId>,
    meta_dirty: bool,
}

impl<V: TreeValue> OrderedIndexTree<V> {
    /// Creates an empty tree whose nodes hold at most `max_keys` keys.
    /// Values below [`MIN_NODE_KEYS`] are raised to it.
    pub fn new(max_keys: usize) -> Self {
        let mut dirty = BTreeSet::new();
        dirty.insert(0);
        Self {
            nodes: vec![Some(Node::Leaf(LeafNode::default()))],
            free: Vec::new(),
            root: 0,
            height: 1,
            len: 0,
            max_keys: max_keys.max(MIN_NODE_KEYS),
            dirty,
            removed: BTreeSet::new(),
            meta_dirty: true,
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; a lone leaf root has height 1.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    fn min_keys(&self) -> usize {
        self.max_keys / 2
    }

    /// Returns true if mutations have not been flushed yet.
    pub fn is_dirty(&self) -> bool {
        self.meta_dirty || !self.dirty.is_empty() || !self.removed.is_empty()
    }

    // ---- arena ----

    fn node(&self, id: NodeId) -> Result<&Node<V>> {
        self.nodes
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| missing_node(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node<V>> {
        self.dirty.insert(id);
        self.nodes
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| missing_node(id))
    }

    fn leaf(&self, id: NodeId) -> Result<&LeafNode<V>> {
        match self.node(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => Err(wrong_kind(id, "a leaf")),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafNode<V>> {
        match self.node_mut(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Inner(_) => Err(wrong_kind(id, "a leaf")),
        }
    }

    fn inner(&self, id: NodeId) -> Result<&InnerNode> {
        match self.node(id)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => Err(wrong_kind(id, "an inner")),
        }
    }

    fn inner_mut(&mut self, id: NodeId) -> Result<&mut InnerNode> {
        match self.node_mut(id)? {
            Node::Inner(inner) => Ok(inner),
            Node::Leaf(_) => Err(wrong_kind(id, "an inner")),
        }
    }

    /// Moves a node out of its slot so two nodes can be edited at once.
    fn take(&mut self, id: NodeId) -> Result<Node<V>> {
        self.nodes
            .get_mut(id as usize)
            .and_then(Option::take)
            .ok_or_else(|| missing_node(id))
    }

    fn put(&mut self, id: NodeId, node: Node<V>) {
        if let Some(slot) = self.nodes.get_mut(id as usize) {
            *slot = Some(node);
            self.dirty.insert(id);
        }
    }

    fn alloc(&mut self, node: Node<V>) -> NodeId {
        self.meta_dirty = true;
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id as usize] = Some(node);
                self.removed.remove(&id);
                id
            }
            None => {
                self.nodes.push(Some(node));
                (self.nodes.len() - 1) as NodeId
            }
        };
        self.dirty.insert(id);
        id
    }

    fn release(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id as usize) {
            *slot = None;
        }
        self.dirty.remove(&id);
        self.removed.insert(id);
        self.free.push(id);
        self.meta_dirty = true;
    }

    // ---- lookup ----

    /// Descends to the leaf covering `key`, recording `(inner node, child
    /// index)` for every level passed.
    fn find_leaf(&self, key: &Value) -> Result<(NodeId, Vec<(NodeId, usize)>)> {
        let mut path = Vec::with_capacity(self.height as usize);
        let mut id = self.root;
        loop {
            match self.node(id)? {
                Node::Leaf(_) => return Ok((id, path)),
                Node::Inner(inner) => {
                    let idx = inner.child_index(key);
                    let child = *inner.children.get(idx).ok_or_else(|| missing_node(id))?;
                    path.push((id, idx));
                    id = child;
                }
            }
        }
    }

    fn edge_leaf(&self, leftmost: bool) -> Result<NodeId> {
        let mut id = self.root;
        loop {
            match self.node(id)? {
                Node::Leaf(_) => return Ok(id),
                Node::Inner(inner) => {
                    let child = if leftmost {
                        inner.children.first()
                    } else {
                        inner.children.last()
                    };
                    id = *child.ok_or_else(|| missing_node(id))?;
                }
            }
        }
    }

    /// Returns the value stored under `key`.
    pub fn search(&self, key: &Value) -> Result<Option<&V>> {
        let (leaf_id, _) = self.find_leaf(key)?;
        let leaf = self.leaf(leaf_id)?;
        Ok(leaf.keys.binary_search(key).ok().map(|i| &leaf.values[i]))
    }

    pub fn contains_key(&self, key: &Value) -> Result<bool> {
        Ok(self.search(key)?.is_some())
    }

    /// Smallest key.
    pub fn first_key(&self) -> Result<Option<Value>> {
        let leaf = self.leaf(self.edge_leaf(true)?)?;
        Ok(leaf.keys.first().cloned())
    }

    /// Largest key.
    pub fn last_key(&self) -> Result<Option<Value>> {
        let leaf = self.leaf(self.edge_leaf(false)?)?;
        Ok(leaf.keys.last().cloned())
    }

    /// Entries with keys strictly less than `pivot`, ascending.
    ///
    /// Walks the leaf chain leftwards from the leaf that would hold `pivot`.
    pub fn less_than(&self, pivot: &Value) -> Result<Vec<(Value, V)>> {
        let (mut leaf_id, _) = self.find_leaf(pivot)?;
        let mut out = Vec::new();
        loop {
            let leaf = self.leaf(leaf_id)?;
            for (key, value) in leaf.keys.iter().zip(&leaf.values).rev() {
                if key < pivot {
                    out.push((key.clone(), value.clone()));
                }
            }
            match leaf.prev {
                Some(prev) => leaf_id = prev,
                None => break,
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Entries with keys strictly greater than `pivot`, ascending.
    ///
    /// Walks the leaf chain rightwards from the leaf that would hold `pivot`.
    pub fn greater_than(&self, pivot: &Value) -> Result<Vec<(Value, V)>> {
        let (leaf_id, _) = self.find_leaf(pivot)?;
        self.collect_from(Some(leaf_id), |key| key > pivot)
    }

    /// All entries, ascending.
    pub fn entries(&self) -> Result<Vec<(Value, V)>> {
        self.collect_from(Some(self.edge_leaf(true)?), |_| true)
    }

    fn collect_from<F>(&self, mut leaf_id: Option<NodeId>, keep: F) -> Result<Vec<(Value, V)>>
    where
        F: Fn(&Value) -> bool,
    {
        let mut out = Vec::new();
        while let Some(id) = leaf_id {
            let leaf = self.leaf(id)?;
            for (key, value) in leaf.keys.iter().zip(&leaf.values) {
                if keep(key) {
                    out.push((key.clone(), value.clone()));
                }
            }
            leaf_id = leaf.next;
        }
        Ok(out)
    }

    // ---- insert ----

    /// Inserts or replaces the value under `key`, returning the previous value.
    pub fn insert(&mut self, key: Value, value: V) -> Result<Option<V>> {
        let (leaf_id, path) = self.find_leaf(&key)?;
        let max_keys = self.max_keys;
        let leaf = self.leaf_mut(leaf_id)?;
        match leaf.keys.binary_search(&key) {
            Ok(pos) => return Ok(Some(std::mem::replace(&mut leaf.values[pos], value))),
            Err(pos) => {
                leaf.keys.insert(pos, key);
                leaf.values.insert(pos, value);
            }
        }
        let overflow = leaf.keys.len() > max_keys;
        self.len += 1;
        self.meta_dirty = true;

        if overflow {
            self.split_leaf(leaf_id, path)?;
        }
        Ok(None)
    }

    fn split_leaf(&mut self, leaf_id: NodeId, path: Vec<(NodeId, usize)>) -> Result<()> {
        let right = {
            let leaf = self.leaf_mut(leaf_id)?;
            let mid = leaf.keys.len() / 2;
            LeafNode {
                keys: leaf.keys.split_off(mid),
                values: leaf.values.split_off(mid),
                prev: Some(leaf_id),
                next: leaf.next,
            }
        };
        let separator = right.keys[0].clone();
        let old_next = right.next;

        let right_id = self.alloc(Node::Leaf(right));
        self.leaf_mut(leaf_id)?.next = Some(right_id);
        if let Some(next_id) = old_next {
            self.leaf_mut(next_id)?.prev = Some(right_id);
        }
        debug!(left = leaf_id, right = right_id, separator = %separator, "split index leaf");

        self.insert_into_parent(path, separator, right_id)
    }

    /// Hooks a freshly split right node into its parent, splitting inner
    /// nodes upward as needed and growing a new root at the top.
    fn insert_into_parent(
        &mut self,
        mut path: Vec<(NodeId, usize)>,
        mut separator: Value,
        mut right_id: NodeId,
    ) -> Result<()> {
        let max_keys = self.max_keys;
        loop {
            let Some((parent_id, child_idx)) = path.pop() else {
                let old_root = self.root;
                self.root = self.alloc(Node::Inner(InnerNode {
                    keys: vec![separator],
                    children: vec![old_root, right_id],
                }));
                self.height += 1;
                debug!(root = self.root, height = self.height, "index tree grew a level");
                return Ok(());
            };

            let parent = self.inner_mut(parent_id)?;
            parent.keys.insert(child_idx, separator);
            parent.children.insert(child_idx + 1, right_id);
            if parent.keys.len() <= max_keys {
                return Ok(());
            }

            let mid = parent.keys.len() / 2;
            let right_keys = parent.keys.split_off(mid + 1);
            let right_children = parent.children.split_off(mid + 1);
            let promoted = parent
                .keys
                .pop()
                .ok_or_else(|| OrdoError::Internal("split of empty inner node".to_string()))?;

            let new_id = self.alloc(Node::Inner(InnerNode {
                keys: right_keys,
                children: right_children,
            }));
            debug!(left = parent_id, right = new_id, separator = %promoted, "split index inner node");
            separator = promoted;
            right_id = new_id;
        }
    }

    // ---- delete ----

    /// Removes `key`, returning its value.
    pub fn delete(&mut self, key: &Value) -> Result<Option<V>> {
        let (leaf_id, path) = self.find_leaf(key)?;
        let pos = match self.leaf(leaf_id)?.keys.binary_search(key) {
            Ok(pos) => pos,
            Err(_) => return Ok(None),
        };

        let min_keys = self.min_keys();
        let leaf = self.leaf_mut(leaf_id)?;
        leaf.keys.remove(pos);
        let value = leaf.values.remove(pos);
        let underflow = leaf.keys.len() < min_keys;
        self.len -= 1;
        self.meta_dirty = true;

        if underflow && !path.is_empty() {
            self.rebalance(leaf_id, path)?;
        }
        Ok(Some(value))
    }

    /// Restores minimum occupancy of `node_id` by borrowing from a sibling
    /// or merging with one, repeating upward while parents underflow.
    fn rebalance(&mut self, mut node_id: NodeId, mut path: Vec<(NodeId, usize)>) -> Result<()> {
        let min_keys = self.min_keys();

        while let Some((parent_id, idx)) = path.pop() {
            let (left_id, right_id) = {
                let parent = self.inner(parent_id)?;
                let left = idx.checked_sub(1).and_then(|i| parent.children.get(i).copied());
                (left, parent.children.get(idx + 1).copied())
            };
            let left_keys = match left_id {
                Some(id) => self.node(id)?.key_count(),
                None => 0,
            };
            let right_keys = match right_id {
                Some(id) => self.node(id)?.key_count(),
                None => 0,
            };

            match (left_id, right_id) {
                (Some(left), _) if left_keys > min_keys => {
                    return self.borrow_from_left(parent_id, idx, left, node_id);
                }
                (_, Some(right)) if right_keys > min_keys => {
                    return self.borrow_from_right(parent_id, idx, node_id, right);
                }
                (Some(left), _) => self.merge(parent_id, idx - 1, left, node_id)?,
                (None, Some(right)) => self.merge(parent_id, idx, node_id, right)?,
                (None, None) => {
                    return Err(OrdoError::Internal(format!(
                        "index node {} has no siblings",
                        node_id
                    )))
                }
            }

            if parent_id == self.root {
                let parent = self.inner(parent_id)?;
                if parent.keys.is_empty() {
                    let child = parent.children[0];
                    self.release(parent_id);
                    self.root = child;
                    self.height -= 1;
                    debug!(root = child, height = self.height, "index tree shrank a level");
                }
                return Ok(());
            }
            if self.node(parent_id)?.key_count() >= min_keys {
                return Ok(());
            }
            node_id = parent_id;
        }
        Ok(())
    }

    fn borrow_from_left(
        &mut self,
        parent_id: NodeId,
        idx: usize,
        left_id: NodeId,
        node_id: NodeId,
    ) -> Result<()> {
        let parent_sep = self.inner(parent_id)?.keys[idx - 1].clone();
        let mut left = self.take(left_id)?;
        let mut node = match self.take(node_id) {
            Ok(node) => node,
            Err(e) => {
                self.put(left_id, left);
                return Err(e);
            }
        };

        let new_sep = match (&mut left, &mut node) {
            (Node::Leaf(left), Node::Leaf(node)) => {
                match (left.keys.pop(), left.values.pop()) {
                    (Some(key), Some(value)) => {
                        node.keys.insert(0, key);
                        node.values.insert(0, value);
                        Ok(node.keys[0].clone())
                    }
                    _ => Err(OrdoError::Internal("borrow from empty leaf".to_string())),
                }
            }
            (Node::Inner(left), Node::Inner(node)) => {
                match (left.keys.pop(), left.children.pop()) {
                    (Some(key), Some(child)) => {
                        node.keys.insert(0, parent_sep);
                        node.children.insert(0, child);
                        Ok(key)
                    }
                    _ => Err(OrdoError::Internal("borrow from empty inner node".to_string())),
                }
            }
            _ => Err(OrdoError::Internal("sibling nodes at different levels".to_string())),
        };
        self.put(left_id, left);
        self.put(node_id, node);

        self.inner_mut(parent_id)?.keys[idx - 1] = new_sep?;
        debug!(from = left_id, to = node_id, "index node borrowed from left sibling");
        Ok(())
    }

    fn borrow_from_right(
        &mut self,
        parent_id: NodeId,
        idx: usize,
        node_id: NodeId,
        right_id: NodeId,
    ) -> Result<()> {
        let parent_sep = self.inner(parent_id)?.keys[idx].clone();
        let mut right = self.take(right_id)?;
        let mut node = match self.take(node_id) {
            Ok(node) => node,
            Err(e) => {
                self.put(right_id, right);
                return Err(e);
            }
        };

        let new_sep = match (&mut node, &mut right) {
            (Node::Leaf(node), Node::Leaf(right)) if right.keys.len() > 1 => {
                node.keys.push(right.keys.remove(0));
                node.values.push(right.values.remove(0));
                Ok(right.keys[0].clone())
            }
            (Node::Inner(node), Node::Inner(right)) if !right.keys.is_empty() => {
                node.keys.push(parent_sep);
                node.children.push(right.children.remove(0));
                Ok(right.keys.remove(0))
            }
            (Node::Leaf(_), Node::Leaf(_)) | (Node::Inner(_), Node::Inner(_)) => Err(
                OrdoError::Internal("borrow from underfull sibling".to_string()),
            ),
            _ => Err(OrdoError::Internal("sibling nodes at different levels".to_string())),
        };
        self.put(right_id, right);
        self.put(node_id, node);

        self.inner_mut(parent_id)?.keys[idx] = new_sep?;
        debug!(from = right_id, to = node_id, "index node borrowed from right sibling");
        Ok(())
    }

    /// Folds `right_id` into `left_id`; `sep_idx` is the parent key between them.
    fn merge(
        &mut self,
        parent_id: NodeId,
        sep_idx: usize,
        left_id: NodeId,
        right_id: NodeId,
    ) -> Result<()> {
        let separator = {
            let parent = self.inner_mut(parent_id)?;
            parent.children.remove(sep_idx + 1);
            parent.keys.remove(sep_idx)
        };
        let right = self.take(right_id)?;
        self.release(right_id);

        let relink = match (self.node_mut(left_id)?, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                left.keys.extend(right.keys);
                left.values.extend(right.values);
                left.next = right.next;
                right.next
            }
            (Node::Inner(left), Node::Inner(right)) => {
                left.keys.push(separator);
                left.keys.extend(right.keys);
                left.children.extend(right.children);
                None
            }
            _ => {
                return Err(OrdoError::Internal(
                    "sibling nodes at different levels".to_string(),
                ))
            }
        };
        if let Some(next_id) = relink {
            self.leaf_mut(next_id)?.prev = Some(left_id);
        }
        debug!(left = left_id, right = right_id, "merged index nodes");
        Ok(())
    }

    // ---- inspection ----

    /// Renders the tree level by level: one line per level, inner nodes as
    /// `(k1,k2)` and leaves as `[k1,k2]`.
    pub fn dump(&self) -> Result<String> {
        fn join(keys: &[Value]) -> String {
            keys.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        }

        let mut out = String::new();
        let mut level = vec![self.root];
        while !level.is_empty() {
            let mut next = Vec::new();
            let mut parts = Vec::with_capacity(level.len());
            for id in &level {
                match self.node(*id)? {
                    Node::Inner(inner) => {
                        parts.push(format!("({})", join(&inner.keys)));
                        next.extend(inner.children.iter().copied());
                    }
                    Node::Leaf(leaf) => parts.push(format!("[{}]", join(&leaf.keys))),
                }
            }
            out.push_str(&parts.join(" "));
            out.push('\n');
            level = next;
        }
        Ok(out)
    }

    /// Checks structural invariants: key order and bounds, node occupancy,
    /// uniform leaf depth, and the leaf chain.
    pub fn verify(&self) -> Result<()> {
        let mut leaves = Vec::new();
        self.verify_node(self.root, None, None, 1, &mut leaves)?;

        let mut expected_prev = None;
        let mut count = 0;
        let mut last_key: Option<&Value> = None;
        let mut id = Some(self.edge_leaf(true)?);
        let mut walked = Vec::new();
        while let Some(leaf_id) = id {
            let leaf = self.leaf(leaf_id)?;
            if leaf.prev != expected_prev {
                return Err(OrdoError::Internal(format!(
                    "leaf {} has prev {:?}, expected {:?}",
                    leaf_id, leaf.prev, expected_prev
                )));
            }
            if let (Some(last), Some(first)) = (last_key, leaf.keys.first()) {
                if last >= first {
                    return Err(OrdoError::Internal(format!(
                        "leaf chain out of order at leaf {}",
                        leaf_id
                    )));
                }
            }
            last_key = leaf.keys.last().or(last_key);
            count += leaf.keys.len();
            walked.push(leaf_id);
            expected_prev = Some(leaf_id);
            id = leaf.next;
        }
        if walked != leaves {
            return Err(OrdoError::Internal(
                "leaf chain does not match tree order".to_string(),
            ));
        }
        if count != self.len {
            return Err(OrdoError::Internal(format!(
                "tree holds {} keys, recorded length {}",
                count, self.len
            )));
        }
        Ok(())
    }

    fn verify_node(
        &self,
        id: NodeId,
        lower: Option<&Value>,
        upper: Option<&Value>,
        depth: u32,
        leaves: &mut Vec<NodeId>,
    ) -> Result<()> {
        let node = self.node(id)?;
        let keys = match node {
            Node::Inner(inner) => &inner.keys,
            Node::Leaf(leaf) => &leaf.keys,
        };
        let count = keys.len();
        let is_root = id == self.root;
        if count > self.max_keys || (!is_root && count < self.min_keys()) {
            return Err(OrdoError::Internal(format!(
                "index node {} holds {} keys",
                id, count
            )));
        }
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(OrdoError::Internal(format!(
                "index node {} keys out of order",
                id
            )));
        }
        let in_bounds = keys.iter().all(|k| {
            lower.map_or(true, |lo| k >= lo) && upper.map_or(true, |hi| k < hi)
        });
        if !in_bounds {
            return Err(OrdoError::Internal(format!(
                "index node {} keys outside parent bounds",
                id
            )));
        }

        match node {
            Node::Leaf(leaf) => {
                if depth != self.height {
                    return Err(OrdoError::Internal(format!(
                        "leaf {} at depth {}, height {}",
                        id, depth, self.height
                    )));
                }
                if leaf.values.len() != count {
                    return Err(OrdoError::Internal(format!(
                        "leaf {} has {} keys and {} values",
                        id,
                        count,
                        leaf.values.len()
                    )));
                }
                leaves.push(id);
            }
            Node::Inner(inner) => {
                if count == 0 || inner.children.len() != count + 1 {
                    return Err(OrdoError::Internal(format!(
                        "inner node {} has {} keys and {} children",
                        id,
                        count,
                        inner.children.len()
                    )));
                }
                for (i, child) in inner.children.iter().enumerate() {
                    let lo = if i == 0 { lower } else { inner.keys.get(i - 1) };
                    let hi = inner.keys.get(i).or(upper);
                    self.verify_node(*child, lo, hi, depth + 1, leaves)?;
                }
            }
        }
        Ok(())
    }

    // ---- persistence ----

    fn meta_record(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u32_le(self.root);
        buf.put_u32_le(self.height);
        buf.put_i64_le(self.len as i64);
        buf.put_u32_le(self.max_keys as u32);
        buf.put_u32_le(self.nodes.len() as u32);
        buf.put_u32_le(self.free.len() as u32);
        for id in &self.free {
            buf.put_u32_le(*id);
        }
        seal(RecordKind::TreeMeta, &buf)
    }

    /// Stages every node changed since the last flush, removals of freed
    /// nodes, and the tree metadata into `batch`.
    ///
    /// Change tracking is reset; a caller that fails to apply the batch must
    /// discard this tree and reload it from the store.
    pub fn flush_into(&mut self, scope: &str, batch: &mut WriteBatch) {
        if !self.is_dirty() {
            return;
        }
        for id in &self.dirty {
            if let Some(Some(node)) = self.nodes.get(*id as usize) {
                batch.put(scope, node_object_id(*id), node.to_record());
            }
        }
        for id in &self.removed {
            batch.remove(scope, node_object_id(*id));
        }
        batch.put(scope, TREE_META_OBJECT, self.meta_record());
        debug!(
            scope,
            written = self.dirty.len(),
            removed = self.removed.len(),
            "flushed index tree"
        );
        self.dirty.clear();
        self.removed.clear();
        self.meta_dirty = false;
    }

    /// Loads a tree from `scope`. Returns None if no tree was stored there.
    pub fn load(store: &dyn ObjectStore, scope: &str) -> Result<Option<Self>> {
        let Some(data) = store.load(scope, TREE_META_OBJECT)? else {
            return Ok(None);
        };
        let object = format!("{}/{}", scope, TREE_META_OBJECT);
        let payload = unseal(&object, RecordKind::TreeMeta, &data)?;
        let mut dec = Decoder::new(&object, payload);
        let root = dec.u32()?;
        let height = dec.u32()?;
        let len = dec.i64()?;
        let max_keys = dec.u32()? as usize;
        let slot_count = dec.u32()?;
        let free_count = dec.u32()? as usize;
        let mut free = Vec::with_capacity(free_count.min(1024));
        for _ in 0..free_count {
            free.push(dec.u32()?);
        }
        dec.finish()?;

        if root >= slot_count || height == 0 || len < 0 || max_keys < MIN_NODE_KEYS {
            return Err(OrdoError::corrupted(&object, "invalid tree metadata"));
        }

        let free_set: HashSet<NodeId> = free.iter().copied().collect();
        let mut nodes = Vec::with_capacity(slot_count as usize);
        for id in 0..slot_count {
            if free_set.contains(&id) {
                nodes.push(None);
                continue;
            }
            let object_id = node_object_id(id);
            let node_object = format!("{}/{}", scope, object_id);
            let data = store
                .load(scope, &object_id)?
                .ok_or_else(|| OrdoError::corrupted(&node_object, "index node missing"))?;
            nodes.push(Some(Node::from_record(&node_object, &data)?));
        }

        debug!(scope, nodes = slot_count, keys = len, "loaded index tree");
        Ok(Some(Self {
            nodes,
            free,
            root,
            height,
            len: len as usize,
            max_keys,
            dirty: BTreeSet::new(),
            removed: BTreeSet::new(),
            meta_dirty: false,
        }))
    }
}
