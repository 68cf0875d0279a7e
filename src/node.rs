// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A tree key that is either an owned centroid or a borrowed data point.
///
/// Internal nodes summarize their subtree with centroids they own; leaves
/// hold views of the caller's data. Dropping a borrowed key never frees the
/// underlying vector.
#[derive(Debug)]
pub enum Key<'a, V> {
    /// An owned cluster summary.
    Centroid(V),

    /// A borrowed data point.
    Item(&'a V),
}

impl<'a, V> Key<'a, V> {
    /// The vector behind the key.
    #[must_use]
    pub fn vector(&self) -> &V {
        match self {
            Key::Centroid(v) => v,
            Key::Item(v) => v,
        }
    }

    /// The borrowed data point, if this key is one. Unlike
    /// [`Key::vector`], the returned reference outlives the node.
    #[must_use]
    pub fn item(&self) -> Option<&'a V> {
        match self {
            Key::Centroid(_) => None,
            Key::Item(v) => Some(v),
        }
    }

    /// Mutable access to an owned centroid.
    ///
    /// # Panics
    ///
    /// Panics if the key borrows a data point; rewriting somebody else's
    /// data would corrupt the clustering input.
    #[must_use]
    pub fn vector_mut(&mut self) -> &mut V {
        match self {
            Key::Centroid(v) => v,
            Key::Item(_) => panic!("cannot mutate a borrowed data point"),
        }
    }
}

/// A generic tree node: parallel ordered sequences of keys and children.
///
/// A node starts as a leaf; the first [`Node::push_entry`] makes it
/// internal. Non-leaf nodes satisfy `keys.len() == children.len()` except
/// inside a removal window, which ends with [`Node::finalize_removals`].
#[derive(Debug)]
pub struct Node<K> {
    keys: Vec<K>,
    children: Vec<Node<K>>,
    leaf: bool,

    // Tombstoned indices, ascending; applied by finalize_removals
    doomed: Vec<usize>,
}

impl<K> Default for Node<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Node<K> {
    /// Creates an empty leaf.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            children: Vec::new(),
            leaf: true,
            doomed: Vec::new(),
        }
    }

    /// Whether this node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    /// Whether this node has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// The keys, in order.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub(crate) fn keys_mut(&mut self) -> &mut [K] {
        &mut self.keys
    }

    /// The children, in order. Empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[Node<K>] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node<K>] {
        &mut self.children
    }

    // Split borrow for bottom-up mean recomputation: mutate keys while
    // reading the children they summarize.
    pub(crate) fn entries_mut(&mut self) -> (&mut [K], &[Node<K>]) {
        (&mut self.keys, &self.children)
    }

    /// The i-th child.
    #[must_use]
    pub fn child(&self, i: usize) -> &Node<K> {
        self.children.get(i).expect("child index out of range")
    }

    pub(crate) fn child_mut(&mut self, i: usize) -> &mut Node<K> {
        self.children.get_mut(i).expect("child index out of range")
    }

    /// Appends a key to a leaf.
    pub fn push_key(&mut self, key: K) {
        debug_assert!(self.leaf, "leaves take bare keys");
        self.keys.push(key);
    }

    /// Appends a (key, child) entry, making this node internal.
    pub fn push_entry(&mut self, key: K, child: Node<K>) {
        self.keys.push(key);
        self.children.push(child);
        self.leaf = false;
    }

    /// Replaces all keys of a leaf.
    pub fn set_keys(&mut self, keys: Vec<K>) {
        debug_assert!(self.leaf, "leaves take bare keys");
        self.keys = keys;
    }

    /// Removes every key and child, turning this node back into an empty
    /// leaf. Returns what was removed.
    pub fn take_entries(&mut self) -> (Vec<K>, Vec<Node<K>>) {
        self.leaf = true;
        (
            std::mem::take(&mut self.keys),
            std::mem::take(&mut self.children),
        )
    }

    /// Moves all keys out of a leaf.
    pub fn take_keys(&mut self) -> Vec<K> {
        debug_assert!(self.leaf, "only leaves hold data keys");
        std::mem::take(&mut self.keys)
    }

    /// Tombstones the entry at `i` (key and, for internal nodes, the child
    /// subtree). The slot stays in place until [`Node::finalize_removals`].
    ///
    /// Indices must be tombstoned in ascending order.
    pub fn remove(&mut self, i: usize) {
        debug_assert!(
            self.doomed.last().is_none_or(|last| *last < i),
            "removals must be marked in ascending order",
        );
        self.doomed.push(i);
    }

    /// Compacts the key and child sequences in a single pass, dropping
    /// every tombstoned entry.
    pub fn finalize_removals(&mut self) {
        if self.doomed.is_empty() {
            return;
        }

        let doomed = std::mem::take(&mut self.doomed);

        let mut doomed_iter = doomed.iter().copied().peekable();
        let mut index = 0;
        self.keys.retain(|_| {
            let keep = doomed_iter.next_if_eq(&index).is_none();
            index += 1;
            keep
        });

        if !self.leaf {
            let mut doomed_iter = doomed.iter().copied().peekable();
            let mut index = 0;
            self.children.retain(|_| {
                let keep = doomed_iter.next_if_eq(&index).is_none();
                index += 1;
                keep
            });
        }

        debug_assert!(self.leaf || self.keys.len() == self.children.len());
    }

    /// Number of levels below and including this node, following the first
    /// child at every step.
    #[must_use]
    pub fn level_count(&self) -> usize {
        if self.leaf || self.children.is_empty() {
            1
        } else {
            1 + self.child(0).level_count()
        }
    }

    /// Number of levels of the deepest subtree.
    #[must_use]
    pub fn max_level_count(&self) -> usize {
        if self.leaf {
            1
        } else {
            1 + self
                .children
                .iter()
                .map(Node::max_level_count)
                .max()
                .unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn node_starts_as_leaf() {
        let mut node: Node<u32> = Node::new();
        assert!(node.is_leaf());
        assert!(node.is_empty());

        node.push_key(1);
        assert!(node.is_leaf());
        assert_eq!(1, node.len());

        node.take_keys();
        node.push_entry(1, Node::new());
        assert!(!node.is_leaf());
    }

    #[test]
    fn node_key_child_parity() {
        let mut node: Node<u32> = Node::new();
        for key in 0..4 {
            node.push_entry(key, Node::new());
        }

        assert_eq!(node.len(), node.children().len());
        assert_eq!(1, node.child(0).level_count());
        assert_eq!(2, node.level_count());
    }

    #[test]
    fn node_deferred_removal_compacts() {
        let mut node: Node<u32> = Node::new();
        for key in 0..5 {
            let mut child = Node::new();
            child.push_key(key * 10);
            node.push_entry(key, child);
        }

        node.remove(1);
        node.remove(3);

        // slots stay until finalized
        assert_eq!(5, node.len());

        node.finalize_removals();

        assert_eq!(&[0, 2, 4], node.keys());
        assert_eq!(3, node.children().len());
        assert_eq!(&[20], node.child(1).keys());
    }

    #[test]
    fn node_removal_of_leaf_keys() {
        let mut node: Node<u32> = Node::new();
        for key in 0..3 {
            node.push_key(key);
        }

        node.remove(0);
        node.remove(2);
        node.finalize_removals();

        assert_eq!(&[1], node.keys());
        assert!(node.is_leaf());
    }

    #[test]
    fn node_finalize_without_removals_is_noop() {
        let mut node: Node<u32> = Node::new();
        node.push_key(7);
        node.finalize_removals();
        assert_eq!(&[7], node.keys());
    }

    #[test]
    fn key_vector_access() {
        let data = crate::BitVector::from_blocks(vec![3]);

        let borrowed: Key<crate::BitVector> = Key::Item(&data);
        assert_eq!(&data, borrowed.vector());

        let mut owned: Key<crate::BitVector> = Key::Centroid(data.clone());
        owned.vector_mut().set(10);
        assert_eq!(&[3], data.blocks());
        assert!(owned.vector().get(10));
    }
}
