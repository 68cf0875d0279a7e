// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tree walks shared by the batch clusterers: object, cluster and level
//! counts plus squared-error aggregation over [`Key`]-keyed trees.

use crate::{
    node::{Key, Node},
    optimizer::Optimizer,
};

/// Number of data points stored in the leaves below `node`.
#[must_use]
pub fn object_count<V>(node: &Node<Key<'_, V>>) -> u64 {
    if node.is_leaf() {
        node.len() as u64
    } else {
        node.children().iter().map(object_count).sum()
    }
}

/// Number of non-empty leaves below `node`.
#[must_use]
pub fn cluster_count<V>(node: &Node<Key<'_, V>>) -> usize {
    if node.is_leaf() {
        usize::from(!node.is_empty())
    } else {
        node.children().iter().map(cluster_count).sum()
    }
}

/// Number of non-empty nodes at `depth` levels below `node`.
#[must_use]
pub fn cluster_count_at<V>(node: &Node<Key<'_, V>>, depth: usize) -> usize {
    if depth == 1 {
        node.children().iter().filter(|c| !c.is_empty()).count()
    } else {
        node.children()
            .iter()
            .map(|c| cluster_count_at(c, depth - 1))
            .sum()
    }
}

/// Sum of squared distances of every data point to the centroid of the
/// leaf it sits in, accumulated over the whole tree.
///
/// `parent_key` is the centroid that summarizes `node`; the root has none,
/// so its direct keys contribute nothing when it is a leaf.
pub fn sum_squared_error<V, O: Optimizer<V>>(
    optimizer: &O,
    parent_key: Option<&V>,
    node: &Node<Key<'_, V>>,
) -> f64 {
    if node.is_leaf() {
        let Some(parent_key) = parent_key else {
            return 0.0;
        };

        node.keys()
            .iter()
            .map(|key| optimizer.squared_distance(key.vector(), parent_key))
            .sum()
    } else {
        node.keys()
            .iter()
            .zip(node.children())
            .map(|(key, child)| sum_squared_error(optimizer, Some(key.vector()), child))
            .sum()
    }
}

/// Overwrites `key` with the prototype of `child`'s keys.
///
/// For an internal child the keys are weighted by the object count beneath
/// each grandchild, so the summary reflects the subtree and not just its
/// immediate centroids.
pub(crate) fn update_key_from_child<V, O: Optimizer<V>>(
    optimizer: &O,
    key: &mut V,
    child: &Node<Key<'_, V>>,
) {
    let members: Vec<&V> = child.keys().iter().map(Key::vector).collect();

    let weights: Vec<u32> = if child.is_leaf() {
        Vec::new()
    } else {
        child
            .children()
            .iter()
            .map(|grandchild| object_count(grandchild) as u32)
            .collect()
    };

    optimizer.update_prototype(key, &members, &weights);
}

/// Root-mean-square error over the whole tree.
pub fn rmse<V, O: Optimizer<V>>(optimizer: &O, node: &Node<Key<'_, V>>) -> f64 {
    let count = object_count(node);
    if count == 0 {
        return 0.0;
    }

    (sum_squared_error(optimizer, None, node) / count as f64).sqrt()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{optimizer::hamming_optimizer, BitVector};
    use test_log::test;

    #[test]
    fn stats_over_two_level_tree() {
        let data: Vec<BitVector> = [0u64, 0b1, u64::MAX, u64::MAX ^ 1]
            .iter()
            .map(|&b| BitVector::from_blocks(vec![b]))
            .collect();

        let mut left = Node::new();
        left.push_key(Key::Item(&data[0]));
        left.push_key(Key::Item(&data[1]));

        let mut right = Node::new();
        right.push_key(Key::Item(&data[2]));
        right.push_key(Key::Item(&data[3]));

        let mut root = Node::new();
        root.push_entry(Key::Centroid(BitVector::from_blocks(vec![0])), left);
        root.push_entry(Key::Centroid(BitVector::from_blocks(vec![u64::MAX])), right);

        assert_eq!(4, object_count(&root));
        assert_eq!(2, cluster_count(&root));
        assert_eq!(2, cluster_count_at(&root, 1));
        assert_eq!(2, root.level_count());

        let optimizer = hamming_optimizer();
        let sse = sum_squared_error(&optimizer, None, &root);
        assert_eq!(2.0, sse);
        assert!((rmse(&optimizer, &root) - 0.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn stats_empty_tree() {
        let root: Node<Key<BitVector>> = Node::new();
        assert_eq!(0, object_count(&root));
        assert_eq!(0, cluster_count(&root));
        assert_eq!(0.0, rmse(&hamming_optimizer(), &root));
    }
}
