// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    kmeans::KMeans,
    node::{Key, Node},
    optimizer::Optimizer,
    seeder::Seeder,
    stats,
};

/// Tree-structured vector quantization: a balanced tree built top-down by
/// recursively splitting each node with k-means.
///
/// Every non-root subtree is refined as an independent task; siblings
/// proceed in parallel once their parent's k-means returns, and a joining
/// barrier waits for the whole sibling group.
pub struct Tsvq<'a, V, O, S> {
    root: Node<Key<'a, V>>,
    m: usize,
    depth: usize,
    max_iters: Option<u32>,
    enforce_cluster_count: bool,
    optimizer: O,
    seeder: S,
}

impl<'a, V, O, S> Tsvq<'a, V, O, S>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Clone + Sync,
    S: Seeder<V> + Clone + Send + Sync,
{
    /// Creates a clusterer producing a tree with `depth` levels and
    /// branching `m`, refining each node with at most `max_iters` k-means
    /// rounds.
    pub fn new(m: usize, depth: usize, max_iters: Option<u32>, optimizer: O, seeder: S) -> Self {
        Self {
            root: Node::new(),
            m,
            depth,
            max_iters,
            enforce_cluster_count: false,
            optimizer,
            seeder,
        }
    }

    /// Forces every split to produce exactly `min(m, |node|)` children.
    #[must_use]
    pub fn enforce_cluster_count(mut self, enforce: bool) -> Self {
        self.enforce_cluster_count = enforce;
        self
    }

    /// Builds the tree over `data`.
    pub fn cluster(&mut self, data: &[&'a V]) {
        self.root = Node::new();
        self.root
            .set_keys(data.iter().map(|&item| Key::Item(item)).collect());

        split_node(
            &mut self.root,
            self.depth,
            &SplitConfig {
                m: self.m,
                max_iters: self.max_iters,
                enforce_cluster_count: self.enforce_cluster_count,
            },
            &self.optimizer,
            &self.seeder,
        );

        log::debug!(
            "TSVQ built {} levels over {} objects, {} clusters",
            self.root.level_count(),
            stats::object_count(&self.root),
            stats::cluster_count(&self.root),
        );
    }

    /// The m-way tree.
    #[must_use]
    pub fn root(&self) -> &Node<Key<'a, V>> {
        &self.root
    }

    /// Number of clustered objects.
    #[must_use]
    pub fn object_count(&self) -> u64 {
        stats::object_count(&self.root)
    }

    /// Number of non-empty leaves.
    #[must_use]
    pub fn cluster_count(&self) -> usize {
        stats::cluster_count(&self.root)
    }

    /// Number of levels, following first children.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.root.level_count()
    }

    /// Number of levels of the deepest branch.
    #[must_use]
    pub fn max_level_count(&self) -> usize {
        self.root.max_level_count()
    }

    /// Root-mean-square distance of every object to its leaf centroid.
    #[must_use]
    pub fn rmse(&self) -> f64 {
        stats::rmse(&self.optimizer, &self.root)
    }
}

pub(crate) struct SplitConfig {
    pub m: usize,
    pub max_iters: Option<u32>,
    pub enforce_cluster_count: bool,
}

/// Recursively splits `node` until `depth` levels remain below it.
///
/// Used by both TSVQ construction and EM-tree seeding. Each recursion level
/// allocates a fresh k-means (and a cloned seeder) so parallel child tasks
/// share no mutable state.
pub(crate) fn split_node<'a, V, O, S>(
    node: &mut Node<Key<'a, V>>,
    depth: usize,
    config: &SplitConfig,
    optimizer: &O,
    seeder: &S,
) where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Clone + Sync,
    S: Seeder<V> + Clone + Send + Sync,
{
    if depth <= 1 || node.is_empty() {
        return;
    }

    let members: Vec<&'a V> = node
        .keys()
        .iter()
        .map(|key| key.item().expect("splitting a data leaf"))
        .collect();

    let mut kmeans = KMeans::new(config.m, optimizer.clone(), seeder.clone())
        .max_iters(config.max_iters)
        .enforce_cluster_count(config.enforce_cluster_count);

    let clusters = kmeans.cluster(&members);

    // The data keys move out of this node and into one child leaf per
    // cluster; the centroids become this node's keys, owned from here on.
    let _ = node.take_entries();

    for cluster in clusters {
        let (centroid, members) = cluster.into_parts();

        let mut child = Node::new();
        child.set_keys(members.into_iter().map(Key::Item).collect());

        node.push_entry(Key::Centroid(centroid), child);
    }

    rayon::scope(|scope| {
        for child in node.children_mut() {
            scope.spawn(move |_| split_node(child, depth - 1, config, optimizer, seeder));
        }
    });
}
