// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    kmeans::KMeans,
    node::{Key, Node},
    optimizer::Optimizer,
    seeder::Seeder,
    stats,
    tsvq::{split_node, SplitConfig},
};
use std::time::Instant;

/// A fixed-shape hierarchical clusterer refined by global EM steps.
///
/// The tree shape is seeded once (with TSVQ-style splits); every EM step
/// then pulls all data out of the leaves, reinserts each item along its
/// nearest-key path, prunes empty subtrees and recomputes every internal
/// mean bottom-up.
pub struct EmTree<'a, V, O, S> {
    root: Node<Key<'a, V>>,
    m: usize,
    optimizer: O,
    seeder: S,
}

impl<'a, V, O, S> EmTree<'a, V, O, S>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Clone + Sync,
    S: Seeder<V> + Clone + Send + Sync,
{
    /// Creates an EM-tree with branching `m`.
    pub fn new(m: usize, optimizer: O, seeder: S) -> Self {
        Self {
            root: Node::new(),
            m,
            optimizer,
            seeder,
        }
    }

    /// Seeds a uniform tree of the given depth over `data`, running one
    /// k-means round per node.
    pub fn seed(&mut self, data: &[&'a V], depth: usize) {
        self.root = Node::new();
        self.root
            .set_keys(data.iter().map(|&item| Key::Item(item)).collect());

        split_node(
            &mut self.root,
            depth,
            &SplitConfig {
                m: self.m,
                max_iters: Some(1),
                enforce_cluster_count: false,
            },
            &self.optimizer,
            &self.seeder,
        );
    }

    /// Seeds the tree shape from a per-level list of branching factors,
    /// single-threaded.
    ///
    /// With `update_means` unset the k-means at every level is assign-only,
    /// producing a pure shape whose keys are still the seed samples.
    pub fn seed_with_splits(&mut self, data: &[&'a V], splits: &[usize], update_means: bool) {
        self.root = Node::new();
        self.root
            .set_keys(data.iter().map(|&item| Key::Item(item)).collect());

        let max_iters = Some(u32::from(update_means));
        self.split_serial(splits, max_iters);
    }

    fn split_serial(&mut self, splits: &[usize], max_iters: Option<u32>) {
        fn descend<'a, V, O, S>(
            node: &mut Node<Key<'a, V>>,
            splits: &[usize],
            max_iters: Option<u32>,
            optimizer: &O,
            seeder: &S,
        ) where
            V: Clone + Send + Sync,
            O: Optimizer<V> + Clone + Sync,
            S: Seeder<V> + Clone + Send + Sync,
        {
            let Some((&m, rest)) = splits.split_first() else {
                return;
            };

            if node.is_empty() {
                return;
            }

            let members: Vec<&'a V> = node
                .keys()
                .iter()
                .map(|key| key.item().expect("splitting a data leaf"))
                .collect();

            let mut kmeans =
                KMeans::new(m, optimizer.clone(), seeder.clone()).max_iters(max_iters);
            let clusters = kmeans.cluster(&members);

            let _ = node.take_entries();

            for cluster in clusters {
                let (centroid, members) = cluster.into_parts();

                let mut child = Node::new();
                child.set_keys(members.into_iter().map(Key::Item).collect());

                node.push_entry(Key::Centroid(centroid), child);
            }

            for child in node.children_mut() {
                descend(child, rest, max_iters, optimizer, seeder);
            }
        }

        descend(
            &mut self.root,
            splits,
            max_iters,
            &self.optimizer,
            &self.seeder,
        );
    }

    /// One EM step: reinsert every item along its nearest path, prune empty
    /// subtrees until a full walk removes nothing, then recompute all
    /// internal means bottom-up.
    pub fn em_step(&mut self) {
        let start = Instant::now();
        self.rearrange();
        log::debug!("EM insert: {:?}", start.elapsed());

        let start = Instant::now();
        let mut pruned = 0;
        loop {
            let pass = self.prune();
            pruned += pass;
            if pass == 0 {
                break;
            }
        }
        log::debug!("EM prune ({pruned} subtrees): {:?}", start.elapsed());

        let start = Instant::now();
        self.rebuild_internal();
        log::debug!("EM update: {:?}", start.elapsed());
    }

    /// An EM step that swaps `data` into the tree instead of reusing the
    /// items already stored in the leaves.
    pub fn em_step_replacing(&mut self, data: &[&'a V]) {
        self.replace(data);

        while self.prune() > 0 {}

        self.rebuild_internal();
    }

    /// Seats a fresh dataset into the existing tree shape: all current
    /// items are discarded, then every new item descends to its nearest
    /// leaf. No means are updated.
    pub fn replace(&mut self, data: &[&'a V]) {
        let _ = drain_items(&mut self.root);

        for &item in data {
            push_down_no_update(&mut self.root, item, &self.optimizer);
        }
    }

    /// Pulls every item out of the leaves and reinserts it along its
    /// nearest-key path. No means are updated.
    pub fn rearrange(&mut self) {
        let removed = drain_items(&mut self.root);

        for item in removed {
            push_down_no_update(&mut self.root, item, &self.optimizer);
        }
    }

    /// Moves internal subtrees between sibling parents, one depth at a
    /// time: detach all (key, child) entries at the depth, reinsert each by
    /// nearest-key descent, prune.
    pub fn rearrange_internal(&mut self) {
        for depth in 2..self.max_level_count() {
            if self.root.is_empty() {
                return;
            }

            let mut detached = Vec::new();
            drain_internal(&mut self.root, depth, &mut detached);

            for (key, child) in detached {
                push_down_internal(&mut self.root, key, child, depth, &self.optimizer);
            }

            self.prune();
        }
    }

    /// One prune pass: removes every child subtree whose leaves are all
    /// empty. Returns the number of removed subtrees; callers loop until a
    /// pass removes nothing.
    pub fn prune(&mut self) -> usize {
        prune_empty(&mut self.root)
    }

    /// Recomputes every internal key bottom-up as the weighted prototype of
    /// its child's keys.
    pub fn rebuild_internal(&mut self) {
        for depth in (1..self.root.level_count()).rev() {
            rebuild_at(&mut self.root, depth, &self.optimizer);
        }
    }

    /// The tree root.
    #[must_use]
    pub fn root(&self) -> &Node<Key<'a, V>> {
        &self.root
    }

    /// Number of objects stored in the leaves.
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

/// Moves all data items out of every leaf below `node`.
pub(crate) fn drain_items<'a, V>(node: &mut Node<Key<'a, V>>) -> Vec<&'a V> {
    fn walk<'a, V>(node: &mut Node<Key<'a, V>>, out: &mut Vec<&'a V>) {
        if node.is_leaf() {
            for key in node.take_keys() {
                out.push(key.item().expect("leaves hold data items"));
            }
        } else {
            for child in node.children_mut() {
                walk(child, out);
            }
        }
    }

    let mut out = Vec::new();
    walk(node, &mut out);
    out
}

/// Descends from `node` by nearest key and appends `item` at the reached
/// leaf. No means are updated along the path.
pub(crate) fn push_down_no_update<'a, V, O: Optimizer<V>>(
    node: &mut Node<Key<'a, V>>,
    item: &'a V,
    optimizer: &O,
) {
    if node.is_leaf() {
        node.push_key(Key::Item(item));
        return;
    }

    let nearest = optimizer
        .nearest_by(item, node.keys(), Key::vector)
        .index;

    push_down_no_update(node.child_mut(nearest), item, optimizer);
}

/// Detaches all (key, child) entries of the nodes `depth` levels below
/// `node`.
fn drain_internal<'a, V>(
    node: &mut Node<Key<'a, V>>,
    depth: usize,
    out: &mut Vec<(Key<'a, V>, Node<Key<'a, V>>)>,
) {
    if depth == 1 {
        let (keys, children) = node.take_entries();
        out.extend(keys.into_iter().zip(children));
    } else {
        for child in node.children_mut() {
            drain_internal(child, depth - 1, out);
        }
    }
}

/// Reinserts a detached (key, child) entry `depth` levels below `node`,
/// descending by nearest key.
fn push_down_internal<'a, V, O: Optimizer<V>>(
    node: &mut Node<Key<'a, V>>,
    key: Key<'a, V>,
    child: Node<Key<'a, V>>,
    depth: usize,
    optimizer: &O,
) {
    if depth == 1 {
        node.push_entry(key, child);
        return;
    }

    let nearest = optimizer
        .nearest_by(key.vector(), node.keys(), Key::vector)
        .index;

    push_down_internal(node.child_mut(nearest), key, child, depth - 1, optimizer);
}

/// One prune pass below `node`; see [`EmTree::prune`].
pub(crate) fn prune_empty<V>(node: &mut Node<Key<'_, V>>) -> usize {
    if node.is_leaf() {
        return 0;
    }

    let mut pruned = 0;

    for i in 0..node.len() {
        if node.child(i).is_empty() {
            node.remove(i);
            pruned += 1;
        } else {
            pruned += prune_empty(node.child_mut(i));
        }
    }

    node.finalize_removals();
    pruned
}

/// Recomputes the keys of the nodes `depth` levels below the root of the
/// walk, from their children.
pub(crate) fn rebuild_at<V, O: Optimizer<V>>(
    node: &mut Node<Key<'_, V>>,
    depth: usize,
    optimizer: &O,
) {
    if node.is_leaf() {
        return;
    }

    if depth == 1 {
        let (keys, children) = node.entries_mut();

        for (key, child) in keys.iter_mut().zip(children) {
            stats::update_key_from_child(optimizer, key.vector_mut(), child);
        }
    } else {
        for child in node.children_mut() {
            rebuild_at(child, depth - 1, optimizer);
        }
    }
}
