// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    em_tree::{drain_items, prune_empty, push_down_no_update, rebuild_at},
    kmeans::KMeans,
    node::{Key, Node},
    optimizer::Optimizer,
    seeder::Seeder,
    stats,
};

/// An incremental clusterer with B-tree-style balance: vectors are inserted
/// one at a time, a full node is split with 2-means, and splits propagate
/// upward — so every leaf always sits at the same depth.
///
/// Building is single-threaded; concurrent `add` is not supported.
pub struct KTree<'a, V, O, S> {
    root: Node<Key<'a, V>>,
    m: usize,
    kmeans: KMeans<O, S>,
    optimizer: O,

    added: u64,
    delayed_updates: bool,
    update_delay: u64,
}

/// What bubbled up from an insertion below.
enum PushOutcome<'a, V> {
    /// The vector found room.
    Inserted,

    /// The child split in two: its replacement key, plus the key and node
    /// of the new sibling.
    Split {
        left_key: V,
        right_key: V,
        right_child: Node<Key<'a, V>>,
    },
}

struct InsertCtx<'c, O, S> {
    kmeans: &'c mut KMeans<O, S>,
    optimizer: &'c O,
    m: usize,

    // Whether non-splitting path keys get refreshed on this insert
    refresh: bool,
}

impl<'a, V, O, S> KTree<'a, V, O, S>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Clone + Sync,
    S: Seeder<V>,
{
    /// Creates a K-tree of the given order, using `split_iters` k-means
    /// rounds for every 2-way node split.
    pub fn new(order: usize, split_iters: Option<u32>, optimizer: O, seeder: S) -> Self {
        assert!(order >= 2, "a K-tree needs an order of at least 2");

        let kmeans = KMeans::new(2, optimizer.clone(), seeder)
            .max_iters(split_iters)
            .enforce_cluster_count(true);

        Self {
            root: Node::new(),
            m: order,
            kmeans,
            optimizer,
            added: 0,
            delayed_updates: false,
            update_delay: 1_000,
        }
    }

    /// Only refresh insertion-path keys every [`KTree::update_delay`]
    /// inserts, amortizing the prototype cost over bulk loads.
    #[must_use]
    pub fn delayed_updates(mut self, enabled: bool) -> Self {
        self.delayed_updates = enabled;
        self
    }

    /// The refresh period used with [`KTree::delayed_updates`].
    #[must_use]
    pub fn update_delay(mut self, delay: u64) -> Self {
        assert!(delay > 0, "update delay must be positive");
        self.update_delay = delay;
        self
    }

    /// Inserts one vector, splitting and growing the tree as needed.
    pub fn add(&mut self, item: &'a V) {
        let mut ctx = InsertCtx {
            kmeans: &mut self.kmeans,
            optimizer: &self.optimizer,
            m: self.m,
            refresh: !self.delayed_updates || self.added % self.update_delay == 0,
        };

        if let PushOutcome::Split {
            left_key,
            right_key,
            right_child,
        } = push_down(&mut self.root, item, &mut ctx)
        {
            // the root itself split; grow the tree by one level
            let old_root = std::mem::take(&mut self.root);

            let mut new_root = Node::new();
            new_root.push_entry(Key::Centroid(left_key), old_root);
            new_root.push_entry(Key::Centroid(right_key), right_child);

            self.root = new_root;

            log::trace!("K-tree root split, now {} levels", self.root.level_count());
        }

        self.added += 1;
    }

    /// Removes all data from the leaves, reinserts every item without any
    /// key updates, then prunes empty subtrees.
    pub fn rearrange(&mut self) {
        let removed = drain_items(&mut self.root);

        for item in removed {
            push_down_no_update(&mut self.root, item, &self.optimizer);
        }

        while prune_empty(&mut self.root) > 0 {}
    }

    /// Recomputes every internal key bottom-up from the leaves.
    pub fn rebuild_internal(&mut self) {
        for depth in (1..self.root.level_count()).rev() {
            rebuild_at(&mut self.root, depth, &self.optimizer);
        }
    }

    /// One EM step over the finished tree: rearrange, then rebuild the
    /// internal keys.
    pub fn em_step(&mut self) {
        self.rearrange();
        self.rebuild_internal();
    }

    /// The tree root.
    #[must_use]
    pub fn root(&self) -> &Node<Key<'a, V>> {
        &self.root
    }

    /// Number of vectors inserted since construction.
    #[must_use]
    pub fn added(&self) -> u64 {
        self.added
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

fn push_down<'a, V, O, S>(
    node: &mut Node<Key<'a, V>>,
    item: &'a V,
    ctx: &mut InsertCtx<'_, O, S>,
) -> PushOutcome<'a, V>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Sync,
    S: Seeder<V>,
{
    if node.is_leaf() {
        if node.len() >= ctx.m {
            return split_leaf(node, item, ctx);
        }

        node.push_key(Key::Item(item));
        return PushOutcome::Inserted;
    }

    let nearest = ctx
        .optimizer
        .nearest_by(item, node.keys(), Key::vector)
        .index;

    match push_down(node.child_mut(nearest), item, ctx) {
        PushOutcome::Split {
            mut left_key,
            mut right_key,
            right_child,
        } => {
            // Recompute both split keys from the final memberships, then
            // swap the stale key of the split child for its replacement
            stats::update_key_from_child(ctx.optimizer, &mut left_key, node.child(nearest));
            stats::update_key_from_child(ctx.optimizer, &mut right_key, &right_child);

            *node
                .keys_mut()
                .get_mut(nearest)
                .expect("nearest key in range") = Key::Centroid(left_key);

            if node.len() >= ctx.m {
                return split_internal(node, Key::Centroid(right_key), right_child, ctx);
            }

            node.push_entry(Key::Centroid(right_key), right_child);
            PushOutcome::Inserted
        }

        PushOutcome::Inserted => {
            if ctx.refresh {
                let (keys, children) = node.entries_mut();

                stats::update_key_from_child(
                    ctx.optimizer,
                    keys.get_mut(nearest)
                        .expect("nearest key in range")
                        .vector_mut(),
                    children.get(nearest).expect("nearest child in range"),
                );
            }

            PushOutcome::Inserted
        }
    }
}

/// Splits a full leaf with 2-means over its data plus the incoming item.
fn split_leaf<'a, V, O, S>(
    node: &mut Node<Key<'a, V>>,
    item: &'a V,
    ctx: &mut InsertCtx<'_, O, S>,
) -> PushOutcome<'a, V>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Sync,
    S: Seeder<V>,
{
    let mut members: Vec<&'a V> = node
        .take_keys()
        .into_iter()
        .map(|key| key.item().expect("leaves hold data items"))
        .collect();
    members.push(item);

    let clusters = ctx.kmeans.cluster(&members);
    let (left_key, right_key) = two_centroids(clusters);

    let mut right = Node::new();

    for (&member, &slot) in members.iter().zip(ctx.kmeans.assignments()) {
        if slot == 0 {
            node.push_key(Key::Item(member));
        } else {
            right.push_key(Key::Item(member));
        }
    }

    PushOutcome::Split {
        left_key,
        right_key,
        right_child: right,
    }
}

/// Splits a full internal node: 2-means over its keys (plus the incoming
/// entry), carrying the corresponding child pointers along.
fn split_internal<'a, V, O, S>(
    parent: &mut Node<Key<'a, V>>,
    new_key: Key<'a, V>,
    new_child: Node<Key<'a, V>>,
    ctx: &mut InsertCtx<'_, O, S>,
) -> PushOutcome<'a, V>
where
    V: Clone + Send + Sync,
    O: Optimizer<V> + Sync,
    S: Seeder<V>,
{
    let (mut keys, mut children) = parent.take_entries();
    keys.push(new_key);
    children.push(new_child);

    let (left_key, right_key, assignments) = {
        let members: Vec<&V> = keys.iter().map(Key::vector).collect();
        let clusters = ctx.kmeans.cluster(&members);
        let (left_key, right_key) = two_centroids(clusters);
        (left_key, right_key, ctx.kmeans.assignments().to_vec())
    };

    let mut right = Node::new();

    for ((key, child), &slot) in keys.into_iter().zip(children).zip(&assignments) {
        if slot == 0 {
            parent.push_entry(key, child);
        } else {
            right.push_entry(key, child);
        }
    }

    PushOutcome::Split {
        left_key,
        right_key,
        right_child: right,
    }
}

fn two_centroids<V>(clusters: Vec<crate::cluster::Cluster<'_, V>>) -> (V, V) {
    let mut centroids = clusters.into_iter().map(|c| c.into_parts().0);

    let left = centroids.next().expect("2-means returns two clusters");
    let right = centroids.next().expect("2-means returns two clusters");

    (left, right)
}
