// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bitvec::BitVector,
    node::{Key, Node},
    optimizer::Optimizer,
    position_table::POSITION_TABLE,
    stream::VectorStream,
    visitor::{ClusterVisitor, InsertVisitor},
    Error,
};
use std::sync::Mutex;

/// Vectors per stream batch
const DEFAULT_READSIZE: usize = 1_000;

/// In-flight batch cap in the streaming pipeline
const DEFAULT_MAXTOKENS: usize = 1_024;

/// Per-leaf statistics, guarded by the key's mutex.
struct LeafStats {
    /// Per-dimension sum of inserted bits
    accumulator: Vec<u32>,

    /// Vectors added across the entire run
    count: u64,

    /// Vectors added in the current pass
    count_last_pass: u64,

    sum_squared_error: f64,
}

impl LeafStats {
    fn zeroed(dimensions: usize) -> Self {
        Self {
            accumulator: vec![0; dimensions],
            count: 0,
            count_last_pass: 0,
            sum_squared_error: 0.0,
        }
    }
}

/// A streaming-tree key: the cluster representative, plus, at the leaf
/// level, the accumulator state that stands in for the members the tree
/// never stores.
///
/// Internal keys carry no accumulator and no mutex; their representatives
/// are recomputed by aggregating the leaves below them.
pub struct AccumulatorKey {
    key: BitVector,
    stats: Option<Mutex<LeafStats>>,
}

impl AccumulatorKey {
    /// The cluster representative.
    #[must_use]
    pub fn key(&self) -> &BitVector {
        &self.key
    }
}

/// The streaming variant of the EM-tree: a fixed shape copied from an
/// existing tree, refined by single-pass accumulator updates instead of
/// stored members.
///
/// Inserts are thread-safe; each leaf key is guarded by its own mutex,
/// internal keys are read-only during inserts and rewritten only by the
/// single-threaded [`StreamingEmTree::update`].
pub struct StreamingEmTree<O> {
    root: Node<AccumulatorKey>,
    optimizer: O,
    dimensions: usize,

    readsize: usize,
    maxtokens: usize,
    worker_threads: Option<usize>,
}

impl<O: Optimizer<BitVector>> StreamingEmTree<O> {
    /// Copies the internal structure of an existing tree (typically built
    /// by TSVQ on a sample). The source tree's leaves are discarded; each
    /// copied leaf-level key gets a zeroed accumulator and a mutex.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::EmptySeed`] if the source root carries no
    /// internal structure to copy.
    pub fn new(source: &Node<Key<'_, BitVector>>, optimizer: O) -> crate::Result<Self> {
        if source.is_leaf() || source.is_empty() {
            return Err(Error::EmptySeed);
        }

        let dimensions = source
            .keys()
            .first()
            .expect("source root is non-empty")
            .vector()
            .len();

        let mut root = Node::new();
        deep_copy(source, &mut root, dimensions);

        Ok(Self {
            root,
            optimizer,
            dimensions,
            readsize: DEFAULT_READSIZE,
            maxtokens: DEFAULT_MAXTOKENS,
            worker_threads: None,
        })
    }

    /// Vectors per pipeline batch (default 1000).
    #[must_use]
    pub fn readsize(mut self, readsize: usize) -> Self {
        assert!(readsize > 0, "readsize must be positive");
        self.readsize = readsize;
        self
    }

    /// In-flight batch cap of the pipeline (default 1024); memory usage of
    /// a stream pass is `O(maxtokens * readsize)` regardless of stream
    /// length.
    #[must_use]
    pub fn maxtokens(mut self, maxtokens: usize) -> Self {
        assert!(maxtokens > 0, "maxtokens must be positive");
        self.maxtokens = maxtokens;
        self
    }

    /// Overrides the parallel stage's worker count; one worker makes
    /// stream passes deterministic.
    #[must_use]
    pub fn worker_threads(mut self, workers: Option<usize>) -> Self {
        self.worker_threads = workers;
        self
    }

    /// The signature length in bits.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Inserts every vector of the batch.
    pub fn insert(&self, batch: &[BitVector]) {
        for object in batch {
            self.insert_one(object);
        }
    }

    /// Streams a whole source through the bounded pipeline, inserting
    /// every vector. Returns the number of vectors read.
    ///
    /// # Errors
    ///
    /// Fails if reading the source fails mid-stream.
    pub fn insert_stream<S>(&self, source: &mut S) -> crate::Result<u64>
    where
        S: VectorStream,
        O: Sync,
    {
        let total = self.drive(source, &|batch| self.insert(&batch))?;
        log::debug!("streamed {total} vectors into {} clusters", self.cluster_count(self.max_level_count()));
        Ok(total)
    }

    /// Visits every vector of the batch: updates the reached leaf's error
    /// statistics and counters but not its accumulator, reporting every
    /// level of the descent to the visitor.
    pub fn visit<Vis: InsertVisitor<BitVector>>(&self, batch: &[BitVector], visitor: &Vis) {
        for object in batch {
            self.visit_one(object, visitor);
        }
    }

    /// Streams a whole source through the bounded pipeline, visiting every
    /// vector. Returns the number of vectors read.
    ///
    /// # Errors
    ///
    /// Fails if reading the source fails mid-stream.
    pub fn visit_stream<S, Vis>(&self, source: &mut S, visitor: &Vis) -> crate::Result<u64>
    where
        S: VectorStream,
        Vis: InsertVisitor<BitVector>,
        O: Sync,
    {
        self.drive(source, &|batch| self.visit(&batch, visitor))
    }

    /// Walks every cluster with its aggregate statistics, top-down.
    pub fn visit_clusters<Vis: ClusterVisitor<BitVector>>(&self, visitor: &mut Vis) {
        visit_clusters(&self.root, None, 1, visitor);
    }

    fn insert_one(&self, object: &BitVector) {
        let mut node = &self.root;

        loop {
            let nearest = self
                .optimizer
                .nearest_by(object, node.keys(), AccumulatorKey::key);

            if node.is_leaf() {
                let mut stats = nearest
                    .key
                    .stats
                    .as_ref()
                    .expect("leaf keys carry stats")
                    .lock()
                    .expect("no panics while holding leaf stats");

                stats.sum_squared_error +=
                    self.optimizer.squared_distance(object, &nearest.key.key);
                POSITION_TABLE.accumulate(object.blocks(), &mut stats.accumulator, 1);
                stats.count += 1;
                stats.count_last_pass += 1;

                return;
            }

            node = node.child(nearest.index);
        }
    }

    fn visit_one<Vis: InsertVisitor<BitVector>>(&self, object: &BitVector, visitor: &Vis) {
        let mut node = &self.root;
        let mut level = 1;

        loop {
            let nearest = self
                .optimizer
                .nearest_by(object, node.keys(), AccumulatorKey::key);

            visitor.accept(level, object, &nearest.key.key, nearest.distance);

            if node.is_leaf() {
                let mut stats = nearest
                    .key
                    .stats
                    .as_ref()
                    .expect("leaf keys carry stats")
                    .lock()
                    .expect("no panics while holding leaf stats");

                stats.sum_squared_error +=
                    self.optimizer.squared_distance(object, &nearest.key.key);
                stats.count += 1;
                stats.count_last_pass += 1;

                return;
            }

            node = node.child(nearest.index);
            level += 1;
        }
    }

    /// The two-stage pipeline: a serial reader emits batches into a
    /// bounded channel, parallel workers consume them. Batches are freed
    /// by the worker that processed them.
    fn drive<S>(&self, source: &mut S, handle: &(dyn Fn(Vec<BitVector>) + Sync)) -> crate::Result<u64>
    where
        S: VectorStream,
    {
        let workers = self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        });

        let (tx, rx) = crossbeam_channel::bounded::<Vec<BitVector>>(self.maxtokens);

        let mut total = 0u64;
        let mut read_error = None;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();

                scope.spawn(move || {
                    for batch in rx {
                        handle(batch);
                    }
                });
            }
            drop(rx);

            // Stage A runs serially on this thread
            loop {
                match source.next_batch(self.readsize) {
                    Ok(batch) if batch.is_empty() => break,
                    Ok(batch) => {
                        total += batch.len() as u64;

                        if tx.send(batch).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        read_error = Some(e);
                        break;
                    }
                }
            }

            drop(tx);
        });

        match read_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Flattens the accumulators into new cluster representatives,
    /// bottom-up: each leaf key becomes the majority bits of its own
    /// accumulator, each internal key the majority over the accumulators
    /// and counts gathered from the subtree below its child.
    ///
    /// Accumulators are not cleared; use
    /// [`StreamingEmTree::clear_accumulators`] to start the next pass
    /// from scratch.
    pub fn update(&mut self) {
        update_node(&mut self.root, self.dimensions);
    }

    /// Removes every subtree with a total count of zero. Returns the
    /// number of removed entries.
    pub fn prune(&mut self) -> usize {
        let pruned = prune_node(&mut self.root);
        log::debug!("pruned {pruned} empty streaming clusters");
        pruned
    }

    /// Zeroes every leaf accumulator and its total count.
    pub fn clear_accumulators(&mut self) {
        for_each_leaf_stats(&mut self.root, &mut |stats| {
            stats.accumulator.fill(0);
            stats.count = 0;
        });
    }

    /// Zeroes every leaf's per-pass count and running squared error.
    pub fn clear_count_last_pass_and_sse(&mut self) {
        for_each_leaf_stats(&mut self.root, &mut |stats| {
            stats.count_last_pass = 0;
            stats.sum_squared_error = 0.0;
        });
    }

    /// Total vectors counted across the whole run.
    #[must_use]
    pub fn object_count(&self) -> u64 {
        subtree_count(&self.root)
    }

    /// Vectors counted in the current pass.
    #[must_use]
    pub fn object_count_last_pass(&self) -> u64 {
        let mut total = 0;
        read_leaf_stats(&self.root, &mut |stats| total += stats.count_last_pass);
        total
    }

    /// Root-mean-square distance of the counted vectors to the cluster
    /// representatives they reached.
    #[must_use]
    pub fn rmse(&self) -> f64 {
        let count = self.object_count();
        if count == 0 {
            return 0.0;
        }

        let mut sse = 0.0;
        read_leaf_stats(&self.root, &mut |stats| sse += stats.sum_squared_error);

        (sse / count as f64).sqrt()
    }

    /// Number of cluster entries `depth` levels below the root.
    #[must_use]
    pub fn cluster_count(&self, depth: usize) -> usize {
        cluster_count(&self.root, depth)
    }

    /// Number of levels of the deepest branch.
    #[must_use]
    pub fn max_level_count(&self) -> usize {
        self.root.max_level_count()
    }
}

fn deep_copy(source: &Node<Key<'_, BitVector>>, target: &mut Node<AccumulatorKey>, dimensions: usize) {
    for (key, child) in source.keys().iter().zip(source.children()) {
        let key = key.vector().clone();

        if child.is_leaf() {
            // the copy stops above the source's leaves; this level becomes
            // the accumulator-carrying cluster representatives
            target.push_key(AccumulatorKey {
                key,
                stats: Some(Mutex::new(LeafStats::zeroed(dimensions))),
            });
        } else {
            let mut copy = Node::new();
            deep_copy(child, &mut copy, dimensions);

            target.push_entry(AccumulatorKey { key, stats: None }, copy);
        }
    }
}

fn update_node(node: &mut Node<AccumulatorKey>, dimensions: usize) {
    if node.is_leaf() {
        for key in node.keys_mut() {
            let AccumulatorKey { key, stats } = key;
            let stats = stats
                .as_mut()
                .expect("leaf keys carry stats")
                .get_mut()
                .expect("no panics while holding leaf stats");

            flatten(key, &stats.accumulator, stats.count);
        }
    } else {
        let (keys, children) = node.entries_mut();

        for (key, child) in keys.iter_mut().zip(children) {
            let mut accumulator = vec![0u32; dimensions];
            let mut count = 0;
            gather(child, &mut accumulator, &mut count);

            flatten(&mut key.key, &accumulator, count);
        }

        for child in node.children_mut() {
            update_node(child, dimensions);
        }
    }
}

/// Sums the accumulators and counts of every leaf key below `node`.
fn gather(node: &Node<AccumulatorKey>, accumulator: &mut [u32], count: &mut u64) {
    if node.is_leaf() {
        for key in node.keys() {
            let stats = key
                .stats
                .as_ref()
                .expect("leaf keys carry stats")
                .lock()
                .expect("no panics while holding leaf stats");

            for (total, &part) in accumulator.iter_mut().zip(&stats.accumulator) {
                *total += part;
            }
            *count += stats.count;
        }
    } else {
        for child in node.children() {
            gather(child, accumulator, count);
        }
    }
}

/// The majority-bit flatten: set every dimension whose accumulated count
/// exceeds half the vector count.
fn flatten(key: &mut BitVector, accumulator: &[u32], count: u64) {
    key.clear();

    let half = count / 2;
    for (dimension, &bit_count) in accumulator.iter().enumerate() {
        if u64::from(bit_count) > half {
            key.set(dimension);
        }
    }
}

fn prune_node(node: &mut Node<AccumulatorKey>) -> usize {
    let mut pruned = 0;

    for i in 0..node.len() {
        if entry_count(node, i) == 0 {
            node.remove(i);
            pruned += 1;
        } else if !node.is_leaf() {
            pruned += prune_node(node.child_mut(i));
        }
    }

    node.finalize_removals();
    pruned
}

/// Total count of cluster `i` of `node`.
fn entry_count(node: &Node<AccumulatorKey>, i: usize) -> u64 {
    if node.is_leaf() {
        node.keys()
            .get(i)
            .expect("entry index in range")
            .stats
            .as_ref()
            .expect("leaf keys carry stats")
            .lock()
            .expect("no panics while holding leaf stats")
            .count
    } else {
        subtree_count(node.child(i))
    }
}

fn subtree_count(node: &Node<AccumulatorKey>) -> u64 {
    let mut total = 0;
    read_leaf_stats(node, &mut |stats| total += stats.count);
    total
}

fn entry_sse(node: &Node<AccumulatorKey>, i: usize) -> f64 {
    if node.is_leaf() {
        node.keys()
            .get(i)
            .expect("entry index in range")
            .stats
            .as_ref()
            .expect("leaf keys carry stats")
            .lock()
            .expect("no panics while holding leaf stats")
            .sum_squared_error
    } else {
        let mut total = 0.0;
        read_leaf_stats(node.child(i), &mut |stats| total += stats.sum_squared_error);
        total
    }
}

fn read_leaf_stats(node: &Node<AccumulatorKey>, f: &mut impl FnMut(&LeafStats)) {
    if node.is_leaf() {
        for key in node.keys() {
            let stats = key
                .stats
                .as_ref()
                .expect("leaf keys carry stats")
                .lock()
                .expect("no panics while holding leaf stats");

            f(&stats);
        }
    } else {
        for child in node.children() {
            read_leaf_stats(child, f);
        }
    }
}

fn for_each_leaf_stats(node: &mut Node<AccumulatorKey>, f: &mut impl FnMut(&mut LeafStats)) {
    if node.is_leaf() {
        for key in node.keys_mut() {
            let stats = key
                .stats
                .as_mut()
                .expect("leaf keys carry stats")
                .get_mut()
                .expect("no panics while holding leaf stats");

            f(stats);
        }
    } else {
        for child in node.children_mut() {
            for_each_leaf_stats(child, f);
        }
    }
}

fn cluster_count(node: &Node<AccumulatorKey>, depth: usize) -> usize {
    if depth <= 1 {
        node.len()
    } else {
        node.children()
            .iter()
            .map(|child| cluster_count(child, depth - 1))
            .sum()
    }
}

fn visit_clusters<Vis: ClusterVisitor<BitVector>>(
    node: &Node<AccumulatorKey>,
    parent: Option<&BitVector>,
    level: usize,
    visitor: &mut Vis,
) {
    for (i, key) in node.keys().iter().enumerate() {
        let count = entry_count(node, i);
        let sse = entry_sse(node, i);
        let rmse = if count == 0 {
            0.0
        } else {
            (sse / count as f64).sqrt()
        };

        visitor.accept(level, parent, &key.key, rmse, count);

        if !node.is_leaf() {
            visit_clusters(node.child(i), Some(&key.key), level + 1, visitor);
        }
    }
}
