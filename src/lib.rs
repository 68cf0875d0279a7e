// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hierarchical clustering of massive binary signature collections.
//!
//! ##### About
//!
//! This crate clusters very large sets of fixed-length bit vectors (in the
//! canonical workload, tens of millions of 4096-bit document signatures)
//! into deep balanced trees whose internal nodes are cluster centroids.
//!
//! Three batch clusterers share one toolkit of Hamming-distance kernels,
//! bitwise-majority prototypes, seeding strategies and a parallel k-means:
//!
//! - [`Tsvq`] builds a balanced tree top-down, splitting every node with
//!   k-means and refining siblings in parallel.
//! - [`EmTree`] iteratively refines a fixed-shape tree with global EM
//!   steps (reinsert all items, prune empty subtrees, recompute means).
//! - [`KTree`] inserts one vector at a time with B-tree-style 2-means
//!   node splits, keeping every leaf at the same depth.
//!
//! For collections that do not fit in memory, [`StreamingEmTree`] copies
//! the shape of a tree built on a sample and refines it with single-pass
//! accumulator updates, fed by a bounded producer/consumer pipeline
//! reading packed signatures from disk ([`SignatureStream`]).
//!
//! # Example usage
//!
//! ```
//! use em_tree::{hamming_optimizer, BitVector, RandomSeeder, Tsvq};
//!
//! // sixteen 128-bit signatures
//! let signatures: Vec<BitVector> = (0..16u64)
//!     .map(|i| BitVector::from_blocks(vec![i.wrapping_mul(0x9E37_79B9_7F4A_7C15), !i]))
//!     .collect();
//! let refs: Vec<&BitVector> = signatures.iter().collect();
//!
//! // a 2-level tree with branching 4, 10 k-means rounds per split
//! let mut tsvq = Tsvq::new(4, 2, Some(10), hamming_optimizer(), RandomSeeder::new());
//! tsvq.cluster(&refs);
//!
//! assert_eq!(16, tsvq.object_count());
//! assert!(tsvq.cluster_count() <= 4);
//! assert!(tsvq.rmse() >= 0.0);
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/fjall-rs/em-tree/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/em-tree/main/logo.png")]
#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

mod bitvec;
mod cluster;
mod dense;
mod distance;
mod em_tree;
mod error;
mod k_tree;
mod kmeans;
mod node;
mod optimizer;
mod position_table;
mod prototype;
mod seeder;
pub mod stats;
mod stream;
mod streaming;
mod tsvq;
mod visitor;

pub use {
    bitvec::{BitVector, BLOCK_BITS},
    cluster::Cluster,
    dense::DenseVector,
    distance::{Distance, Euclidean, Hamming},
    em_tree::EmTree,
    error::{Error, Result},
    k_tree::KTree,
    kmeans::KMeans,
    node::{Key, Node},
    optimizer::{
        hamming_optimizer, Comparator, EuclideanOptimizer, FunctorOptimizer, HammingOptimizer,
        Maximize, Minimize, Nearest, Optimizer,
    },
    position_table::MAX_DIMENSIONS,
    prototype::{MajorityBit, Mean, Prototype},
    seeder::{DSquaredSeeder, RandomSeeder, Seeder},
    stream::{SignatureStream, VecStream, VectorStream},
    streaming::{AccumulatorKey, StreamingEmTree},
    tsvq::Tsvq,
    visitor::{ClusterStatsWriter, ClusterVisitor, ClusterWriter, InsertVisitor},
};
