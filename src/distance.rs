// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{bitvec::BitVector, dense::DenseVector};

/// A dissimilarity between two vectors of the same length.
pub trait Distance<V: ?Sized> {
    /// Returns the distance.
    fn distance(&self, a: &V, b: &V) -> f64;

    /// Returns the squared distance, for squared-error aggregation.
    fn squared(&self, a: &V, b: &V) -> f64 {
        let d = self.distance(a, b);
        d * d
    }
}

/// Hamming distance over bit vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Hamming;

impl Distance<BitVector> for Hamming {
    fn distance(&self, a: &BitVector, b: &BitVector) -> f64 {
        a.hamming(b) as f64
    }
}

/// Euclidean distance over dense vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Euclidean;

impl Distance<DenseVector> for Euclidean {
    fn distance(&self, a: &DenseVector, b: &DenseVector) -> f64 {
        self.squared(a, b).sqrt()
    }

    fn squared(&self, a: &DenseVector, b: &DenseVector) -> f64 {
        assert_eq!(
            a.len(),
            b.len(),
            "euclidean distance over mismatched lengths",
        );

        a.values()
            .iter()
            .zip(b.values())
            .map(|(x, y)| {
                let d = f64::from(x - y);
                d * d
            })
            .sum()
    }
}
