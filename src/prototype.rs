// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    bitvec::BitVector,
    dense::DenseVector,
    position_table::{MAX_DIMENSIONS, POSITION_TABLE},
};

/// Summarizes a list of vectors into a single vector.
///
/// `weights` is either empty (every member counts once) or holds one weight
/// per member.
pub trait Prototype<V> {
    /// Overwrites `prototype` with the summary of `members`.
    fn update(&self, prototype: &mut V, members: &[&V], weights: &[u32]);
}

/// Per-dimension majority vote over bit vectors.
///
/// Output bit `i` is set iff the (weighted) count of set bits at dimension
/// `i` exceeds half the (weighted) member count. Counts are accumulated
/// through the 16-bit position lookup table; this is the second hot loop of
/// the system next to the Hamming distance.
#[derive(Clone, Copy, Debug, Default)]
pub struct MajorityBit;

impl Prototype<BitVector> for MajorityBit {
    fn update(&self, prototype: &mut BitVector, members: &[&BitVector], weights: &[u32]) {
        assert!(
            prototype.len() <= MAX_DIMENSIONS,
            "prototype dimensionality exceeds {MAX_DIMENSIONS}",
        );
        assert!(
            weights.is_empty() || weights.len() == members.len(),
            "weight count does not match member count",
        );

        let mut counts = vec![0u32; prototype.len()];

        let half: u64 = if weights.is_empty() {
            for member in members {
                POSITION_TABLE.accumulate(member.blocks(), &mut counts, 1);
            }
            (members.len() / 2) as u64
        } else {
            for (member, &weight) in members.iter().zip(weights) {
                POSITION_TABLE.accumulate(member.blocks(), &mut counts, weight);
            }
            weights.iter().map(|w| u64::from(*w)).sum::<u64>() / 2
        };

        prototype.clear();

        for (dimension, &count) in counts.iter().enumerate() {
            if u64::from(count) > half {
                prototype.set(dimension);
            }
        }
    }
}

/// Weighted arithmetic mean over dense vectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mean;

impl Prototype<DenseVector> for Mean {
    fn update(&self, prototype: &mut DenseVector, members: &[&DenseVector], weights: &[u32]) {
        assert!(
            weights.is_empty() || weights.len() == members.len(),
            "weight count does not match member count",
        );

        let values = prototype.values_mut();
        values.fill(0.0);

        let mut total = 0.0f32;

        if weights.is_empty() {
            for member in members {
                for (value, x) in values.iter_mut().zip(member.values()) {
                    *value += x;
                }
            }
            total = members.len() as f32;
        } else {
            for (member, &weight) in members.iter().zip(weights) {
                for (value, x) in values.iter_mut().zip(member.values()) {
                    *value += x * weight as f32;
                }
                total += weight as f32;
            }
        }

        if total > 0.0 {
            for value in values {
                *value /= total;
            }
        }
    }
}
