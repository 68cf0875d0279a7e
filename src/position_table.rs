// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::sync::LazyLock;

/// The prototype counts one `u32` per dimension, so dimensionality is capped
/// by what one table pass can address.
pub const MAX_DIMENSIONS: usize = 65_536;

const CHUNK_BITS: usize = 16;

struct Entry {
    len: u8,
    positions: [u8; CHUNK_BITS],
}

/// Maps every 16-bit value to the list of bit positions set in it.
///
/// Accumulating per-dimension bit counts through this table touches only the
/// set positions of each chunk instead of testing all 64 bits of a block.
pub(crate) struct PositionTable {
    entries: Box<[Entry]>,
}

pub(crate) static POSITION_TABLE: LazyLock<PositionTable> = LazyLock::new(PositionTable::build);

impl PositionTable {
    fn build() -> Self {
        let mut entries = Vec::with_capacity(1 << CHUNK_BITS);

        for value in 0..(1u32 << CHUNK_BITS) {
            let mut positions = [0u8; CHUNK_BITS];
            let mut len = 0u8;

            for bit in 0..CHUNK_BITS {
                if value & (1 << bit) != 0 {
                    positions[usize::from(len)] = bit as u8;
                    len += 1;
                }
            }

            entries.push(Entry { len, positions });
        }

        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    /// Adds `weight` to the count of every dimension set in `chunk`.
    ///
    /// `counts` is the 16-dimension window the chunk maps to.
    #[inline]
    pub fn add(&self, chunk: u16, counts: &mut [u32; CHUNK_BITS], weight: u32) {
        let entry = self
            .entries
            .get(usize::from(chunk))
            .expect("table covers all 16-bit values");

        for &position in entry
            .positions
            .get(0..usize::from(entry.len))
            .expect("position count fits the chunk")
        {
            *counts.get_mut(usize::from(position)).expect("position < 16") += weight;
        }
    }

    /// Accumulates an entire block sequence into a per-dimension count
    /// buffer, one 16-bit chunk at a time.
    ///
    /// `counts` must hold exactly 16 entries per chunk, i.e. one per bit.
    pub fn accumulate(&self, blocks: &[u64], counts: &mut [u32], weight: u32) {
        debug_assert_eq!(blocks.len() * 64, counts.len());

        let mut windows = counts.chunks_exact_mut(CHUNK_BITS);

        for block in blocks {
            for shift in [0u32, 16, 32, 48] {
                let chunk = (block >> shift) as u16;
                let window: &mut [u32; CHUNK_BITS] = windows
                    .next()
                    .expect("one window per chunk")
                    .try_into()
                    .expect("windows are chunk-sized");

                self.add(chunk, window, weight);
            }
        }
    }
}
