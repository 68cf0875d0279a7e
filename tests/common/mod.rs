use em_tree::{BitVector, Seeder};

/// A deterministic seeder picking evenly spaced data points, so structured
/// fixtures split exactly along their group boundaries.
#[derive(Clone)]
#[allow(unused)]
pub struct SpreadSeeder;

impl<V: Clone> Seeder<V> for SpreadSeeder {
    fn seed(&mut self, data: &[&V], count: usize) -> Vec<V> {
        let count = count.min(data.len());

        (0..count)
            .map(|i| data[i * data.len() / count].clone())
            .collect()
    }
}

/// A seeder with a fixed pick list, for scenarios that need exact seeds.
#[derive(Clone)]
#[allow(unused)]
pub struct FixedSeeder(pub Vec<usize>);

impl<V: Clone> Seeder<V> for FixedSeeder {
    fn seed(&mut self, data: &[&V], count: usize) -> Vec<V> {
        assert!(count <= self.0.len(), "not enough fixed seed indices");

        self.0
            .iter()
            .take(count)
            .map(|&i| data[i].clone())
            .collect()
    }
}

/// 1024 vectors of 128 bits in 16 tight groups of 64, arranged as 4
/// super-groups of 4 groups each, written in group order.
///
/// Hamming distances: at most 2 within a group, at least 12 between groups
/// of one super-group, at least 30 across super-groups — so nearest-center
/// descent recovers the hierarchy exactly.
#[allow(unused)]
pub fn grouped_signatures() -> Vec<BitVector> {
    let mut data = Vec::with_capacity(1024);

    for super_group in 0..4u64 {
        for group in 0..4u64 {
            for noise in 0..64u64 {
                let block0 = 0xFFFF << (super_group * 16);
                let block1 = (0xFFu64 << (group * 8)) | (1 << (32 + (noise % 4)));
                data.push(BitVector::from_blocks(vec![block0, block1]));
            }
        }
    }

    data
}
