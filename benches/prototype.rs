use criterion::{criterion_group, criterion_main, Criterion};
use em_tree::{BitVector, MajorityBit, Prototype};

fn random_vector(blocks: usize, state: &mut u64) -> BitVector {
    BitVector::from_blocks(
        (0..blocks)
            .map(|_| {
                *state ^= *state << 13;
                *state ^= *state >> 7;
                *state ^= *state << 17;
                *state
            })
            .collect(),
    )
}

fn majority_prototype(c: &mut Criterion) {
    let mut state = 0x1234_5678_u64;

    for members in [10, 100, 1_000] {
        let vectors: Vec<BitVector> = (0..members)
            .map(|_| random_vector(64, &mut state))
            .collect();
        let refs: Vec<&BitVector> = vectors.iter().collect();

        let mut prototype = BitVector::zeroed(4_096);

        c.bench_function(&format!("majority prototype of {members}, 4096 bit"), |bencher| {
            bencher.iter(|| {
                MajorityBit.update(&mut prototype, &refs, &[]);
            });
        });
    }
}

fn weighted_majority_prototype(c: &mut Criterion) {
    let mut state = 0x8765_4321_u64;

    let vectors: Vec<BitVector> = (0..100).map(|_| random_vector(64, &mut state)).collect();
    let refs: Vec<&BitVector> = vectors.iter().collect();
    let weights: Vec<u32> = (1..=100).collect();

    let mut prototype = BitVector::zeroed(4_096);

    c.bench_function("weighted majority prototype of 100, 4096 bit", |bencher| {
        bencher.iter(|| {
            MajorityBit.update(&mut prototype, &refs, &weights);
        });
    });
}

criterion_group!(benches, majority_prototype, weighted_majority_prototype);
criterion_main!(benches);
