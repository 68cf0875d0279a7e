use criterion::{criterion_group, criterion_main, Criterion};
use em_tree::BitVector;

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

fn hamming_distance(c: &mut Criterion) {
    let mut state = 0xDEAD_BEEF_u64;

    for bits in [64, 640, 4_096] {
        let a = random_vector(bits / 64, &mut state);
        let b = random_vector(bits / 64, &mut state);

        c.bench_function(&format!("hamming distance {bits} bit"), |bencher| {
            bencher.iter(|| {
                assert!(a.hamming(&b) <= bits as u64);
            });
        });
    }
}

fn hamming_nearest_scan(c: &mut Criterion) {
    use em_tree::{hamming_optimizer, Optimizer};

    let mut state = 0xCAFE_F00D_u64;

    let candidates: Vec<BitVector> = (0..64).map(|_| random_vector(64, &mut state)).collect();
    let probe = random_vector(64, &mut state);
    let optimizer = hamming_optimizer();

    c.bench_function("nearest of 64 candidates, 4096 bit", |bencher| {
        bencher.iter(|| {
            let nearest = optimizer.nearest(&probe, &candidates);
            assert!(nearest.index < 64);
        });
    });
}

criterion_group!(benches, hamming_distance, hamming_nearest_scan);
criterion_main!(benches);
