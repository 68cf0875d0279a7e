mod common;

use common::FixedSeeder;
use em_tree::{DenseVector, Euclidean, FunctorOptimizer, KMeans, Mean, Minimize, RandomSeeder, Tsvq};
use test_log::test;

fn euclidean_optimizer() -> FunctorOptimizer<Euclidean, Minimize, Mean> {
    FunctorOptimizer::new(Euclidean, Minimize, Mean)
}

#[test]
fn kmeans_over_dense_vectors() {
    // two planar blobs around (0, 1) and (100, 99), interleaved
    let mut data = Vec::new();
    for i in 0..10 {
        data.push(DenseVector::from_values(vec![i as f32 * 0.1, 1.0]));
        data.push(DenseVector::from_values(vec![100.0 + i as f32 * 0.1, 99.0]));
    }
    let refs: Vec<&DenseVector> = data.iter().collect();

    let mut kmeans = KMeans::new(2, euclidean_optimizer(), FixedSeeder(vec![0, 1]))
        .max_iters(None);

    let clusters = kmeans.cluster(&refs);

    assert_eq!(2, clusters.len());
    assert_eq!(10, clusters[0].len());
    assert_eq!(10, clusters[1].len());

    // centroids sit inside their blobs
    let x0 = clusters[0].centroid().values()[0];
    let x1 = clusters[1].centroid().values()[0];
    assert!(x0 < 1.0);
    assert!(x1 > 99.0);
}

#[test]
fn tsvq_over_dense_vectors() {
    let data: Vec<DenseVector> = (0..64)
        .map(|i| DenseVector::from_values(vec![i as f32, (i % 8) as f32]))
        .collect();
    let refs: Vec<&DenseVector> = data.iter().collect();

    let mut tsvq = Tsvq::new(2, 3, Some(10), euclidean_optimizer(), RandomSeeder::with_seed(2));
    tsvq.cluster(&refs);

    assert_eq!(64, tsvq.object_count());
    assert_eq!(3, tsvq.level_count());
    assert_eq!(3, tsvq.max_level_count());
    assert!(tsvq.rmse().is_finite());
}
