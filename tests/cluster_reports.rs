use em_tree::{
    hamming_optimizer, BitVector, ClusterStatsWriter, ClusterWriter, Key, Node,
    StreamingEmTree, VecStream,
};
use test_log::test;

fn seed_tree() -> Node<Key<'static, BitVector>> {
    let mut root = Node::new();

    for band in 0..2u64 {
        root.push_entry(
            Key::Centroid(BitVector::from_blocks(vec![0xFFFF_FFFF << (band * 32)])),
            Node::new(),
        );
    }

    root
}

#[test]
fn membership_report_has_one_row_per_assignment() -> em_tree::Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("wiki");

    let root = seed_tree();
    let tree = StreamingEmTree::new(&root, hamming_optimizer())?.worker_threads(Some(2));

    let vectors: Vec<BitVector> = (0..40u64)
        .map(|i| {
            let mut v = BitVector::from_blocks(vec![0xFFFF_FFFF << ((i % 2) * 32)]);
            v.set_id(format!("doc-{i}"));
            v
        })
        .collect();

    let writer = ClusterWriter::create(&prefix, tree.max_level_count())?;
    let visited = tree.visit_stream(&mut VecStream::new(vectors), &writer)?;
    writer.finish()?;

    assert_eq!(40, visited);

    let level1 = std::fs::read_to_string(dir.path().join("wiki_level1_clusters.txt"))?;
    let mut lines = level1.lines();

    assert_eq!(
        Some("object ID, cluster ID, distance to cluster center"),
        lines.next(),
    );

    let rows: Vec<&str> = lines.collect();
    assert_eq!(40, rows.len());

    // every row: id,hex,distance — with exactly two cluster identities
    let mut cluster_ids = std::collections::BTreeSet::new();

    for row in rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(3, fields.len());
        assert!(fields[0].starts_with("doc-"));
        assert!(u64::from_str_radix(fields[1], 16).is_ok());
        assert_eq!("0", fields[2]);

        cluster_ids.insert(fields[1].to_owned());
    }

    assert_eq!(2, cluster_ids.len());

    Ok(())
}

#[test]
fn stats_report_covers_every_cluster() -> em_tree::Result<()> {
    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("wiki");

    let root = seed_tree();
    let tree = StreamingEmTree::new(&root, hamming_optimizer())?;

    tree.insert(&[
        BitVector::from_blocks(vec![0xFFFF_FFFF]),
        BitVector::from_blocks(vec![0xFFFF_FFFF << 32]),
        BitVector::from_blocks(vec![0xFFFF_FFFF << 32]),
    ]);

    let mut writer = ClusterStatsWriter::create(&prefix, tree.max_level_count())?;
    tree.visit_clusters(&mut writer);
    writer.finish()?;

    let level1 = std::fs::read_to_string(dir.path().join("wiki_level1_stats.txt"))?;
    let mut lines = level1.lines();

    assert_eq!(
        Some("parent cluster ID, cluster ID, RMSE, object count"),
        lines.next(),
    );

    let rows: Vec<&str> = lines.collect();
    assert_eq!(2, rows.len());

    // root-level clusters have parent "0"; counts are 1 and 2
    let mut counts = Vec::new();

    for row in rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(4, fields.len());
        assert_eq!("0", fields[0]);
        counts.push(fields[3].parse::<u64>().expect("count field"));
    }

    assert_eq!(vec![1, 2], counts);

    Ok(())
}
