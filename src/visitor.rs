// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::BitVector;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    sync::Mutex,
};

/// Observes every cluster along an insertion path into a tree.
///
/// `accept` is called once per level during a streaming descent and must be
/// thread-safe; descents run concurrently.
pub trait InsertVisitor<V>: Sync {
    /// Observes one level of a descent: the object, the cluster key chosen
    /// at this level and the distance to it.
    fn accept(&self, level: usize, object: &V, cluster: &V, distance: f64);
}

/// Visits every cluster of a tree with its aggregate statistics.
pub trait ClusterVisitor<V> {
    /// Observes one cluster: its level, parent key (none at the root
    /// level), representative, RMSE and object count.
    fn accept(
        &mut self,
        level: usize,
        parent: Option<&V>,
        cluster: &V,
        rmse: f64,
        object_count: u64,
    );
}

/// Cluster IDs in report output are the address of the cluster-center
/// vector, rendered as lowercase hex: unique within a run, not stable
/// across runs.
fn cluster_id(cluster: &BitVector) -> String {
    format!("{:x}", std::ptr::from_ref(cluster) as usize)
}

/// Writes per-level cluster-membership files: one CSV row per visited
/// assignment, one file per tree level.
///
/// Level files are named `<prefix>_level<n>_clusters.txt`.
pub struct ClusterWriter {
    levels: Vec<Mutex<BufWriter<File>>>,
}

impl ClusterWriter {
    /// Creates the per-level output files.
    ///
    /// # Errors
    ///
    /// Fails if a level file cannot be created.
    pub fn create<P: AsRef<Path>>(prefix: P, levels: usize) -> crate::Result<Self> {
        let prefix = prefix.as_ref();
        let mut files = Vec::with_capacity(levels);

        for level in 1..=levels {
            let path = sibling_file(prefix, &format!("level{level}_clusters.txt"));
            let mut writer = BufWriter::new(File::create(path)?);

            writeln!(writer, "object ID, cluster ID, distance to cluster center")?;
            files.push(Mutex::new(writer));
        }

        Ok(Self { levels: files })
    }

    /// Flushes all level files.
    ///
    /// # Errors
    ///
    /// Fails if flushing a level file fails.
    pub fn finish(self) -> crate::Result<()> {
        for writer in self.levels {
            writer
                .into_inner()
                .map_err(|_| poisoned())?
                .flush()?;
        }

        Ok(())
    }
}

impl InsertVisitor<BitVector> for ClusterWriter {
    fn accept(&self, level: usize, object: &BitVector, cluster: &BitVector, distance: f64) {
        let Some(writer) = self.levels.get(level - 1) else {
            return;
        };

        let mut writer = writer.lock().expect("no panics while writing");

        // NOTE: errors are reported on finish(); per-row results would
        // poison the hot insert path
        let _ = writeln!(
            writer,
            "{},{},{distance}",
            object.id().unwrap_or_default(),
            cluster_id(cluster),
        );
    }
}

/// Writes per-level cluster-statistics files: one CSV row per cluster,
/// one file per tree level.
///
/// Level files are named `<prefix>_level<n>_stats.txt`.
pub struct ClusterStatsWriter {
    levels: Vec<BufWriter<File>>,
}

impl ClusterStatsWriter {
    /// Creates the per-level output files.
    ///
    /// # Errors
    ///
    /// Fails if a level file cannot be created.
    pub fn create<P: AsRef<Path>>(prefix: P, levels: usize) -> crate::Result<Self> {
        let prefix = prefix.as_ref();
        let mut files = Vec::with_capacity(levels);

        for level in 1..=levels {
            let path = sibling_file(prefix, &format!("level{level}_stats.txt"));
            let mut writer = BufWriter::new(File::create(path)?);

            writeln!(writer, "parent cluster ID, cluster ID, RMSE, object count")?;
            files.push(writer);
        }

        Ok(Self { levels: files })
    }

    /// Flushes all level files.
    ///
    /// # Errors
    ///
    /// Fails if flushing a level file fails.
    pub fn finish(mut self) -> crate::Result<()> {
        for writer in &mut self.levels {
            writer.flush()?;
        }

        Ok(())
    }
}

impl ClusterVisitor<BitVector> for ClusterStatsWriter {
    fn accept(
        &mut self,
        level: usize,
        parent: Option<&BitVector>,
        cluster: &BitVector,
        rmse: f64,
        object_count: u64,
    ) {
        let Some(writer) = self.levels.get_mut(level - 1) else {
            return;
        };

        let parent = parent.map_or_else(|| "0".into(), cluster_id);

        let _ = writeln!(
            writer,
            "{parent},{},{rmse},{object_count}",
            cluster_id(cluster),
        );
    }
}

fn sibling_file(prefix: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if !name.is_empty() {
        name.push('_');
    }
    name.push_str(suffix);

    prefix.with_file_name(name)
}

fn poisoned() -> crate::Error {
    crate::Error::Io(std::io::Error::other("cluster writer poisoned"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn visitor_sibling_file_names() {
        let path = sibling_file(Path::new("/tmp/run1/wikisig"), "level2_clusters.txt");
        assert_eq!(
            Path::new("/tmp/run1/wikisig_level2_clusters.txt"),
            path.as_path(),
        );
    }

    #[test]
    fn visitor_cluster_writer_rows() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("out");

        let writer = ClusterWriter::create(&prefix, 2)?;

        let mut object = BitVector::from_blocks(vec![1]);
        object.set_id("doc-9");
        let cluster = BitVector::from_blocks(vec![2]);

        writer.accept(1, &object, &cluster, 3.0);
        writer.accept(2, &object, &cluster, 1.0);
        writer.finish()?;

        let level1 = std::fs::read_to_string(dir.path().join("out_level1_clusters.txt"))?;
        let mut lines = level1.lines();

        assert_eq!(
            Some("object ID, cluster ID, distance to cluster center"),
            lines.next(),
        );

        let row = lines.next().expect("one data row");
        assert!(row.starts_with("doc-9,"));
        assert!(row.ends_with(",3"));
        assert_eq!(None, lines.next());

        Ok(())
    }

    #[test]
    fn visitor_stats_writer_rows() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("out");

        let mut writer = ClusterStatsWriter::create(&prefix, 1)?;
        let cluster = BitVector::from_blocks(vec![2]);

        writer.accept(1, None, &cluster, 0.5, 42);
        writer.finish()?;

        let level1 = std::fs::read_to_string(dir.path().join("out_level1_stats.txt"))?;
        let mut lines = level1.lines();

        assert_eq!(
            Some("parent cluster ID, cluster ID, RMSE, object count"),
            lines.next(),
        );

        let row = lines.next().expect("one data row");
        assert!(row.starts_with("0,"));
        assert!(row.ends_with(",0.5,42"));

        Ok(())
    }
}
