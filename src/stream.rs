// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{BitVector, Error};
use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

/// A bounded producer of signature batches, usually read from disk.
///
/// An empty batch signals the end of the stream; it is not an error.
pub trait VectorStream {
    /// Reads up to `n` vectors.
    fn next_batch(&mut self, n: usize) -> crate::Result<Vec<BitVector>>;
}

/// Streams signatures from a paired file set: an ASCII identifier file with
/// one ID per line, and a packed binary signature file holding one
/// `length / 8`-byte record per line of the identifier file.
///
/// A trailing truncated signature record is dropped, ending the stream.
pub struct SignatureStream {
    ids: BufReader<File>,
    signatures: BufReader<File>,

    /// Signature length in bits
    length: usize,

    /// Optional cap on the total number of vectors reported
    max_to_read: Option<u64>,

    count: u64,
    buffer: Vec<u8>,
    line: String,
}

impl SignatureStream {
    /// Opens a paired identifier/signature file set with the given
    /// signature length in bits.
    ///
    /// # Errors
    ///
    /// Fails if `length` is not a positive multiple of 64 or either file
    /// cannot be opened.
    pub fn open<P: AsRef<Path>>(id_file: P, signature_file: P, length: usize) -> crate::Result<Self> {
        if length == 0 || length % 64 != 0 {
            return Err(Error::InvalidDimensions(length));
        }

        Ok(Self {
            ids: BufReader::new(File::open(id_file)?),
            signatures: BufReader::new(File::open(signature_file)?),
            length,
            max_to_read: None,
            count: 0,
            buffer: vec![0; length / 8],
            line: String::new(),
        })
    }

    /// Caps the total number of vectors the stream reports.
    #[must_use]
    pub fn max_to_read(mut self, max: u64) -> Self {
        self.max_to_read = Some(max);
        self
    }

    /// The signature length in bits.
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    /// Number of vectors read so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    fn read_one(&mut self) -> crate::Result<Option<BitVector>> {
        if let Some(max) = self.max_to_read {
            if self.count >= max {
                return Ok(None);
            }
        }

        self.line.clear();
        if self.ids.read_line(&mut self.line)? == 0 {
            return Ok(None);
        }

        // NOTE: a short read here means the signature file ended early; the
        // truncated record is dropped and the stream ends
        if self.signatures.read_exact(&mut self.buffer).is_err() {
            return Ok(None);
        }

        let mut vector = BitVector::from_bytes(&self.buffer, self.length);
        vector.set_id(self.line.trim_end());

        self.count += 1;

        Ok(Some(vector))
    }
}

impl VectorStream for SignatureStream {
    fn next_batch(&mut self, n: usize) -> crate::Result<Vec<BitVector>> {
        let mut batch = Vec::with_capacity(n);

        while batch.len() < n {
            match self.read_one()? {
                Some(vector) => batch.push(vector),
                None => break,
            }
        }

        Ok(batch)
    }
}

/// An in-memory vector source, for re-streaming owned vectors.
pub struct VecStream {
    vectors: std::vec::IntoIter<BitVector>,
}

impl VecStream {
    /// Wraps owned vectors as a stream.
    #[must_use]
    pub fn new(vectors: Vec<BitVector>) -> Self {
        Self {
            vectors: vectors.into_iter(),
        }
    }
}

impl VectorStream for VecStream {
    fn next_batch(&mut self, n: usize) -> crate::Result<Vec<BitVector>> {
        Ok(self.vectors.by_ref().take(n).collect())
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    fn write_pair(
        dir: &std::path::Path,
        ids: &[u8],
        signatures: &[u8],
    ) -> (std::path::PathBuf, std::path::PathBuf) {
        let id_path = dir.join("collection_ids.txt");
        let sig_path = dir.join("collection_signatures.bin");

        let mut f = File::create(&id_path).expect("create id file");
        f.write_all(ids).expect("write ids");

        let mut f = File::create(&sig_path).expect("create signature file");
        f.write_all(signatures).expect("write signatures");

        (id_path, sig_path)
    }

    #[test]
    fn stream_reads_paired_files() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut signatures = Vec::new();
        signatures.extend_from_slice(&1u64.to_ne_bytes());
        signatures.extend_from_slice(&2u64.to_ne_bytes());
        signatures.extend_from_slice(&3u64.to_ne_bytes());

        let (ids, sigs) = write_pair(dir.path(), b"doc-a\ndoc-b\ndoc-c\n", &signatures);

        let mut stream = SignatureStream::open(&ids, &sigs, 64)?;
        let batch = stream.next_batch(10)?;

        assert_eq!(3, batch.len());
        assert_eq!(Some("doc-a"), batch[0].id());
        assert_eq!(&[1], batch[0].blocks());
        assert_eq!(Some("doc-c"), batch[2].id());
        assert_eq!(&[3], batch[2].blocks());

        // stream end is a normal empty batch
        assert!(stream.next_batch(10)?.is_empty());
        assert_eq!(3, stream.count());

        Ok(())
    }

    #[test]
    fn stream_trims_crlf_and_whitespace() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut signatures = Vec::new();
        signatures.extend_from_slice(&7u64.to_ne_bytes());
        signatures.extend_from_slice(&8u64.to_ne_bytes());

        let (ids, sigs) = write_pair(dir.path(), b"doc-a \r\ndoc-b\t\n", &signatures);

        let mut stream = SignatureStream::open(&ids, &sigs, 64)?;
        let batch = stream.next_batch(2)?;

        assert_eq!(Some("doc-a"), batch[0].id());
        assert_eq!(Some("doc-b"), batch[1].id());

        Ok(())
    }

    #[test]
    fn stream_drops_truncated_record() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        // two ids but only 1.5 signature records
        let mut signatures = Vec::new();
        signatures.extend_from_slice(&9u64.to_ne_bytes());
        signatures.extend_from_slice(&[0xAA; 4]);

        let (ids, sigs) = write_pair(dir.path(), b"doc-a\ndoc-b\n", &signatures);

        let mut stream = SignatureStream::open(&ids, &sigs, 64)?;
        let batch = stream.next_batch(10)?;

        assert_eq!(1, batch.len());
        assert_eq!(Some("doc-a"), batch[0].id());

        Ok(())
    }

    #[test]
    fn stream_rejects_bad_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (ids, sigs) = write_pair(dir.path(), b"", b"");

        assert!(matches!(
            SignatureStream::open(&ids, &sigs, 100),
            Err(Error::InvalidDimensions(100)),
        ));

        assert!(matches!(
            SignatureStream::open(&ids, &sigs, 0),
            Err(Error::InvalidDimensions(0)),
        ));
    }

    #[test]
    fn stream_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.txt");

        assert!(matches!(
            SignatureStream::open(&missing, &missing, 64),
            Err(Error::Io(_)),
        ));
    }

    #[test]
    fn stream_respects_read_cap() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let mut signatures = Vec::new();
        for i in 0..5u64 {
            signatures.extend_from_slice(&i.to_ne_bytes());
        }

        let (ids, sigs) = write_pair(dir.path(), b"a\nb\nc\nd\ne\n", &signatures);

        let mut stream = SignatureStream::open(&ids, &sigs, 64)?.max_to_read(2);

        assert_eq!(2, stream.next_batch(10)?.len());
        assert!(stream.next_batch(10)?.is_empty());

        Ok(())
    }

    #[test]
    fn vec_stream_batches() -> crate::Result<()> {
        let vectors: Vec<BitVector> = (0..5u64)
            .map(|i| BitVector::from_blocks(vec![i]))
            .collect();

        let mut stream = VecStream::new(vectors);

        assert_eq!(2, stream.next_batch(2)?.len());
        assert_eq!(2, stream.next_batch(2)?.len());
        assert_eq!(1, stream.next_batch(2)?.len());
        assert!(stream.next_batch(2)?.is_empty());

        Ok(())
    }
}
