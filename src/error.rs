// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur during clustering
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Signature length is not a multiple of 64 bits, or exceeds the
    /// prototype dimension cap (65,536)
    InvalidDimensions(usize),

    /// A streaming tree was seeded from a tree with an empty root
    EmptySeed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EmTreeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Clustering result
pub type Result<T> = std::result::Result<T, Error>;
