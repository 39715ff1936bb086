//! File content fingerprinting.

use xxhash_rust::xxh3::Xxh3;

/// Incremental 64-bit content digest (xxh3).
#[derive(Default)]
pub struct FileDigest {
    state: Xxh3,
}

impl FileDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Digest of everything fed so far. Does not consume the state, so
    /// a rolling digest can be published after every block.
    pub fn digest(&self) -> u64 {
        self.state.digest()
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

/// Fingerprint of the indexed byte range.
///
/// `full_digest` is only maintained when fast modification detection is
/// off; the header/tail pair is always populated at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexedHash {
    /// Total bytes covered by the index.
    pub size: u64,
    pub full_digest: u64,
    pub header_digest: u64,
    pub header_size: u64,
    pub tail_digest: u64,
    pub tail_offset: u64,
    pub tail_size: u64,
}
