//! Engine tunables.
//!
//! The host application owns config discovery and file parsing; this
//! struct only has to deserialize cleanly when embedded in the host's
//! config file. Unknown fields are rejected with an error.

use serde::Deserialize;

/// Default prefetch depth, in 1 MiB indexing blocks.
const DEFAULT_READ_BUFFER_MB: usize = 16;

/// Tunables consumed by the indexing engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    /// Only fingerprint the first and last block of the file instead of
    /// hashing all indexed content. Cheaper change checks, at the cost
    /// of missing rewrites that touch neither end of the file.
    #[serde(default)]
    pub fast_modification_detection: bool,

    /// How many blocks the reader may run ahead of the parser.
    #[serde(default = "default_read_buffer_mb")]
    pub index_read_buffer_size_mb: usize,
}

fn default_read_buffer_mb() -> usize {
    DEFAULT_READ_BUFFER_MB
}

impl IndexConfig {
    /// Prefetch depth in blocks, clamped to at least one slot.
    pub fn prefetch_blocks(&self) -> usize {
        self.index_read_buffer_size_mb.max(1)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fast_modification_detection: false,
            index_read_buffer_size_mb: DEFAULT_READ_BUFFER_MB,
        }
    }
}
