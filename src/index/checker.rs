//! Out-of-band change detection.
//!
//! Classifies the on-disk file against the stored fingerprint without
//! touching the index itself. `Truncated` means "the indexed prefix is
//! no longer consistent with disk" — real truncation, a rewrite, or
//! replacement by a different file all land there.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{info, warn};

use crate::config::IndexConfig;

use super::digest::FileDigest;
use super::pipeline::INDEXING_BLOCK_SIZE;
use super::store::IndexStore;

/// Verdict of a file check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoredFileStatus {
    Unchanged,
    DataAdded,
    Truncated,
}

/// Compare the file at `file_name` against the fingerprint stored in
/// the index.
pub fn check_file_changes(
    file_name: &Path,
    store: &IndexStore,
    config: &IndexConfig,
) -> MonitoredFileStatus {
    let indexed_hash = store.read().get_hash();

    let real_file_size = fs::metadata(file_name).map(|meta| meta.len()).unwrap_or(0);
    if real_file_size == 0 || real_file_size < indexed_hash.size {
        info!(real_file_size, indexed_size = indexed_hash.size, "file truncated");
        return MonitoredFileStatus::Truncated;
    }

    let mut file = match File::open(file_name) {
        Ok(file) => file,
        Err(error) => {
            info!(%error, "file failed to open");
            return MonitoredFileStatus::Truncated;
        }
    };

    let mut buffer = vec![0u8; INDEXING_BLOCK_SIZE];

    let is_file_modified = if config.fast_modification_detection {
        let header_digest = digest_range(&mut file, &mut buffer, indexed_hash.header_size);
        info!(
            indexed = indexed_hash.header_digest,
            current = header_digest,
            size = indexed_hash.header_size,
            "header digest"
        );

        if header_digest != indexed_hash.header_digest {
            true
        } else if file.seek(SeekFrom::Start(indexed_hash.tail_offset)).is_err() {
            true
        } else {
            let tail_digest = digest_range(&mut file, &mut buffer, indexed_hash.tail_size);
            info!(
                indexed = indexed_hash.tail_digest,
                current = tail_digest,
                size = indexed_hash.tail_size,
                "tail digest"
            );
            tail_digest != indexed_hash.tail_digest
        }
    } else {
        let full_digest = digest_range(&mut file, &mut buffer, indexed_hash.size);
        info!(
            indexed = indexed_hash.full_digest,
            current = full_digest,
            "full digest"
        );
        full_digest != indexed_hash.full_digest
    };

    if is_file_modified {
        info!("file changed in indexed range");
        MonitoredFileStatus::Truncated
    } else if real_file_size > indexed_hash.size {
        info!("new data on disk");
        MonitoredFileStatus::DataAdded
    } else {
        info!("no change in file");
        MonitoredFileStatus::Unchanged
    }
}

/// Digest of up to `limit` bytes from the file's current position. A
/// read error ends the range early; the resulting mismatch classifies
/// the file as modified.
fn digest_range(file: &mut File, buffer: &mut [u8], limit: u64) -> u64 {
    let mut digest = FileDigest::new();
    let mut total: u64 = 0;

    while total < limit {
        let want = buffer.len().min((limit - total) as usize);
        match file.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(read) => {
                digest.add_data(&buffer[..read]);
                total += read as u64;
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(%error, "read failed while fingerprinting");
                break;
            }
        }
    }

    digest.digest()
}
