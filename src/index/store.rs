//! Shared index state.
//!
//! One writer or any number of readers: the indexing pipeline takes the
//! exclusive guard for the short window in which it publishes a parsed
//! block, viewers take the shared guard for lookups. Guards release on
//! every exit path, including panics.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::IndexConfig;
use crate::encoding::TextCodec;

use super::digest::{FileDigest, IndexedHash};
use super::position::{FastLinePositionArray, LinePositionArray};

/// The index proper: line offsets, fingerprint, max line width,
/// encoding decisions and progress.
pub struct IndexingData {
    line_position: LinePositionArray,
    hash: IndexedHash,
    hash_builder: FileDigest,
    max_length: u32,
    encoding_guess: Option<TextCodec>,
    encoding_forced: Option<TextCodec>,
    progress: i32,
    fast_modification_detection: bool,
}

impl IndexingData {
    fn new(config: &IndexConfig) -> Self {
        Self {
            line_position: LinePositionArray::new(),
            hash: IndexedHash::default(),
            hash_builder: FileDigest::new(),
            max_length: 0,
            encoding_guess: None,
            encoding_forced: None,
            progress: 0,
            fast_modification_detection: config.fast_modification_detection,
        }
    }

    pub fn get_indexed_size(&self) -> u64 {
        self.hash.size
    }

    pub fn get_hash(&self) -> IndexedHash {
        self.hash
    }

    /// Maximum tab-expanded line width over all fully indexed lines.
    pub fn get_max_length(&self) -> u32 {
        self.max_length
    }

    pub fn get_nb_lines(&self) -> u64 {
        self.line_position.len() as u64
    }

    /// Byte offset of the first byte after line `line` (zero-based), or
    /// `None` past the end of the index. When the final entry is the
    /// synthetic terminator this is one byte past the end of the file;
    /// consumers slicing line text must clamp to the file size.
    pub fn get_pos_for_line(&self, line: u64) -> Option<u64> {
        self.line_position.get(line as usize)
    }

    pub fn has_fake_final_lf(&self) -> bool {
        self.line_position.has_fake_final_lf()
    }

    pub fn get_encoding_guess(&self) -> Option<TextCodec> {
        self.encoding_guess
    }

    pub fn get_forced_encoding(&self) -> Option<TextCodec> {
        self.encoding_forced
    }

    pub fn get_progress(&self) -> i32 {
        self.progress
    }

    pub fn allocated_size(&self) -> usize {
        self.line_position.allocated_size()
    }

    /// Reset to empty and re-latch the fast-detection mode from config.
    pub fn clear(&mut self, config: &IndexConfig) {
        *self = Self::new(config);
    }

    /// Publish one parsed block: its line positions, the new max line
    /// width, and (unless fast detection is on) the rolling digest.
    pub fn add_all(
        &mut self,
        block: &[u8],
        length: u32,
        positions: &FastLinePositionArray,
        encoding: Option<TextCodec>,
    ) {
        self.max_length = self.max_length.max(length);
        self.line_position.append_list(positions);

        if !block.is_empty() {
            self.hash.size += block.len() as u64;

            if !self.fast_modification_detection {
                self.hash_builder.add_data(block);
                self.hash.full_digest = self.hash_builder.digest();
            }
        }

        self.encoding_guess = encoding;
    }

    pub fn set_header_hash(&mut self, digest: u64, size: u64) {
        self.hash.header_digest = digest;
        self.hash.header_size = size;
    }

    pub fn set_tail_hash(&mut self, digest: u64, offset: u64, size: u64) {
        self.hash.tail_digest = digest;
        self.hash.tail_offset = offset;
        self.hash.tail_size = size;
    }

    pub fn set_encoding_guess(&mut self, codec: Option<TextCodec>) {
        self.encoding_guess = codec;
    }

    pub fn force_encoding(&mut self, codec: Option<TextCodec>) {
        self.encoding_forced = codec;
    }

    pub fn set_progress(&mut self, progress: i32) {
        self.progress = progress;
    }
}

/// Handle to the shared index. Cloning shares the same underlying data.
#[derive(Clone)]
pub struct IndexStore {
    inner: Arc<RwLock<IndexingData>>,
}

impl IndexStore {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(IndexingData::new(config))),
        }
    }

    /// Shared read-only accessor.
    pub fn read(&self) -> RwLockReadGuard<'_, IndexingData> {
        self.inner.read()
    }

    /// Exclusive mutating accessor.
    pub fn write(&self) -> RwLockWriteGuard<'_, IndexingData> {
        self.inner.write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(offsets: &[u64]) -> FastLinePositionArray {
        let mut list = FastLinePositionArray::new();
        for &offset in offsets {
            list.append(offset);
        }
        list
    }

    #[test]
    fn empty_store() {
        let store = IndexStore::new(&IndexConfig::default());
        let data = store.read();
        assert_eq!(data.get_nb_lines(), 0);
        assert_eq!(data.get_indexed_size(), 0);
        assert_eq!(data.get_max_length(), 0);
        assert_eq!(data.get_pos_for_line(0), None);
        assert_eq!(data.get_encoding_guess(), None);
    }

    #[test]
    fn add_all_updates_size_lines_and_hash() {
        let store = IndexStore::new(&IndexConfig::default());
        let block = b"a\nbb\nccc\n";

        let mut data = store.write();
        data.add_all(block, 3, &positions(&[2, 5, 9]), Some(TextCodec::Utf8));

        assert_eq!(data.get_nb_lines(), 3);
        assert_eq!(data.get_indexed_size(), block.len() as u64);
        assert_eq!(data.get_max_length(), 3);
        assert_eq!(data.get_pos_for_line(0), Some(2));
        assert_eq!(data.get_pos_for_line(2), Some(9));
        assert_ne!(data.get_hash().full_digest, 0);
        assert_eq!(data.get_encoding_guess(), Some(TextCodec::Utf8));
    }

    #[test]
    fn fast_mode_skips_full_digest() {
        let config = IndexConfig {
            fast_modification_detection: true,
            ..IndexConfig::default()
        };
        let store = IndexStore::new(&config);

        let mut data = store.write();
        data.add_all(b"a\n", 1, &positions(&[2]), Some(TextCodec::Utf8));

        assert_eq!(data.get_indexed_size(), 2);
        assert_eq!(data.get_hash().full_digest, 0);
    }

    #[test]
    fn empty_block_only_updates_encoding() {
        let store = IndexStore::new(&IndexConfig::default());

        let mut data = store.write();
        data.add_all(&[], 0, &positions(&[]), Some(TextCodec::Utf16Le));

        assert_eq!(data.get_indexed_size(), 0);
        assert_eq!(data.get_hash().full_digest, 0);
        assert_eq!(data.get_encoding_guess(), Some(TextCodec::Utf16Le));
    }

    #[test]
    fn max_length_never_decreases() {
        let store = IndexStore::new(&IndexConfig::default());

        let mut data = store.write();
        data.add_all(b"long\n", 42, &positions(&[5]), Some(TextCodec::Utf8));
        data.add_all(b"x\n", 1, &positions(&[7]), Some(TextCodec::Utf8));

        assert_eq!(data.get_max_length(), 42);
    }

    #[test]
    fn clear_resets_everything_and_relatches_config() {
        let store = IndexStore::new(&IndexConfig::default());
        {
            let mut data = store.write();
            data.add_all(b"a\n", 1, &positions(&[2]), Some(TextCodec::Utf8));
            data.force_encoding(Some(TextCodec::Latin1));
            data.set_progress(50);
        }

        let fast = IndexConfig {
            fast_modification_detection: true,
            ..IndexConfig::default()
        };
        {
            let mut data = store.write();
            data.clear(&fast);
            assert_eq!(data.get_nb_lines(), 0);
            assert_eq!(data.get_indexed_size(), 0);
            assert_eq!(data.get_forced_encoding(), None);
            assert_eq!(data.get_progress(), 0);

            // The new mode is live: no full digest on the next block.
            data.add_all(b"b\n", 1, &positions(&[2]), Some(TextCodec::Utf8));
            assert_eq!(data.get_hash().full_digest, 0);
        }
    }

    #[test]
    fn forced_encoding_is_separate_from_guess() {
        let store = IndexStore::new(&IndexConfig::default());

        let mut data = store.write();
        data.force_encoding(Some(TextCodec::Utf16Be));
        data.set_encoding_guess(Some(TextCodec::Utf8));

        assert_eq!(data.get_forced_encoding(), Some(TextCodec::Utf16Be));
        assert_eq!(data.get_encoding_guess(), Some(TextCodec::Utf8));
    }

    #[test]
    fn rolling_digest_matches_single_feed() {
        let store_a = IndexStore::new(&IndexConfig::default());
        {
            let mut data = store_a.write();
            data.add_all(b"part one ", 0, &positions(&[]), Some(TextCodec::Utf8));
            data.add_all(b"part two", 0, &positions(&[]), Some(TextCodec::Utf8));
        }

        let store_b = IndexStore::new(&IndexConfig::default());
        {
            let mut data = store_b.write();
            data.add_all(b"part one part two", 0, &positions(&[]), Some(TextCodec::Utf8));
        }

        assert_eq!(
            store_a.read().get_hash().full_digest,
            store_b.read().get_hash().full_digest
        );
        assert_eq!(store_a.read().get_hash().size, 17);
    }

    #[test]
    fn concurrent_readers_share_access() {
        let store = IndexStore::new(&IndexConfig::default());
        {
            let mut data = store.write();
            data.add_all(b"a\n", 1, &positions(&[2]), Some(TextCodec::Utf8));
        }

        let first = store.read();
        let second = store.read();
        assert_eq!(first.get_nb_lines(), second.get_nb_lines());
    }
}
