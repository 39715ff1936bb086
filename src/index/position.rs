//! Line-offset storage.
//!
//! Offsets are byte positions of line starts: element `i` is where line
//! `i + 1` begins (line 1 implicitly begins at offset 0). A file whose
//! last line has no terminating line feed gets a synthetic final entry
//! one byte past the end of the file, flagged so consumers can clamp.

/// Entries per storage chunk. Chunks are allocated at full capacity and
/// never reallocated, so a reader holding the shared guard can index
/// any already-published element while the writer grows the array.
const POSITIONS_PER_CHUNK: usize = 16 * 1024;

/// Per-block scratch list of absolute line-start offsets.
#[derive(Debug, Clone, Default)]
pub struct FastLinePositionArray {
    positions: Vec<u64>,
    fake_final_lf: bool,
}

impl FastLinePositionArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, position: u64) {
        self.positions.push(position);
    }

    /// Mark the final entry as a synthetic terminator for a file whose
    /// last line has no line feed.
    pub fn set_fake_final_lf(&mut self) {
        self.fake_final_lf = true;
    }

    pub fn has_fake_final_lf(&self) -> bool {
        self.fake_final_lf
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.positions.iter().copied()
    }
}

/// Growable, append-only line-offset array with chunked storage.
#[derive(Debug, Default)]
pub struct LinePositionArray {
    chunks: Vec<Vec<u64>>,
    len: usize,
    fake_final_lf: bool,
}

impl LinePositionArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_fake_final_lf(&self) -> bool {
        self.fake_final_lf
    }

    /// O(1) lookup of the offset at `index`.
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len {
            return None;
        }
        let chunk = index / POSITIONS_PER_CHUNK;
        let within = index % POSITIONS_PER_CHUNK;
        Some(self.chunks[chunk][within])
    }

    pub fn last(&self) -> Option<u64> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    /// Append a block's worth of positions.
    ///
    /// A synthetic terminator left by a previous append is replaced by
    /// the real data now covering it.
    pub fn append_list(&mut self, positions: &FastLinePositionArray) {
        if positions.is_empty() {
            return;
        }

        if self.fake_final_lf {
            self.pop();
        }

        for position in positions.iter() {
            self.push(position);
        }
        self.fake_final_lf = positions.has_fake_final_lf();
    }

    /// Allocated byte footprint of the chunk storage.
    pub fn allocated_size(&self) -> usize {
        self.chunks
            .iter()
            .map(|chunk| chunk.capacity() * std::mem::size_of::<u64>())
            .sum()
    }

    fn push(&mut self, position: u64) {
        if self.len == self.chunks.len() * POSITIONS_PER_CHUNK {
            self.chunks.push(Vec::with_capacity(POSITIONS_PER_CHUNK));
        }
        let chunk = self
            .chunks
            .last_mut()
            .expect("chunk allocated on demand above");
        chunk.push(position);
        self.len += 1;
    }

    fn pop(&mut self) {
        if let Some(chunk) = self.chunks.last_mut() {
            chunk.pop();
            self.len -= 1;
            if chunk.is_empty() {
                self.chunks.pop();
            }
        }
    }
}
