//! The indexing pipeline: an IO thread reading fixed-size blocks, a
//! bounded prefetch buffer, and a strictly serial parser.
//!
//! The parser must be serial — it mutates the run state and the shared
//! store, and the offset sequence has to stay strictly increasing — so
//! the pipeline is two threads: the dedicated reader, and the driver
//! thread pulling blocks off the channel and parsing them in order.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::IndexConfig;
use crate::encoding::{EncodingDetector, EncodingParameters, TextCodec};
use crate::readable_size::readable_size;

use super::digest::FileDigest;
use super::parse::{decide_encoding, parse_data_block, IndexingState};
use super::position::FastLinePositionArray;
use super::store::IndexStore;
use super::worker::{EventSender, InterruptRequest, Notifier};

/// Unit of IO, of parsing, and of the header/tail hash windows.
pub const INDEXING_BLOCK_SIZE: usize = 1024 * 1024;

/// A block and its starting offset; a negative offset is the
/// end-of-stream sentinel.
type BlockData = (i64, Vec<u8>);

/// Shared body of the full- and partial-index operations.
pub(crate) struct IndexOperation {
    pub file_name: PathBuf,
    pub store: IndexStore,
    pub config: IndexConfig,
    pub interrupt: InterruptRequest,
    pub detector: Arc<dyn EncodingDetector>,
    pub events: EventSender,
    pub notifier: Notifier,
}

impl IndexOperation {
    /// Index the file from `initial_position` to its end.
    pub fn do_index(&self, initial_position: u64) -> Result<()> {
        let mut file = match File::open(&self.file_name) {
            Ok(file) => file,
            Err(error) => {
                // An unopenable file is treated as an empty one.
                warn!(file = %self.file_name.display(), %error, "cannot open file");

                let mut data = self.store.write();
                data.clear(&self.config);
                data.set_encoding_guess(Some(TextCodec::locale_default()));
                data.set_progress(100);
                drop(data);

                self.events.indexing_progressed(100);
                return Ok(());
            }
        };

        let file_size = file
            .metadata()
            .context("reading file metadata before indexing")?
            .len();

        let mut state = IndexingState {
            pos: initial_position,
            file_size,
            ..IndexingState::default()
        };

        {
            let data = self.store.read();
            state.file_codec = data
                .get_forced_encoding()
                .or_else(|| data.get_encoding_guess());
            state.encoding_guess = data.get_encoding_guess();
        }
        if let Some(codec) = state.file_codec {
            state.encoding_params = EncodingParameters::from_codec(codec);
        }

        let prefetch_blocks = self.config.prefetch_blocks();
        info!(
            "prefetch buffer {}",
            readable_size((prefetch_blocks * INDEXING_BLOCK_SIZE) as u64)
        );

        let indexing_start = Instant::now();

        file.seek(SeekFrom::Start(state.pos))
            .context("seeking to the indexing start position")?;

        let (blocks_tx, blocks_rx) = mpsc::sync_channel::<BlockData>(prefetch_blocks);
        let reader_interrupt = self.interrupt.clone();
        let reader_start = state.pos;
        let io_thread = thread::Builder::new()
            .name("logdex-io".into())
            .spawn(move || {
                let io_duration =
                    read_file_in_blocks(&mut file, reader_start, &blocks_tx, &reader_interrupt);
                (file, io_duration)
            })
            .context("spawning the io thread")?;

        // Serial parser: blocks arrive in file order and are parsed in
        // file order, one at a time.
        while let Ok((block_beginning, block)) = blocks_rx.recv() {
            if block_beginning < 0 {
                break;
            }
            self.index_next_block(&mut state, block_beginning as u64, &block);
        }

        let (mut file, io_duration) = io_thread
            .join()
            .map_err(|_| anyhow!("io thread panicked"))?;

        self.finish_index(&mut file, &state, indexing_start.elapsed(), io_duration)
    }

    /// Parse one block and publish its results under a single exclusive
    /// window, so readers stay responsive between blocks.
    fn index_next_block(&self, state: &mut IndexingState, block_beginning: u64, block: &[u8]) {
        debug!(block_beginning, size = block.len(), "indexing block");

        let mut data = self.store.write();

        decide_encoding(self.detector.as_ref(), block, &data, state);

        if !block.is_empty() {
            let line_positions = parse_data_block(block_beginning, block, state);

            let mut max_length = state.max_length;
            if max_length > i64::from(u32::MAX) {
                error!(max_length, "line too long to index");
                max_length = i64::from(u32::MAX);
            }

            data.add_all(block, max_length as u32, &line_positions, state.encoding_guess);

            let progress = if state.file_size > 0 {
                calculate_progress(state.pos, state.file_size)
            } else {
                100
            };

            if progress != data.get_progress() {
                data.set_progress(progress);
                info!(progress, indexed = state.pos, "indexing progress");
                self.events.indexing_progressed(progress);
            }
        } else {
            data.set_encoding_guess(state.encoding_guess);
        }
    }

    /// Post-parse finalization: synthetic final line, header/tail
    /// fingerprints, summary logging, interrupt and overflow handling.
    fn finish_index(
        &self,
        file: &mut File,
        state: &IndexingState,
        duration: Duration,
        io_duration: Duration,
    ) -> Result<()> {
        let mut data = self.store.write();

        debug!(indexed_up_to = state.pos, "parser drained");

        if !self.interrupt.is_set() && state.file_size > state.pos {
            warn!("file not terminated by a line feed, adding a synthetic final line");

            let mut line_position = FastLinePositionArray::new();
            line_position.append(state.file_size + 1);
            line_position.set_fake_final_lf();

            data.add_all(&[], 0, &line_position, state.encoding_guess);
        }

        let end_file_pos = file
            .stream_position()
            .context("reading the end position after indexing")?;

        file.seek(SeekFrom::Start(0))
            .context("seeking back for the header fingerprint")?;
        let mut hash_buffer = vec![0u8; INDEXING_BLOCK_SIZE];
        let header_size = read_up_to(file, &mut hash_buffer)
            .context("reading the header fingerprint window")?;

        let mut digest = FileDigest::new();
        digest.add_data(&hash_buffer[..header_size]);
        data.set_header_hash(digest.digest(), header_size as u64);

        if end_file_pos <= hash_buffer.len() as u64 {
            // The whole file fits one block: header and tail coincide.
            data.set_tail_hash(digest.digest(), 0, header_size as u64);
        } else {
            let tail_offset = end_file_pos - hash_buffer.len() as u64;
            file.seek(SeekFrom::Start(tail_offset))
                .context("seeking to the tail fingerprint window")?;
            let tail_size =
                read_up_to(file, &mut hash_buffer).context("reading the tail fingerprint window")?;

            digest.reset();
            digest.add_data(&hash_buffer[..tail_size]);
            data.set_tail_hash(digest.digest(), tail_offset, tail_size as u64);
        }

        if !self.interrupt.is_set() && data.get_progress() != 100 {
            data.set_progress(100);
            self.events.indexing_progressed(100);
        }

        info!(?duration, io = ?io_duration, "indexing done");
        info!(
            index_size = %readable_size(data.allocated_size() as u64),
            lines = data.get_nb_lines(),
            max_length = data.get_max_length(),
            "index stats"
        );
        let elapsed = duration.as_secs_f64();
        if elapsed > 0.0 {
            info!(
                "indexing perf {:.2} MiB/s",
                state.file_size as f64 / elapsed / (1024.0 * 1024.0)
            );
        }

        if self.interrupt.is_set() {
            data.clear(&self.config);
        }

        if data.get_max_length() == u32::MAX {
            (self.notifier)("cannot index the file: some lines are too long");
            data.clear(&self.config);
        }

        if data.get_encoding_guess().is_none() {
            data.set_encoding_guess(Some(TextCodec::locale_default()));
        }

        Ok(())
    }
}

fn calculate_progress(pos: u64, file_size: u64) -> i32 {
    (pos.saturating_mul(100) / file_size).min(100) as i32
}

/// Reader loop, run on the dedicated IO thread. Emits blocks in file
/// order, shrinks the last one to the bytes actually read, and always
/// terminates the stream with the sentinel. Returns time spent in IO.
fn read_file_in_blocks(
    file: &mut File,
    mut pos: u64,
    blocks: &SyncSender<BlockData>,
    interrupt: &InterruptRequest,
) -> Duration {
    info!("starting io thread");
    let mut io_duration = Duration::ZERO;

    loop {
        if interrupt.is_set() {
            break;
        }

        let mut block = vec![0u8; INDEXING_BLOCK_SIZE];
        let io_start = Instant::now();
        let read = read_up_to(file, &mut block);
        io_duration += io_start.elapsed();

        match read {
            Ok(0) => break,
            Ok(bytes) => {
                block.truncate(bytes);
                debug!(block_beginning = pos, size = bytes, "sending block");
                if !send_with_backpressure(blocks, (pos as i64, block)) {
                    break;
                }
                pos += bytes as u64;
            }
            Err(error) => {
                error!(%error, "read failed, treating as end of file");
                break;
            }
        }
    }

    send_with_backpressure(blocks, (-1, Vec::new()));

    info!("io thread done");
    io_duration
}

/// Busy-wait send: retry every millisecond while the prefetch buffer is
/// full, so the reader stays interruptible without unbounded memory.
fn send_with_backpressure(blocks: &SyncSender<BlockData>, block: BlockData) -> bool {
    let mut pending = block;
    loop {
        match blocks.try_send(pending) {
            Ok(()) => return true,
            Err(TrySendError::Full(block)) => {
                pending = block;
                thread::sleep(Duration::from_millis(1));
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

/// Read until the buffer is full or the file ends; short reads are
/// retried so a block only shrinks at end of file.
fn read_up_to(file: &mut File, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buffer.len() {
        match file.read(&mut buffer[total..]) {
            Ok(0) => break,
            Ok(read) => total += read,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(total)
}
