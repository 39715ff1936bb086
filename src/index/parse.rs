//! Block parsing: line terminators, tab expansion, offset emission.
//!
//! A block is parsed against a per-run [`IndexingState`]; offsets are
//! absolute file positions. The parser is strictly serial — state
//! carries a line split across block boundaries (`additional_spaces`)
//! and the strictly increasing `pos` cursor.

use tracing::{debug, error, info};

use crate::encoding::{EncodingDetector, EncodingParameters, TextCodec};

use super::position::FastLinePositionArray;
use super::store::IndexingData;

/// Column multiple to which a tab character expands.
pub const TAB_STOP: i64 = 8;

/// Per-run parsing state, owned by the parser stage.
#[derive(Debug, Default)]
pub struct IndexingState {
    /// Absolute position of the start of the line being parsed.
    pub pos: u64,
    /// Absolute position of the last confirmed line end.
    pub end: u64,
    /// Extra visual columns accumulated for a line split across blocks.
    pub additional_spaces: i64,
    /// Running maximum of tab-expanded line widths. Wider than the
    /// published type so an overflow can be detected and capped.
    pub max_length: i64,
    pub file_size: u64,
    /// Last detector output for this run.
    pub encoding_guess: Option<TextCodec>,
    /// Effective codec the run parses with, fixed on the first block.
    pub file_codec: Option<TextCodec>,
    pub encoding_params: EncodingParameters,
}

type FindDelimiter = fn(EncodingParameters, &[u8], u8) -> Option<usize>;

fn find_next_single_byte_delimiter(
    _params: EncodingParameters,
    data: &[u8],
    delimiter: u8,
) -> Option<usize> {
    memchr::memchr(delimiter, data)
}

/// Multi-byte scan: a candidate byte is a genuine delimiter only if the
/// rest of its code unit is zero bytes. The companions sit after the
/// candidate for little-endian codecs and before it for big-endian
/// ones; a neighborhood that leaves the slice is not a match at this
/// boundary.
fn find_next_multi_byte_delimiter(
    params: EncodingParameters,
    data: &[u8],
    delimiter: u8,
) -> Option<usize> {
    let width = params.line_feed_width;
    let check_forward = params.line_feed_index == 0;

    let is_genuine = |candidate: usize| {
        if check_forward && candidate + width > data.len() {
            return false;
        }
        if !check_forward && candidate < width - 1 {
            return false;
        }
        (1..width).all(|i| {
            let neighbor = if check_forward {
                data[candidate + i]
            } else {
                data[candidate - i]
            };
            neighbor == 0
        })
    };

    let mut search_from = 0;
    while let Some(found) = memchr::memchr(delimiter, &data[search_from..]) {
        let candidate = search_from + found;
        if is_genuine(candidate) {
            return Some(candidate);
        }
        search_from = candidate + 1;
    }
    None
}

/// Code-unit-aligned offset within the block of the byte at `raw_pos`.
fn char_offset_within_block(raw_pos: usize, params: EncodingParameters) -> i64 {
    raw_pos as i64 - params.before_cr_offset() as i64
}

/// Expand tabs over `block[line_start..line_start + line_len]`, carrying
/// `initial_additional_spaces` from a previous block of the same line.
/// Each tab advances the visual column to the next multiple of
/// [`TAB_STOP`]; one of the consumed columns is the tab byte itself.
fn expand_tabs_in_line(
    params: EncodingParameters,
    find_next_delimiter: FindDelimiter,
    block: &[u8],
    line_start: usize,
    line_len: usize,
    pos_within_block: i64,
    initial_additional_spaces: i64,
) -> i64 {
    let mut additional_spaces = initial_additional_spaces;
    let line_end = line_start + line_len;
    let mut cursor = line_start;

    while cursor < line_end {
        let Some(next_tab) = find_next_delimiter(params, &block[cursor..line_end], b'\t') else {
            break;
        };

        let tab_pos_within_block = char_offset_within_block(cursor + next_tab, params);
        debug!(tab_pos_within_block, "tab found");

        let current_expanded_size = tab_pos_within_block - pos_within_block + additional_spaces;
        additional_spaces += TAB_STOP - current_expanded_size.rem_euclid(TAB_STOP) - 1;

        cursor = cursor + next_tab + 1;
    }

    additional_spaces
}

/// Locate the next line feed from `pos_within_block`; returns
/// (end-of-block reached, new code-unit position, accumulated spaces).
fn find_next_line_feed(
    block: &[u8],
    pos_within_block: usize,
    state: &IndexingState,
    find_next_delimiter: FindDelimiter,
) -> (bool, i64, i64) {
    let search = &block[pos_within_block..];
    let next_line_feed = find_next_delimiter(state.encoding_params, search, b'\n');

    let is_end_of_block = next_line_feed.is_none();
    let next_line_size = next_line_feed.unwrap_or(search.len());

    let additional_spaces = expand_tabs_in_line(
        state.encoding_params,
        find_next_delimiter,
        block,
        pos_within_block,
        next_line_size,
        pos_within_block as i64,
        state.additional_spaces,
    );

    let new_pos_within_block =
        char_offset_within_block(pos_within_block + next_line_size, state.encoding_params);

    (is_end_of_block, new_pos_within_block, additional_spaces)
}

/// Parse one file block, emitting absolute offsets of the line starts
/// found entirely within it and advancing the run state.
pub fn parse_data_block(
    block_beginning: u64,
    block: &[u8],
    state: &mut IndexingState,
) -> FastLinePositionArray {
    let find_next_delimiter: FindDelimiter = if state.encoding_params.line_feed_width == 1 {
        find_next_single_byte_delimiter
    } else {
        find_next_multi_byte_delimiter
    };

    let line_feed_width = state.encoding_params.line_feed_width as i64;
    let mut line_positions = FastLinePositionArray::new();
    let mut is_end_of_block = false;

    while !is_end_of_block {
        if state.pos > block_beginning + block.len() as u64 {
            error!(
                pos = state.pos,
                block_beginning,
                block_size = block.len(),
                "trying to parse out of block"
            );
            break;
        }

        let mut pos_within_block = state.pos.saturating_sub(block_beginning) as i64;

        is_end_of_block = pos_within_block as usize == block.len();

        if !is_end_of_block {
            let (end_of_block, new_pos, additional_spaces) =
                find_next_line_feed(block, pos_within_block as usize, state, find_next_delimiter);
            is_end_of_block = end_of_block;
            pos_within_block = new_pos;
            state.additional_spaces = additional_spaces;
        }

        let current_data_end = pos_within_block + block_beginning as i64;

        let length =
            (current_data_end - state.pos as i64) / line_feed_width + state.additional_spaces;
        state.max_length = state.max_length.max(length);

        if !is_end_of_block {
            state.end = current_data_end as u64;
            state.pos = state.end + line_feed_width as u64;
            state.additional_spaces = 0;
            line_positions.append(state.pos);
        }
    }

    line_positions
}

/// Fix the effective codec for this run: forced wins, then the guess
/// already stored, then the detector's verdict on this block. The
/// detector's output is also recorded for observability.
pub fn decide_encoding(
    detector: &dyn EncodingDetector,
    block: &[u8],
    data: &IndexingData,
    state: &mut IndexingState,
) {
    if state.encoding_guess.is_none() {
        let guess = detector.detect(block);
        info!(encoding = guess.name(), "encoding guess");
        state.encoding_guess = Some(guess);
    }

    if state.file_codec.is_none() {
        let codec = data
            .get_forced_encoding()
            .or_else(|| data.get_encoding_guess())
            .or(state.encoding_guess)
            .unwrap_or_else(TextCodec::locale_default);

        state.file_codec = Some(codec);
        state.encoding_params = EncodingParameters::from_codec(codec);
        debug!(
            encoding = codec.name(),
            line_feed_width = state.encoding_params.line_feed_width,
            "effective encoding"
        );
    }
}
