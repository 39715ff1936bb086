//! Text codec identification and the parsing parameters derived from it.
//!
//! The parser never decodes text. All it needs from a codec is the width
//! of a code unit and where the line-feed byte sits inside one, so a
//! codec here is an opaque identifier plus those two numbers.

/// How many leading bytes of a block the BOM-less heuristic inspects.
const HEURISTIC_WINDOW: usize = 1024;

/// Supported text codecs.
///
/// `Latin1` parses identically to `Utf8` (single-byte line feeds); it
/// exists so a host can force it and report it back to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextCodec {
    Utf8,
    Latin1,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
}

impl TextCodec {
    /// Canonical label for display and logging.
    pub fn name(self) -> &'static str {
        match self {
            TextCodec::Utf8 => "UTF-8",
            TextCodec::Latin1 => "ISO-8859-1",
            TextCodec::Utf16Le => "UTF-16LE",
            TextCodec::Utf16Be => "UTF-16BE",
            TextCodec::Utf32Le => "UTF-32LE",
            TextCodec::Utf32Be => "UTF-32BE",
        }
    }

    /// Fallback codec when nothing can be detected (empty or unreadable
    /// files).
    pub fn locale_default() -> Self {
        TextCodec::Utf8
    }
}

/// Numeric descriptors the parser derives from a codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingParameters {
    /// Bytes per code unit: 1, 2 or 4.
    pub line_feed_width: usize,
    /// Index of the LF byte within its code unit: 0 for little-endian
    /// encodings, `width - 1` for big-endian ones.
    pub line_feed_index: usize,
}

impl EncodingParameters {
    pub fn from_codec(codec: TextCodec) -> Self {
        let (line_feed_width, line_feed_index) = match codec {
            TextCodec::Utf8 | TextCodec::Latin1 => (1, 0),
            TextCodec::Utf16Le => (2, 0),
            TextCodec::Utf16Be => (2, 1),
            TextCodec::Utf32Le => (4, 0),
            TextCodec::Utf32Be => (4, 3),
        };
        Self {
            line_feed_width,
            line_feed_index,
        }
    }

    /// Offset to subtract from a hit byte address to land on the code
    /// unit boundary containing it.
    pub fn before_cr_offset(&self) -> usize {
        self.line_feed_index
    }
}

impl Default for EncodingParameters {
    fn default() -> Self {
        Self::from_codec(TextCodec::locale_default())
    }
}

/// Classifies a byte slab into a codec.
///
/// Injectable so tests can force specific codecs on the parser.
pub trait EncodingDetector: Send + Sync {
    fn detect(&self, block: &[u8]) -> TextCodec;
}

/// Default detector: BOM first, then a null-byte-pattern heuristic for
/// BOM-less wide encodings, then the locale default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BomDetector;

impl EncodingDetector for BomDetector {
    fn detect(&self, block: &[u8]) -> TextCodec {
        detect_bom(block).unwrap_or_else(|| detect_wide_heuristic(block))
    }
}

fn detect_bom(block: &[u8]) -> Option<TextCodec> {
    // The UTF-32 marks begin with the UTF-16 ones, so they go first.
    if block.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) {
        Some(TextCodec::Utf32Le)
    } else if block.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        Some(TextCodec::Utf32Be)
    } else if block.starts_with(&[0xEF, 0xBB, 0xBF]) {
        Some(TextCodec::Utf8)
    } else if block.starts_with(&[0xFF, 0xFE]) {
        Some(TextCodec::Utf16Le)
    } else if block.starts_with(&[0xFE, 0xFF]) {
        Some(TextCodec::Utf16Be)
    } else {
        None
    }
}

/// Null bytes never occur in UTF-8 text, and in wide encodings of
/// mostly-ASCII logs they fall on fixed lanes of each code unit. Count
/// zeros per lane over the leading window and look for those shapes.
fn detect_wide_heuristic(block: &[u8]) -> TextCodec {
    let window = &block[..block.len().min(HEURISTIC_WINDOW)];
    if window.len() < 4 {
        return TextCodec::locale_default();
    }

    let mut lane_zeros = [0usize; 4];
    for (i, &byte) in window.iter().enumerate() {
        if byte == 0 {
            lane_zeros[i % 4] += 1;
        }
    }

    let groups = window.len() / 4;
    let mostly = |zeros: usize| zeros * 10 >= groups * 9;
    let rarely = |zeros: usize| zeros * 10 < groups * 2;

    // UTF-32: three zero lanes around one payload lane.
    if mostly(lane_zeros[1]) && mostly(lane_zeros[2]) && mostly(lane_zeros[3]) && rarely(lane_zeros[0])
    {
        return TextCodec::Utf32Le;
    }
    if mostly(lane_zeros[0]) && mostly(lane_zeros[1]) && mostly(lane_zeros[2]) && rarely(lane_zeros[3])
    {
        return TextCodec::Utf32Be;
    }

    // UTF-16: zeros alternate with payload bytes.
    let even_zeros = lane_zeros[0] + lane_zeros[2];
    let odd_zeros = lane_zeros[1] + lane_zeros[3];
    let half = window.len() / 2;
    if odd_zeros * 10 >= half * 8 && even_zeros * 10 < half * 2 {
        return TextCodec::Utf16Le;
    }
    if even_zeros * 10 >= half * 8 && odd_zeros * 10 < half * 2 {
        return TextCodec::Utf16Be;
    }

    TextCodec::locale_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(block: &[u8]) -> TextCodec {
        BomDetector.detect(block)
    }

    #[test]
    fn bom_detection() {
        assert_eq!(detect(b"\xEF\xBB\xBFhello"), TextCodec::Utf8);
        assert_eq!(detect(b"\xFF\xFEh\x00i\x00"), TextCodec::Utf16Le);
        assert_eq!(detect(b"\xFE\xFF\x00h\x00i"), TextCodec::Utf16Be);
        assert_eq!(detect(b"\xFF\xFE\x00\x00h\x00\x00\x00"), TextCodec::Utf32Le);
        assert_eq!(detect(b"\x00\x00\xFE\xFF\x00\x00\x00h"), TextCodec::Utf32Be);
    }

    #[test]
    fn utf32_bom_wins_over_utf16_prefix() {
        // FF FE 00 00 is both a UTF-16LE BOM followed by NUL and a
        // UTF-32LE BOM; the wider codec must win.
        assert_eq!(detect(&[0xFF, 0xFE, 0x00, 0x00]), TextCodec::Utf32Le);
    }

    #[test]
    fn plain_ascii_is_utf8() {
        assert_eq!(detect(b"2024-01-01 INFO started\n"), TextCodec::Utf8);
    }

    #[test]
    fn empty_block_falls_back_to_locale_default() {
        assert_eq!(detect(b""), TextCodec::locale_default());
    }

    #[test]
    fn bomless_utf16le_heuristic() {
        let mut block = Vec::new();
        for &byte in b"ERROR boom\n".iter().cycle().take(200) {
            block.push(byte);
            block.push(0);
        }
        assert_eq!(detect(&block), TextCodec::Utf16Le);
    }

    #[test]
    fn bomless_utf16be_heuristic() {
        let mut block = Vec::new();
        for &byte in b"ERROR boom\n".iter().cycle().take(200) {
            block.push(0);
            block.push(byte);
        }
        assert_eq!(detect(&block), TextCodec::Utf16Be);
    }

    #[test]
    fn bomless_utf32le_heuristic() {
        let mut block = Vec::new();
        for &byte in b"info\n".iter().cycle().take(100) {
            block.extend_from_slice(&[byte, 0, 0, 0]);
        }
        assert_eq!(detect(&block), TextCodec::Utf32Le);
    }

    #[test]
    fn bomless_utf32be_heuristic() {
        let mut block = Vec::new();
        for &byte in b"info\n".iter().cycle().take(100) {
            block.extend_from_slice(&[0, 0, 0, byte]);
        }
        assert_eq!(detect(&block), TextCodec::Utf32Be);
    }

    #[test]
    fn binary_noise_is_not_wide() {
        // Zeros scattered without lane structure should not classify as
        // UTF-16/32.
        let block: Vec<u8> = (0u16..600).map(|i| (i % 251) as u8).collect();
        assert_eq!(detect(&block), TextCodec::Utf8);
    }

    #[test]
    fn parameters_per_codec() {
        let p = EncodingParameters::from_codec(TextCodec::Utf8);
        assert_eq!((p.line_feed_width, p.line_feed_index), (1, 0));

        let p = EncodingParameters::from_codec(TextCodec::Utf16Le);
        assert_eq!((p.line_feed_width, p.line_feed_index), (2, 0));

        let p = EncodingParameters::from_codec(TextCodec::Utf16Be);
        assert_eq!((p.line_feed_width, p.line_feed_index), (2, 1));
        assert_eq!(p.before_cr_offset(), 1);

        let p = EncodingParameters::from_codec(TextCodec::Utf32Be);
        assert_eq!((p.line_feed_width, p.line_feed_index), (4, 3));
    }

    #[test]
    fn codec_names() {
        assert_eq!(TextCodec::Utf8.name(), "UTF-8");
        assert_eq!(TextCodec::Utf16Be.name(), "UTF-16BE");
    }
}
