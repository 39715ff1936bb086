//! Core indexing engine for a large-file log viewer.
//!
//! Turns an on-disk byte stream of arbitrary size into an in-memory line
//! index: byte offsets of line starts, the maximum tab-expanded line
//! width, the detected text encoding, and a hashed fingerprint used to
//! tell whether the file was appended to or rewritten out-of-band.
//!
//! The engine never stores line text — only offsets. Viewers, search and
//! filtered overlays read lines back from the file themselves through
//! the read-only side of [`index::IndexStore`].

pub mod config;
pub mod encoding;
pub mod index;
pub mod readable_size;
