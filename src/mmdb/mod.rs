//! MaxMind DB (MMDB) file format
//!
//! The file is a binary search tree over address bits, a 16-byte zero
//! separator, a data section holding the records, and a metadata map after
//! a marker near the end of the file.
//!
//! - **types**: record sizes, IP version, format constants
//! - **format**: metadata encoding, decoding and marker search

pub mod format;
pub mod types;

pub use format::{find_metadata_marker, Metadata};
pub use types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
