//! ipfold - Build and Enrich IPv4 Lookup Databases
//!
//! ipfold inserts IPv4 networks with structured records into an in-memory
//! prefix tree and writes it out as a MaxMind DB (MMDB) compatible file.
//! Existing files can be loaded and enriched: new records are merged into
//! whatever already covers their range.
//!
//! # Quick Start
//!
//! ```rust
//! use ipfold::{DataValue, MergeStrategy, Tree, TreeOptions};
//!
//! let mut tree = Tree::new(TreeOptions {
//!     database_type: Some("GeoIP-City".to_string()),
//!     include_reserved_networks: true,
//!     ..TreeOptions::default()
//! });
//!
//! let site: DataValue = [("name", DataValue::from("campus"))].into_iter().collect();
//! tree.insert("10.0.0.0/8", site, MergeStrategy::TopLevelMerge)?;
//!
//! let room: DataValue = [("floor", DataValue::from("3"))].into_iter().collect();
//! tree.insert("10.1.2.3", room, MergeStrategy::TopLevelMerge)?;
//!
//! // 10.1.2.3 now carries both fields; the rest of 10/8 only "name"
//! let (_, record) = tree.lookup("10.1.2.3".parse().unwrap()).unwrap();
//! assert_eq!(record.get("name"), Some(&DataValue::from("campus")));
//!
//! let bytes = tree.to_bytes()?;
//! let reloaded = Tree::from_bytes(&bytes, TreeOptions {
//!     include_reserved_networks: true,
//!     ..TreeOptions::default()
//! })?;
//! assert_eq!(reloaded.network_count()?, tree.network_count()?);
//! # Ok::<(), ipfold::IpfoldError>(())
//! ```
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  1. Search tree (binary trie)        │
//! │  2. 16-byte separator                │
//! │  3. Data section (deduplicated)      │
//! │  4. Metadata marker + metadata       │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Record values and the data section codec
pub mod data_section;
/// Error types
pub mod error;
/// Input readers with gzip support
pub mod file_reader;
pub mod ingest;
/// In-memory prefix tree
pub mod ip_tree;
mod loader;
/// Record merge strategies
pub mod merge;
/// MMDB format definitions
pub mod mmdb;
/// IPv4 network prefixes
pub mod prefix;
mod writer;

pub use crate::data_section::DataValue;
pub use crate::error::{IpfoldError, Result};
pub use crate::ingest::{BuildPipeline, BuildReport, ErrorPolicy, GeoDefaults, Profile};
pub use crate::ip_tree::{Tree, TreeOptions};
pub use crate::merge::MergeStrategy;
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::prefix::Prefix;
pub use crate::writer::DEFAULT_DATABASE_TYPE;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
