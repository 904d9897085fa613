//! Database serialization
//!
//! Output layout:
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  1. Search tree (node_count nodes)   │
//! │  2. 16 zero bytes                    │
//! │  3. Data section (deduplicated)      │
//! │  4. "\xAB\xCD\xEFMaxMind.com"        │
//! │  5. Metadata map                     │
//! └──────────────────────────────────────┘
//! ```
//!
//! Each node is two records of 24, 28 or 32 bits. A record value below
//! `node_count` is a node index, `node_count` itself means "no data", and
//! `node_count + 16 + offset` points into the data section.

use crate::data_section::DataEncoder;
use crate::error::{IpfoldError, Result};
use crate::ip_tree::{Slot, Tree};
use crate::mmdb::{Metadata, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

/// Temporary file created with the mode `File::create` would use
///
/// `tempfile` defaults to 0600; asking for 0666 lets the process umask
/// apply as it does for a plain create.
fn temp_file_in(dir: &Path) -> io::Result<NamedTempFile> {
    #[allow(unused_mut)]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

/// Database type written when none is configured
pub const DEFAULT_DATABASE_TYPE: &str = "ipfold";

impl Tree {
    /// Serialize the tree to a complete database file image
    ///
    /// The tree is only read; serializing it twice yields identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let nodes = self.collapsed()?;
        let node_count = u32::try_from(nodes.len())
            .map_err(|_| IpfoldError::Serialization("too many nodes".to_string()))?;

        // Records are encoded in tree pre-order so offsets are reproducible
        let mut encoder = DataEncoder::new();
        let mut offsets: FxHashMap<u32, u32> = FxHashMap::default();
        for node in &nodes {
            for slot in node {
                if let Slot::Data(r) = *slot {
                    offsets
                        .entry(r)
                        .or_insert_with(|| encoder.encode(&self.records[r as usize]));
                }
            }
        }
        let data_section = encoder.into_bytes();

        let data_base = node_count as u64 + DATA_SECTION_SEPARATOR_SIZE as u64;
        let max_record = data_base + data_section.len() as u64;
        let record_size = self.pick_record_size(max_record)?;

        let record_value = |slot: Slot| -> Result<u32> {
            match slot {
                Slot::Empty => Ok(node_count),
                Slot::Node(id) if id < node_count => Ok(id),
                Slot::Node(id) => Err(IpfoldError::Serialization(format!(
                    "node index {} out of range ({} nodes)",
                    id, node_count
                ))),
                Slot::Data(r) => {
                    let offset = offsets.get(&r).ok_or_else(|| {
                        IpfoldError::Serialization(format!("record {} was never encoded", r))
                    })?;
                    u32::try_from(data_base + *offset as u64).map_err(|_| {
                        IpfoldError::Serialization("data pointer exceeds 32 bits".to_string())
                    })
                }
            }
        };

        let mut out = Vec::with_capacity(
            nodes.len() * record_size.node_bytes()
                + DATA_SECTION_SEPARATOR_SIZE
                + data_section.len()
                + 512,
        );
        for node in &nodes {
            record_size.write_node(&mut out, record_value(node[0])?, record_value(node[1])?);
        }
        out.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR_SIZE]);
        out.extend_from_slice(&data_section);

        out.extend_from_slice(METADATA_MARKER);
        out.extend_from_slice(&self.metadata(node_count, record_size).to_bytes());

        Ok(out)
    }

    /// Write the serialized database to a sink, returning the bytes written
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<u64> {
        let bytes = self.to_bytes()?;
        sink.write_all(&bytes)?;
        sink.flush()?;
        Ok(bytes.len() as u64)
    }

    /// Write the database to `path` atomically
    ///
    /// Serializes to a temporary file in the destination directory and
    /// renames it over `path` only once everything succeeded, so a failed
    /// build never leaves a truncated database behind.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = temp_file_in(dir)?;
        // A replaced database keeps its mode
        if let Ok(existing) = fs::metadata(path) {
            tmp.as_file().set_permissions(existing.permissions())?;
        }
        let written = self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| IpfoldError::Io(e.error.to_string()))?;

        info!(path = %path.display(), bytes = written, "wrote database");
        Ok(written)
    }

    /// Metadata describing this tree for a given node count and record size
    pub fn metadata(&self, node_count: u32, record_size: RecordSize) -> Metadata {
        let options = &self.options;
        Metadata {
            node_count,
            record_size,
            ip_version: options.ip_version,
            database_type: options
                .database_type
                .clone()
                .unwrap_or_else(|| DEFAULT_DATABASE_TYPE.to_string()),
            languages: options.languages.clone().unwrap_or_default(),
            description: options.description.clone().unwrap_or_else(BTreeMap::new),
            build_epoch: self.build_epoch,
        }
    }

    fn pick_record_size(&self, max_record: u64) -> Result<RecordSize> {
        match self.options.record_size {
            Some(size) if max_record <= size.max_value() => Ok(size),
            Some(size) => Err(IpfoldError::Serialization(format!(
                "{}-bit records cannot address {} bytes of tree and data",
                size.bits(),
                max_record
            ))),
            None => RecordSize::smallest_for(max_record).ok_or_else(|| {
                IpfoldError::Serialization("database too large for 32-bit records".to_string())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_section::{DataDecoder, DataValue};
    use crate::ip_tree::TreeOptions;
    use crate::merge::MergeStrategy;

    fn options() -> TreeOptions {
        TreeOptions {
            include_reserved_networks: true,
            build_epoch: Some(1_700_000_000),
            database_type: Some("Test-DB".to_string()),
            ..TreeOptions::default()
        }
    }

    fn record(name: &str) -> DataValue {
        [("name", DataValue::from(name))].into_iter().collect()
    }

    #[test]
    fn test_empty_tree_layout() {
        let tree = Tree::new(options());
        let bytes = tree.to_bytes().unwrap();

        // One root node with both records pointing at "no data" (node_count = 1)
        assert_eq!(&bytes[..6], &[0, 0, 1, 0, 0, 1]);
        assert_eq!(&bytes[6..22], &[0u8; 16]);
        assert_eq!(&bytes[22..22 + METADATA_MARKER.len()], METADATA_MARKER);

        let (meta, _) = Metadata::from_file(&bytes).unwrap();
        assert_eq!(meta.node_count, 1);
        assert_eq!(meta.record_size, RecordSize::Bits24);
        assert_eq!(meta.database_type, "Test-DB");
        assert_eq!(meta.build_epoch, 1_700_000_000);
    }

    #[test]
    fn test_root_records_point_into_data_section() {
        let mut tree = Tree::new(options());
        tree.insert("0.0.0.0/1", record("low"), MergeStrategy::TopLevelMerge)
            .unwrap();
        let bytes = tree.to_bytes().unwrap();

        let (left, right) = RecordSize::Bits24.read_node(&bytes, 0).unwrap();
        assert_eq!(right, 1, "right half has no data");
        assert_eq!(left, 1 + 16, "first record sits at data offset 0");

        let data = &bytes[6 + 16..];
        let value = DataDecoder::new(data).decode(0).unwrap();
        assert_eq!(value, record("low"));
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let build = || {
            let mut tree = Tree::new(options());
            for (net, name) in [
                ("10.0.0.0/8", "a"),
                ("10.1.0.0/16", "b"),
                ("192.0.2.1", "c"),
                ("192.0.2.0/24", "d"),
            ] {
                tree.insert(net, record(name), MergeStrategy::TopLevelMerge)
                    .unwrap();
            }
            tree
        };

        let first = build();
        let a = first.to_bytes().unwrap();
        assert_eq!(a, first.to_bytes().unwrap());
        assert_eq!(a, build().to_bytes().unwrap());
    }

    #[test]
    fn test_forced_record_size() {
        let mut opts = options();
        opts.record_size = Some(RecordSize::Bits32);
        let mut tree = Tree::new(opts);
        tree.insert("1.2.3.0/24", record("x"), MergeStrategy::TopLevelMerge)
            .unwrap();

        let bytes = tree.to_bytes().unwrap();
        let (meta, _) = Metadata::from_file(&bytes).unwrap();
        assert_eq!(meta.record_size, RecordSize::Bits32);
        assert_eq!(meta.node_count, 24);
    }

    #[test]
    fn test_write_to_reports_length() {
        let tree = Tree::new(options());
        let mut sink = Vec::new();
        let written = tree.write_to(&mut sink).unwrap();
        assert_eq!(written as usize, sink.len());
        assert_eq!(sink, tree.to_bytes().unwrap());
    }

    #[test]
    fn test_save_is_atomic_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mmdb");
        let tree = Tree::new(options());

        let written = tree.save(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
        // Only the final file remains
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_mode_matches_plain_create() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let saved = dir.path().join("saved.mmdb");
        let created = dir.path().join("created.mmdb");

        Tree::new(options()).save(&saved).unwrap();
        std::fs::File::create(&created).unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&saved), mode(&created));
    }

    #[cfg(unix)]
    #[test]
    fn test_save_keeps_mode_of_replaced_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mmdb");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        Tree::new(options()).save(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert_ne!(std::fs::read(&path).unwrap(), b"old");
    }
}
