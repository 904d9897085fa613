//! Loading existing database files
//!
//! Rebuilds the in-memory [`Tree`] from a serialized file so more networks
//! can be merged into it. The file is memory-mapped and validated while the
//! search tree is walked from the root; nothing is shared with the mapping
//! once loading returns.

use crate::data_section::DataDecoder;
use crate::error::{IpfoldError, Result};
use crate::ip_tree::{Node, NodePointer, Tree, TreeOptions};
use crate::mmdb::{Metadata, DATA_SECTION_SEPARATOR_SIZE};
use crate::prefix::IPV4_BITS;
use memmap2::Mmap;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::Path;
use tracing::info;

impl Tree {
    /// Load a database file
    ///
    /// `database_type`, `languages`, `description` and `build_epoch` left as
    /// `None` in `options` are taken from the file's metadata.
    pub fn load<P: AsRef<Path>>(path: P, options: TreeOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| IpfoldError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        let len = file.metadata()?.len();
        if len == 0 {
            return Err(IpfoldError::CorruptDatabase(format!(
                "{} is empty",
                path.display()
            )));
        }

        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| IpfoldError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;

        let tree = Self::from_bytes(&mmap, options)?;
        info!(
            path = %path.display(),
            nodes = tree.nodes.len(),
            records = tree.records.len(),
            "loaded database"
        );
        Ok(tree)
    }

    /// Load a database from an in-memory file image
    pub fn from_bytes(data: &[u8], options: TreeOptions) -> Result<Self> {
        let (metadata, marker_offset) = Metadata::from_file(data)?;

        let node_count = metadata.node_count;
        if node_count == 0 {
            return Err(IpfoldError::CorruptDatabase(
                "search tree has no nodes".to_string(),
            ));
        }

        let tree_size = node_count as usize * metadata.record_size.node_bytes();
        let data_start = tree_size + DATA_SECTION_SEPARATOR_SIZE;
        if data_start > marker_offset {
            return Err(IpfoldError::CorruptDatabase(format!(
                "{} nodes of {} bytes do not fit before the metadata at offset {}",
                node_count,
                metadata.record_size.node_bytes(),
                marker_offset
            )));
        }
        if data[tree_size..data_start].iter().any(|&b| b != 0) {
            return Err(IpfoldError::CorruptDatabase(
                "data section separator is not zeroed".to_string(),
            ));
        }

        let tree_bytes = &data[..tree_size];
        let data_section = &data[data_start..marker_offset];

        let options = TreeOptions {
            database_type: options.database_type.or(Some(metadata.database_type.clone())),
            languages: options.languages.or(Some(metadata.languages.clone())),
            description: options.description.or(Some(metadata.description.clone())),
            build_epoch: options.build_epoch.or(Some(metadata.build_epoch)),
            ..options
        };

        let mut tree = Tree::with_root(options);
        let mut reader = TreeReader {
            metadata: &metadata,
            tree_bytes,
            decoder: DataDecoder::new(data_section),
            data_len: data_section.len(),
            visited: vec![false; node_count as usize],
            offsets: FxHashMap::default(),
        };
        reader.read_into(&mut tree)?;

        if !tree.options.include_reserved_networks {
            tree.mark_reserved();
        }
        Ok(tree)
    }
}

/// Walks the serialized search tree into an arena
struct TreeReader<'a> {
    metadata: &'a Metadata,
    tree_bytes: &'a [u8],
    decoder: DataDecoder<'a>,
    data_len: usize,
    visited: Vec<bool>,
    /// Data offset to record id, so shared records stay shared
    offsets: FxHashMap<u32, u32>,
}

impl TreeReader<'_> {
    fn read_into(&mut self, tree: &mut Tree) -> Result<()> {
        // (file node, arena node, depth)
        let mut stack = vec![(0u32, 0u32, 0u8)];
        self.visited[0] = true;

        while let Some((file_node, arena_node, depth)) = stack.pop() {
            let (left, right) = self
                .metadata
                .record_size
                .read_node(self.tree_bytes, file_node as usize)
                .ok_or_else(|| {
                    IpfoldError::CorruptDatabase(format!("node {} is truncated", file_node))
                })?;

            for (bit, value) in [left, right].into_iter().enumerate() {
                let pointer = match self.classify(value)? {
                    Record::Node(child) => {
                        if depth + 1 >= IPV4_BITS {
                            return Err(IpfoldError::CorruptDatabase(format!(
                                "node {} lies deeper than {} bits",
                                child, IPV4_BITS
                            )));
                        }
                        if std::mem::replace(&mut self.visited[child as usize], true) {
                            return Err(IpfoldError::CorruptDatabase(format!(
                                "node {} is reachable twice",
                                child
                            )));
                        }
                        let arena_child = tree.allocate_node(Node::new_empty());
                        stack.push((child, arena_child, depth + 1));
                        NodePointer::Node(arena_child)
                    }
                    Record::Empty => NodePointer::Empty,
                    Record::Data(offset) => NodePointer::Data(self.record_id(tree, offset)?),
                };
                tree.nodes[arena_node as usize].children[bit] = pointer;
            }
        }
        Ok(())
    }

    fn classify(&self, value: u32) -> Result<Record> {
        let node_count = self.metadata.node_count;
        if value < node_count {
            return Ok(Record::Node(value));
        }
        if value == node_count {
            return Ok(Record::Empty);
        }

        let data_base = node_count as u64 + DATA_SECTION_SEPARATOR_SIZE as u64;
        if (value as u64) < data_base {
            return Err(IpfoldError::CorruptDatabase(format!(
                "record value {} points into the separator",
                value
            )));
        }
        let offset = value as u64 - data_base;
        if offset >= self.data_len as u64 {
            return Err(IpfoldError::CorruptDatabase(format!(
                "record value {} points past the data section",
                value
            )));
        }
        Ok(Record::Data(offset as u32))
    }

    fn record_id(&mut self, tree: &mut Tree, offset: u32) -> Result<u32> {
        if let Some(&id) = self.offsets.get(&offset) {
            return Ok(id);
        }
        let value = self.decoder.decode(offset).map_err(|e| {
            IpfoldError::CorruptDatabase(format!("record at data offset {}: {}", offset, e))
        })?;
        let id = tree.push_record(value);
        self.offsets.insert(offset, id);
        Ok(id)
    }
}

enum Record {
    Node(u32),
    Empty,
    Data(u32),
}
