//! IPv4 prefix tree
//!
//! Binary trie over address bits using arena allocation. Each node has two
//! child slots (bit 0, bit 1); a slot holds nothing, a fixed reserved
//! marker, a record, or another node. A record in a slot at depth `d`
//! covers the whole `/d` network unless a deeper slot overrides it.

use crate::data_section::DataValue;
use crate::error::{IpfoldError, Result};
use crate::merge::MergeStrategy;
use crate::mmdb::{IpVersion, RecordSize};
use crate::prefix::{reserved_prefixes, Prefix, IPV4_BITS};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

const ROOT: u32 = 0;

/// Options for creating or loading a tree
///
/// `database_type`, `languages` and `description` left as `None` take
/// built-in defaults for a new tree, or the values stored in the file when
/// loading.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeOptions {
    /// IP version of the database (IPv4 only)
    pub ip_version: IpVersion,
    /// Database type written to the metadata
    pub database_type: Option<String>,
    /// Locale codes written to the metadata
    pub languages: Option<Vec<String>>,
    /// Description by language code
    pub description: Option<BTreeMap<String, String>>,
    /// When false, special-purpose networks stay empty and inserts into them
    /// are skipped
    pub include_reserved_networks: bool,
    /// Fixed record size; the smallest fitting size is chosen when `None`
    pub record_size: Option<RecordSize>,
    /// Build timestamp; the current time when `None`
    pub build_epoch: Option<u64>,
    /// Reject merges that change the type of an existing top-level field
    pub strict_types: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            ip_version: IpVersion::V4,
            database_type: None,
            languages: None,
            description: None,
            include_reserved_networks: false,
            record_size: None,
            build_epoch: None,
            strict_types: false,
        }
    }
}

/// Child slot of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodePointer {
    /// No data
    Empty,
    /// Special-purpose network; never written by inserts
    Reserved,
    /// Index into the record arena
    Data(u32),
    /// Index into the node arena
    Node(u32),
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) children: [NodePointer; 2],
}

impl Node {
    pub(crate) fn new_empty() -> Self {
        Self {
            children: [NodePointer::Empty; 2],
        }
    }
}

/// What currently covers the target prefix of an insert
enum Location {
    /// A single slot, or an ancestor's record the prefix inherits
    Covered(Option<u32>),
    /// The prefix is an existing internal node
    Subtree(u32),
    /// The prefix is inside a reserved network
    Reserved,
}

/// Slot of a collapsed, renumbered tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Empty,
    Data(u32),
    Node(u32),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

/// In-memory IP database under construction
pub struct Tree {
    pub(crate) options: TreeOptions,
    /// Resolved build timestamp, fixed for the tree's lifetime
    pub(crate) build_epoch: u64,
    /// All nodes in the tree (arena); node 0 is the root
    pub(crate) nodes: Vec<Node>,
    /// All records referenced by `NodePointer::Data`
    pub(crate) records: Vec<DataValue>,
}

impl Tree {
    /// Create an empty tree
    pub fn new(options: TreeOptions) -> Self {
        let mut tree = Self::with_root(options);
        if !tree.options.include_reserved_networks {
            tree.mark_reserved();
        }
        tree
    }

    /// Tree holding only an empty root
    pub(crate) fn with_root(options: TreeOptions) -> Self {
        let build_epoch = options.build_epoch.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });
        Self {
            options,
            build_epoch,
            nodes: vec![Node::new_empty()],
            records: Vec::new(),
        }
    }

    /// Options the tree was built with
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Build timestamp written to the metadata
    pub fn build_epoch(&self) -> u64 {
        self.build_epoch
    }

    /// Number of allocated nodes (before collapsing)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of networks carrying data, as they would be written
    pub fn network_count(&self) -> Result<usize> {
        Ok(self.networks()?.len())
    }

    /// Insert a record for `network` (`a.b.c.d` or `a.b.c.d/nn`)
    pub fn insert(
        &mut self,
        network: &str,
        record: DataValue,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let prefix = Prefix::parse(network)?;
        self.insert_prefix(prefix, record, strategy)
    }

    /// Insert a record for an already parsed prefix
    ///
    /// The strategy is applied to whatever covers each part of the range:
    /// the inherited record, the record stored exactly at the prefix, or,
    /// when more specific networks were inserted earlier, each of their
    /// records in turn. Address space outside the prefix keeps its previous
    /// record. On error the tree is left unchanged.
    pub fn insert_prefix(
        &mut self,
        prefix: Prefix,
        record: DataValue,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let strict = self.options.strict_types;

        match self.locate(prefix) {
            Location::Reserved => {
                debug!(network = %prefix, "skipping insert into reserved network");
                Ok(())
            }
            Location::Covered(existing) => {
                let merged = strategy.apply(
                    existing.map(|r| &self.records[r as usize]),
                    &record,
                    strict,
                )?;
                if merged.is_none() && existing.is_none() {
                    return Ok(());
                }
                let slot = self.slot_for(existing, merged);
                self.set_slot(prefix, slot);
                Ok(())
            }
            Location::Subtree(node_id) => {
                let mut leaves = Vec::new();
                let mut seen = FxHashSet::default();
                self.collect_leaves(node_id, &mut leaves, &mut seen);

                let mut merged = Vec::with_capacity(leaves.len());
                for existing in &leaves {
                    merged.push(strategy.apply(
                        existing.map(|r| &self.records[r as usize]),
                        &record,
                        strict,
                    )?);
                }

                let mapping: FxHashMap<Option<u32>, NodePointer> = leaves
                    .into_iter()
                    .zip(merged)
                    .map(|(existing, value)| (existing, self.slot_for(existing, value)))
                    .collect();
                self.rewrite_leaves(node_id, &mapping);
                Ok(())
            }
        }
    }

    /// Longest-prefix-match lookup against the tree as built
    ///
    /// Returns the network of the leaf holding the record, which may be
    /// narrower than the inserted network where a later insert split it.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<(Prefix, &DataValue)> {
        let bits = u32::from(addr);
        let mut node = ROOT;
        for depth in 0..IPV4_BITS {
            let bit = ((bits >> (31 - depth as u32)) & 1) as usize;
            match self.nodes[node as usize].children[bit] {
                NodePointer::Data(r) => {
                    return Some((Prefix::from_bits(bits, depth + 1), &self.records[r as usize]))
                }
                NodePointer::Node(child) => node = child,
                NodePointer::Empty | NodePointer::Reserved => return None,
            }
        }
        None
    }

    /// All networks with data, in address order
    ///
    /// Adjacent sibling networks carrying equal records are reported as one
    /// network, matching what is written to disk.
    pub fn networks(&self) -> Result<Vec<(Prefix, &DataValue)>> {
        let collapsed = self.collapsed()?;
        let mut out = Vec::new();
        self.walk_networks(&collapsed, 0, Prefix::from_bits(0, 0), &mut out);
        Ok(out)
    }

    fn walk_networks<'a>(
        &'a self,
        collapsed: &[[Slot; 2]],
        node: u32,
        prefix: Prefix,
        out: &mut Vec<(Prefix, &'a DataValue)>,
    ) {
        for bit in 0..2 {
            let child = prefix.child(bit);
            match collapsed[node as usize][bit] {
                Slot::Empty => {}
                Slot::Data(r) => out.push((child, &self.records[r as usize])),
                Slot::Node(n) => self.walk_networks(collapsed, n, child, out),
            }
        }
    }

    fn locate(&self, prefix: Prefix) -> Location {
        let mut node = ROOT;
        for depth in 0..prefix.len() {
            let last = depth + 1 == prefix.len();
            match self.nodes[node as usize].children[prefix.bit(depth)] {
                NodePointer::Reserved => return Location::Reserved,
                NodePointer::Empty => return Location::Covered(None),
                NodePointer::Data(r) => return Location::Covered(Some(r)),
                NodePointer::Node(child) if last => return Location::Subtree(child),
                NodePointer::Node(child) => node = child,
            }
        }
        // Only a zero-length prefix gets here: the whole tree
        Location::Subtree(node)
    }

    /// Slot for a merge result, reusing the existing record when unchanged
    fn slot_for(&mut self, existing: Option<u32>, merged: Option<DataValue>) -> NodePointer {
        match (existing, merged) {
            (_, None) => NodePointer::Empty,
            (Some(r), Some(value)) if self.records[r as usize] == value => NodePointer::Data(r),
            (_, Some(value)) => NodePointer::Data(self.push_record(value)),
        }
    }

    pub(crate) fn push_record(&mut self, value: DataValue) -> u32 {
        let id = self.records.len() as u32;
        self.records.push(value);
        id
    }

    /// Allocate a new node and return its ID
    pub(crate) fn allocate_node(&mut self, node: Node) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(node);
        id
    }

    /// Point the slot for `prefix` at `value`, creating nodes on the way
    ///
    /// A record met above the target depth is pushed down into both halves
    /// of a new node so the sibling range keeps it. `prefix` must be at
    /// least /1.
    pub(crate) fn set_slot(&mut self, prefix: Prefix, value: NodePointer) {
        let mut node = ROOT;
        for depth in 0..prefix.len() {
            let bit = prefix.bit(depth);
            if depth + 1 == prefix.len() {
                self.nodes[node as usize].children[bit] = value;
                return;
            }
            node = match self.nodes[node as usize].children[bit] {
                NodePointer::Node(child) => child,
                NodePointer::Empty => {
                    let child = self.allocate_node(Node::new_empty());
                    self.nodes[node as usize].children[bit] = NodePointer::Node(child);
                    child
                }
                NodePointer::Data(r) => {
                    trace!(depth = depth + 1, "pushing record down to split node");
                    let child = self.allocate_node(Node {
                        children: [NodePointer::Data(r); 2],
                    });
                    self.nodes[node as usize].children[bit] = NodePointer::Node(child);
                    child
                }
                NodePointer::Reserved => return,
            };
        }
    }

    /// Distinct leaf contents below `node_id`, in first-seen order
    fn collect_leaves(
        &self,
        node_id: u32,
        leaves: &mut Vec<Option<u32>>,
        seen: &mut FxHashSet<Option<u32>>,
    ) {
        for slot in self.nodes[node_id as usize].children {
            let leaf = match slot {
                NodePointer::Node(child) => {
                    self.collect_leaves(child, leaves, seen);
                    continue;
                }
                NodePointer::Reserved => continue,
                NodePointer::Empty => None,
                NodePointer::Data(r) => Some(r),
            };
            if seen.insert(leaf) {
                leaves.push(leaf);
            }
        }
    }

    fn rewrite_leaves(&mut self, node_id: u32, mapping: &FxHashMap<Option<u32>, NodePointer>) {
        for bit in 0..2 {
            let leaf = match self.nodes[node_id as usize].children[bit] {
                NodePointer::Node(child) => {
                    self.rewrite_leaves(child, mapping);
                    continue;
                }
                NodePointer::Reserved => continue,
                NodePointer::Empty => None,
                NodePointer::Data(r) => Some(r),
            };
            if let Some(&slot) = mapping.get(&leaf) {
                self.nodes[node_id as usize].children[bit] = slot;
            }
        }
    }

    /// Overlay the reserved networks as fixed empty slots
    pub(crate) fn mark_reserved(&mut self) {
        for prefix in reserved_prefixes() {
            self.set_slot(prefix, NodePointer::Reserved);
        }
    }

    /// Collapse and renumber the tree for output
    ///
    /// A node whose two halves are both empty, or both hold equal records,
    /// becomes a single slot. Surviving nodes are numbered in depth-first
    /// pre-order with the root as node 0. Fails on a dangling index, a
    /// cycle, a node reachable twice, or a path deeper than 32 bits.
    pub(crate) fn collapsed(&self) -> Result<Vec<[Slot; 2]>> {
        let mut state = vec![Visit::Unvisited; self.nodes.len()];
        let mut resolved = vec![[Slot::Empty; 2]; self.nodes.len()];

        state[ROOT as usize] = Visit::InProgress;
        let root_children = self.nodes[ROOT as usize].children;
        for bit in 0..2 {
            resolved[ROOT as usize][bit] =
                self.resolve(root_children[bit], 1, &mut state, &mut resolved)?;
        }
        state[ROOT as usize] = Visit::Done;

        let mut out = Vec::new();
        Self::number(ROOT, &resolved, &mut out);
        Ok(out)
    }

    fn resolve(
        &self,
        pointer: NodePointer,
        depth: u8,
        state: &mut [Visit],
        resolved: &mut [[Slot; 2]],
    ) -> Result<Slot> {
        match pointer {
            NodePointer::Empty | NodePointer::Reserved => Ok(Slot::Empty),
            NodePointer::Data(r) => {
                if r as usize >= self.records.len() {
                    return Err(IpfoldError::Serialization(format!(
                        "dangling record index {}",
                        r
                    )));
                }
                Ok(Slot::Data(r))
            }
            NodePointer::Node(id) => {
                let idx = id as usize;
                if idx >= self.nodes.len() {
                    return Err(IpfoldError::Serialization(format!(
                        "dangling node index {}",
                        id
                    )));
                }
                if depth >= IPV4_BITS {
                    return Err(IpfoldError::Serialization(format!(
                        "node {} lies deeper than {} bits",
                        id, IPV4_BITS
                    )));
                }
                match state[idx] {
                    Visit::InProgress => {
                        return Err(IpfoldError::Serialization(format!(
                            "cycle through node {}",
                            id
                        )))
                    }
                    Visit::Done => {
                        return Err(IpfoldError::Serialization(format!(
                            "node {} is reachable from two parents",
                            id
                        )))
                    }
                    Visit::Unvisited => {}
                }

                state[idx] = Visit::InProgress;
                let children = self.nodes[idx].children;
                let left = self.resolve(children[0], depth + 1, state, resolved)?;
                let right = self.resolve(children[1], depth + 1, state, resolved)?;
                state[idx] = Visit::Done;
                resolved[idx] = [left, right];

                Ok(match (left, right) {
                    (Slot::Empty, Slot::Empty) => Slot::Empty,
                    (Slot::Data(a), Slot::Data(b))
                        if a == b || self.records[a as usize] == self.records[b as usize] =>
                    {
                        Slot::Data(a)
                    }
                    _ => Slot::Node(id),
                })
            }
        }
    }

    /// Assign output indices in pre-order, rewriting node references
    fn number(id: u32, resolved: &[[Slot; 2]], out: &mut Vec<[Slot; 2]>) -> u32 {
        let index = out.len() as u32;
        out.push([Slot::Empty; 2]);
        for bit in 0..2 {
            out[index as usize][bit] = match resolved[id as usize][bit] {
                Slot::Node(child) => Slot::Node(Self::number(child, resolved, out)),
                other => other,
            };
        }
        index
    }
}
