//! MMDB-specific Type Definitions

use crate::error::IpfoldError;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Zero bytes between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Supported binary format version
pub const BINARY_FORMAT_MAJOR_VERSION: u16 = 2;
/// Minor format version written to new files
pub const BINARY_FORMAT_MINOR_VERSION: u16 = 0;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only
    V4,
}

impl IpVersion {
    /// Number written to the `ip_version` metadata field
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
        }
    }

    /// Parse the `ip_version` metadata field
    pub fn from_number(n: u64) -> Result<Self, IpfoldError> {
        match n {
            4 => Ok(IpVersion::V4),
            _ => Err(IpfoldError::UnsupportedVersion(format!(
                "IP version {} (only IPv4 databases are supported)",
                n
            ))),
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Largest record value this size can hold
    pub fn max_value(self) -> u64 {
        (1u64 << self.bits()) - 1
    }

    /// Bit width
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Smallest record size able to hold `max_record`
    pub fn smallest_for(max_record: u64) -> Option<Self> {
        [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32]
            .into_iter()
            .find(|size| max_record <= size.max_value())
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self, IpfoldError> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(IpfoldError::UnsupportedVersion(format!(
                "record size of {} bits",
                bits
            ))),
        }
    }

    /// Read the (left, right) records of node `node_id` from the tree bytes
    pub fn read_node(self, tree: &[u8], node_id: usize) -> Option<(u32, u32)> {
        let size = self.node_bytes();
        let n = tree.get(node_id * size..(node_id + 1) * size)?;
        let be24 = |b: &[u8]| (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
        Some(match self {
            RecordSize::Bits24 => (be24(&n[0..3]), be24(&n[3..6])),
            RecordSize::Bits28 => {
                let left = ((n[3] as u32 & 0xF0) << 20) | be24(&n[0..3]);
                let right = ((n[3] as u32 & 0x0F) << 24) | be24(&n[4..7]);
                (left, right)
            }
            RecordSize::Bits32 => (
                u32::from_be_bytes([n[0], n[1], n[2], n[3]]),
                u32::from_be_bytes([n[4], n[5], n[6], n[7]]),
            ),
        })
    }

    /// Append one node's (left, right) records to the tree bytes
    pub fn write_node(self, tree: &mut Vec<u8>, left: u32, right: u32) {
        match self {
            RecordSize::Bits24 => {
                tree.extend_from_slice(&left.to_be_bytes()[1..]);
                tree.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits28 => {
                // Middle byte: left high nibble, then right high nibble
                tree.extend_from_slice(&left.to_be_bytes()[1..]);
                tree.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
                tree.extend_from_slice(&right.to_be_bytes()[1..]);
            }
            RecordSize::Bits32 => {
                tree.extend_from_slice(&left.to_be_bytes());
                tree.extend_from_slice(&right.to_be_bytes());
            }
        }
    }
}
