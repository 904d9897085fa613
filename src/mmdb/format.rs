//! MMDB metadata section
//!
//! The metadata map sits after the last `METADATA_MARKER` in the file. A
//! reader locates it by searching backward from the end of the file (only
//! the last 128KB are searched), which lets an MMDB file be appended to
//! other content.

use super::types::{
    IpVersion, RecordSize, BINARY_FORMAT_MAJOR_VERSION, BINARY_FORMAT_MINOR_VERSION,
    METADATA_MARKER,
};
use crate::data_section::{DataDecoder, DataEncoder, DataValue};
use crate::error::IpfoldError;
use std::collections::BTreeMap;

/// Size of the window at the end of the file searched for the marker
const METADATA_SEARCH_SIZE: usize = 128 * 1024;

/// Database header/metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version
    pub ip_version: IpVersion,
    /// Database type, e.g. "GeoIP-City"
    pub database_type: String,
    /// Locale codes for which records may contain data
    pub languages: Vec<String>,
    /// Description by language code
    pub description: BTreeMap<String, String>,
    /// Build time in seconds since the Unix epoch
    pub build_epoch: u64,
}

impl Metadata {
    /// Metadata as the map written to disk
    pub fn to_value(&self) -> DataValue {
        let mut map = BTreeMap::new();
        map.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(BINARY_FORMAT_MAJOR_VERSION),
        );
        map.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(BINARY_FORMAT_MINOR_VERSION),
        );
        map.insert("build_epoch".to_string(), DataValue::Uint64(self.build_epoch));
        map.insert(
            "database_type".to_string(),
            DataValue::String(self.database_type.clone()),
        );
        map.insert(
            "description".to_string(),
            DataValue::Map(
                self.description
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert(
            "ip_version".to_string(),
            DataValue::Uint16(self.ip_version.number()),
        );
        map.insert(
            "languages".to_string(),
            DataValue::Array(
                self.languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        map.insert("node_count".to_string(), DataValue::Uint32(self.node_count));
        map.insert(
            "record_size".to_string(),
            DataValue::Uint16(self.record_size.bits()),
        );
        DataValue::Map(map)
    }

    /// Encoded metadata bytes (without the marker)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = DataEncoder::new();
        encoder.encode(&self.to_value());
        encoder.into_bytes()
    }

    /// Parse a metadata map
    ///
    /// Format and IP version problems are reported as
    /// [`IpfoldError::UnsupportedVersion`]; missing or mistyped fields as
    /// [`IpfoldError::CorruptDatabase`].
    pub fn from_value(value: &DataValue) -> Result<Self, IpfoldError> {
        let map = value
            .as_map()
            .ok_or_else(|| IpfoldError::CorruptDatabase("metadata is not a map".to_string()))?;

        let major = extract_uint(map, "binary_format_major_version")?;
        if major != BINARY_FORMAT_MAJOR_VERSION as u64 {
            return Err(IpfoldError::UnsupportedVersion(format!(
                "binary format major version {}",
                major
            )));
        }

        let ip_version = IpVersion::from_number(extract_uint(map, "ip_version")?)?;
        let record_size = RecordSize::from_bits(extract_uint(map, "record_size")?)?;
        let node_count = u32::try_from(extract_uint(map, "node_count")?).map_err(|_| {
            IpfoldError::CorruptDatabase("node_count does not fit in 32 bits".to_string())
        })?;

        let database_type = match map.get("database_type") {
            Some(DataValue::String(s)) => s.clone(),
            Some(_) => return Err(field_type_error("database_type")),
            None => String::new(),
        };

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| field_type_error("languages"))?,
            Some(_) => return Err(field_type_error("languages")),
            None => Vec::new(),
        };

        let description = match map.get("description") {
            Some(DataValue::Map(entries)) => entries
                .iter()
                .map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<Option<BTreeMap<_, _>>>()
                .ok_or_else(|| field_type_error("description"))?,
            Some(_) => return Err(field_type_error("description")),
            None => BTreeMap::new(),
        };

        let build_epoch = match map.get("build_epoch") {
            Some(_) => extract_uint(map, "build_epoch")?,
            None => 0,
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            database_type,
            languages,
            description,
            build_epoch,
        })
    }

    /// Find, decode and validate the metadata of a whole database file
    ///
    /// Returns the metadata and the offset of the marker, which is where the
    /// data section ends.
    pub fn from_file(data: &[u8]) -> Result<(Self, usize), IpfoldError> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];

        let value = DataDecoder::new(metadata_bytes).decode(0).map_err(|e| {
            IpfoldError::CorruptDatabase(format!("failed to decode metadata: {}", e))
        })?;

        Ok((Self::from_value(&value)?, marker_offset))
    }
}

/// Find the last metadata marker in the file
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, IpfoldError> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_SIZE);

    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or_else(|| IpfoldError::CorruptDatabase("metadata marker not found".to_string()))
}

fn field_type_error(key: &str) -> IpfoldError {
    IpfoldError::CorruptDatabase(format!("metadata field '{}' has the wrong type", key))
}

fn extract_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Result<u64, IpfoldError> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            IpfoldError::CorruptDatabase(format!(
                "metadata field '{}' is not an unsigned integer",
                key
            ))
        }),
        None => Err(IpfoldError::CorruptDatabase(format!(
            "required metadata field '{}' not found",
            key
        ))),
    }
}
