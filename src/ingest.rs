//! NDJSON ingest pipeline
//!
//! Turns newline-delimited JSON objects into tree inserts. Each line holds
//! one object with an `ip` field (bare address or CIDR); a [`Profile`]
//! decides how the remaining fields become the inserted record.
//!
//! ```rust
//! use ipfold::ingest::{BuildPipeline, Profile};
//! use ipfold::{Tree, TreeOptions};
//!
//! let tree = Tree::new(TreeOptions {
//!     include_reserved_networks: true,
//!     ..TreeOptions::default()
//! });
//! let mut pipeline = BuildPipeline::new(tree).with_profile(Profile::Raw);
//!
//! let input = r#"{"ip": "192.0.2.0/24", "owner": "docs"}"#;
//! let report = pipeline.process_reader(input.as_bytes())?;
//! assert_eq!(report.inserted, 1);
//! # Ok::<(), ipfold::IpfoldError>(())
//! ```

use crate::data_section::DataValue;
use crate::error::{IpfoldError, Result};
use crate::ip_tree::Tree;
use crate::merge::MergeStrategy;
use crate::prefix::Prefix;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// How input objects map to records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// City-level geolocation record built from `name`, `floor`, position
    /// and accuracy fields, filled in from [`GeoDefaults`]
    #[default]
    Geo,
    /// Every field except `ip` is stored as-is
    Raw,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "geo" => Ok(Profile::Geo),
            "raw" => Ok(Profile::Raw),
            other => Err(format!("unknown profile '{}' (expected geo or raw)", other)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Geo => write!(f, "geo"),
            Profile::Raw => write!(f, "raw"),
        }
    }
}

/// What happens when a single input line cannot be inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Stop the build at the first bad line
    #[default]
    Halt,
    /// Log a warning and continue with the next line
    Skip,
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "halt" => Ok(ErrorPolicy::Halt),
            "skip" => Ok(ErrorPolicy::Skip),
            other => Err(format!("unknown error policy '{}' (expected halt or skip)", other)),
        }
    }
}

/// Fixed values of the geo profile
///
/// Loaded from a JSON file to describe a site other than the built-in one;
/// fields absent from the file keep their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeoDefaults {
    /// English continent name
    pub continent_name: String,
    /// GeoNames id of the continent
    pub continent_geoname_id: u32,
    /// Two-letter continent code
    pub continent_code: String,
    /// English country name
    pub country_name: String,
    /// GeoNames id of the country
    pub country_geoname_id: u32,
    /// ISO 3166-1 alpha-2 code
    pub country_code: String,
    /// EU membership flag of the country
    pub is_in_european_union: bool,
    /// City name, stored for both `en` and `de`
    pub city_name: String,
    /// GeoNames id of the city
    pub city_geoname_id: u32,
    /// Used when a line has no usable `lat`/`lon`
    pub latitude: f64,
    /// Used together with `latitude`
    pub longitude: f64,
    /// Accuracy in kilometers when a line has none
    pub accuracy_radius: f32,
    /// Store `floor` as `location.time_zone`
    pub floor_as_timezone: bool,
}

impl Default for GeoDefaults {
    fn default() -> Self {
        Self {
            continent_name: "Europe".to_string(),
            continent_geoname_id: 6255148,
            continent_code: "EU".to_string(),
            country_name: "Germany".to_string(),
            country_geoname_id: 2921044,
            country_code: "DE".to_string(),
            is_in_european_union: true,
            city_name: "Göttingen".to_string(),
            city_geoname_id: 2918632,
            latitude: 51.5441,
            longitude: 9.9254,
            accuracy_radius: 5.0,
            floor_as_timezone: true,
        }
    }
}

impl GeoDefaults {
    /// Read defaults from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| IpfoldError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Input line as read by the geo profile
#[derive(Debug, Deserialize)]
struct GeoInput {
    ip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    floor: String,
    accuracy_radius: Option<f32>,
    #[serde(default, deserialize_with = "null_as_default")]
    lon: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    lat: f64,
    /// `[lon, lat]`
    coordinates: Option<[f64; 2]>,
}

/// An explicit `null` reads like an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Counters for one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Non-blank input lines
    pub lines_read: usize,
    /// Lines inserted into the tree
    pub inserted: usize,
    /// Lines dropped under [`ErrorPolicy::Skip`]
    pub skipped: usize,
}

/// Feeds input records into a tree it owns
pub struct BuildPipeline {
    tree: Tree,
    profile: Profile,
    defaults: GeoDefaults,
    strategy: MergeStrategy,
    policy: ErrorPolicy,
    report: BuildReport,
    last_line: usize,
}

impl BuildPipeline {
    /// Pipeline inserting into `tree` with the geo profile and top-level merge
    pub fn new(tree: Tree) -> Self {
        Self {
            tree,
            profile: Profile::default(),
            defaults: GeoDefaults::default(),
            strategy: MergeStrategy::default(),
            policy: ErrorPolicy::default(),
            report: BuildReport::default(),
            last_line: 0,
        }
    }

    /// Set the record profile
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    /// Set the fixed values used by the geo profile
    pub fn with_geo_defaults(mut self, defaults: GeoDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the merge strategy for every insert
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set what happens to bad lines
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Counters so far
    pub fn report(&self) -> BuildReport {
        self.report
    }

    /// Input line number of the last non-blank line handled
    ///
    /// After a halted build this is the line that failed.
    pub fn last_line(&self) -> usize {
        self.last_line
    }

    /// The tree being built
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Hand the tree back, e.g. for serialization
    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// Process every line of an NDJSON stream
    ///
    /// Read errors are always fatal. Per-line errors, including lines that
    /// are not valid UTF-8, follow the pipeline's [`ErrorPolicy`].
    pub fn process_reader<R: BufRead>(&mut self, mut reader: R) -> Result<BuildReport> {
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            match std::str::from_utf8(&buf) {
                Ok(line) => self.process_line(line, line_no)?,
                Err(e) => {
                    self.last_line = line_no;
                    self.report.lines_read += 1;
                    let err = IpfoldError::InvalidInput(format!("invalid UTF-8: {}", e));
                    self.settle(Err(err), line_no)?;
                }
            }
        }
        Ok(self.report)
    }

    /// Process one input line; `line_no` is its position in the input
    pub fn process_line(&mut self, line: &str, line_no: usize) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        self.last_line = line_no;
        self.report.lines_read += 1;

        let result = self.insert_line(line);
        self.settle(result, line_no)
    }

    /// Count the outcome of one line and apply the error policy
    fn settle(&mut self, result: Result<()>, line_no: usize) -> Result<()> {
        match result {
            Ok(()) => {
                self.report.inserted += 1;
                Ok(())
            }
            Err(e) => match self.policy {
                ErrorPolicy::Halt => Err(e),
                ErrorPolicy::Skip => {
                    warn!(line = line_no, error = %e, "skipping input line");
                    self.report.skipped += 1;
                    Ok(())
                }
            },
        }
    }

    fn insert_line(&mut self, line: &str) -> Result<()> {
        match self.profile {
            Profile::Geo => {
                let input: GeoInput = serde_json::from_str(line)?;
                let prefix = Prefix::parse(&input.ip)?;
                let record = geo_record(&input, &self.defaults);
                self.tree.insert_prefix(prefix, record, self.strategy)?;
                info!(
                    network = %prefix,
                    name = %input.name,
                    lat = input.lat,
                    lon = input.lon,
                    floor = %input.floor,
                    accuracy_radius = input.accuracy_radius.unwrap_or(self.defaults.accuracy_radius),
                    "Inserted"
                );
            }
            Profile::Raw => {
                let (prefix, record) = raw_record(line)?;
                let fields = record.as_map().map_or(0, |m| m.len());
                self.tree.insert_prefix(prefix, record, self.strategy)?;
                info!(network = %prefix, fields, "Inserted");
            }
        }
        Ok(())
    }
}

fn names(pairs: &[(&str, &str)]) -> DataValue {
    pairs
        .iter()
        .map(|(lang, name)| (*lang, DataValue::from(*name)))
        .collect()
}

fn geo_record(input: &GeoInput, defaults: &GeoDefaults) -> DataValue {
    let (longitude, latitude) = if input.lon != 0.0 && input.lat != 0.0 {
        (input.lon, input.lat)
    } else {
        let [lon, lat] = input
            .coordinates
            .unwrap_or([defaults.longitude, defaults.latitude]);
        (lon, lat)
    };
    let accuracy = input.accuracy_radius.unwrap_or(defaults.accuracy_radius);

    let mut location = BTreeMap::new();
    location.insert("longitude".to_string(), DataValue::Double(longitude));
    location.insert("latitude".to_string(), DataValue::Double(latitude));
    location.insert(
        "accuracy_radius".to_string(),
        DataValue::Int32(accuracy as i32),
    );
    if defaults.floor_as_timezone {
        location.insert("time_zone".to_string(), DataValue::from(input.floor.as_str()));
    }

    let continent: DataValue = [
        ("geoname_id", DataValue::from(defaults.continent_geoname_id)),
        ("code", DataValue::from(defaults.continent_code.as_str())),
        ("names", names(&[("en", defaults.continent_name.as_str())])),
    ]
    .into_iter()
    .collect();

    let country: DataValue = [
        ("geoname_id", DataValue::from(defaults.country_geoname_id)),
        ("iso_code", DataValue::from(defaults.country_code.as_str())),
        (
            "is_in_european_union",
            DataValue::from(defaults.is_in_european_union),
        ),
        ("names", names(&[("en", defaults.country_name.as_str())])),
    ]
    .into_iter()
    .collect();

    let city: DataValue = [
        ("geoname_id", DataValue::from(defaults.city_geoname_id)),
        (
            "names",
            names(&[("en", defaults.city_name.as_str()), ("de", defaults.city_name.as_str())]),
        ),
    ]
    .into_iter()
    .collect();

    let subdivision: DataValue = [
        ("iso_code", DataValue::from(format!("{:>2}", input.floor))),
        ("name", DataValue::from(input.name.as_str())),
        ("names", names(&[("en", input.name.as_str()), ("de", input.name.as_str())])),
    ]
    .into_iter()
    .collect();

    [
        ("continent", continent),
        ("country", country),
        ("city", city),
        ("name", DataValue::from(input.name.as_str())),
        ("location", DataValue::Map(location)),
        ("subdivisions", DataValue::Array(vec![subdivision])),
        ("floor", DataValue::from(input.floor.as_str())),
    ]
    .into_iter()
    .collect()
}

fn raw_record(line: &str) -> Result<(Prefix, DataValue)> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let serde_json::Value::Object(mut fields) = value else {
        return Err(IpfoldError::InvalidInput(
            "expected a JSON object".to_string(),
        ));
    };

    let prefix = match fields.remove("ip") {
        Some(serde_json::Value::String(ip)) => Prefix::parse(&ip)?,
        Some(other) => {
            return Err(IpfoldError::InvalidInput(format!(
                "'ip' must be a string, got {}",
                other
            )))
        }
        None => return Err(IpfoldError::InvalidInput("missing 'ip' field".to_string())),
    };

    let record = fields
        .iter()
        .filter_map(|(k, v)| json_to_data_value(v).map(|v| (k.as_str(), v)))
        .collect();
    Ok((prefix, record))
}

/// Convert a JSON value to a record value
///
/// Integers become `Uint32`, `Uint64` or `Int32` depending on range, other
/// numbers `Double`. `null` has no record representation and is dropped,
/// including inside arrays and objects.
pub fn json_to_data_value(json: &serde_json::Value) -> Option<DataValue> {
    Some(match json {
        serde_json::Value::Null => return None,
        serde_json::Value::Bool(b) => DataValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                match u32::try_from(u) {
                    Ok(small) => DataValue::Uint32(small),
                    Err(_) => DataValue::Uint64(u),
                }
            } else if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                DataValue::Int32(i)
            } else {
                DataValue::Double(n.as_f64()?)
            }
        }
        serde_json::Value::String(s) => DataValue::String(s.clone()),
        serde_json::Value::Array(items) => {
            DataValue::Array(items.iter().filter_map(json_to_data_value).collect())
        }
        serde_json::Value::Object(obj) => DataValue::Map(
            obj.iter()
                .filter_map(|(k, v)| json_to_data_value(v).map(|v| (k.clone(), v)))
                .collect(),
        ),
    })
}
