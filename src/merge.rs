//! Record merge strategies
//!
//! A strategy decides what a tree slot holds after an insert, given the
//! record already there (if any) and the incoming record. The default,
//! [`MergeStrategy::TopLevelMerge`], is a shallow right-biased union:
//! incoming top-level keys replace existing ones wholesale, nested maps are
//! *not* merged recursively.

use crate::data_section::DataValue;
use crate::error::IpfoldError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// How an incoming record combines with the record already covering a range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Shallow union of top-level map keys, incoming wins on conflict
    #[default]
    TopLevelMerge,
    /// Incoming record replaces the existing one
    Replace,
    /// Recursive union of nested maps, incoming wins on non-map conflicts
    DeepMerge,
    /// Clear the range
    Remove,
}

impl MergeStrategy {
    /// Compute the new slot contents
    ///
    /// Returns `Ok(None)` when the slot should become empty. With
    /// `strict_types`, a top-level key whose value changes variant is a
    /// [`IpfoldError::RecordType`] error.
    pub fn apply(
        self,
        existing: Option<&DataValue>,
        incoming: &DataValue,
        strict_types: bool,
    ) -> Result<Option<DataValue>, IpfoldError> {
        let merged = match (self, existing) {
            (MergeStrategy::Remove, _) => return Ok(None),
            (_, None) | (MergeStrategy::Replace, Some(_)) => incoming.clone(),
            (MergeStrategy::TopLevelMerge, Some(old)) => top_level_merge(old, incoming),
            (MergeStrategy::DeepMerge, Some(old)) => deep_merge(old, incoming),
        };

        if strict_types {
            if let Some(old) = existing {
                check_field_types(old, &merged)?;
            }
        }

        Ok(Some(merged))
    }
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top-level" | "toplevel" => Ok(MergeStrategy::TopLevelMerge),
            "replace" => Ok(MergeStrategy::Replace),
            "deep" => Ok(MergeStrategy::DeepMerge),
            "remove" => Ok(MergeStrategy::Remove),
            other => Err(format!(
                "unknown merge strategy '{}' (expected top-level, replace, deep or remove)",
                other
            )),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeStrategy::TopLevelMerge => "top-level",
            MergeStrategy::Replace => "replace",
            MergeStrategy::DeepMerge => "deep",
            MergeStrategy::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Shallow right-biased union; non-map inputs fall back to `incoming`
pub fn top_level_merge(existing: &DataValue, incoming: &DataValue) -> DataValue {
    match (existing, incoming) {
        (DataValue::Map(old), DataValue::Map(new)) => {
            let mut out = old.clone();
            for (k, v) in new {
                out.insert(k.clone(), v.clone());
            }
            DataValue::Map(out)
        }
        _ => incoming.clone(),
    }
}

/// Recursive union of maps at every level; arrays and scalars are replaced
pub fn deep_merge(existing: &DataValue, incoming: &DataValue) -> DataValue {
    match (existing, incoming) {
        (DataValue::Map(old), DataValue::Map(new)) => {
            let mut out: BTreeMap<String, DataValue> = old.clone();
            for (k, v) in new {
                let merged = match out.get(k) {
                    Some(prev) => deep_merge(prev, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            DataValue::Map(out)
        }
        _ => incoming.clone(),
    }
}

fn check_field_types(existing: &DataValue, merged: &DataValue) -> Result<(), IpfoldError> {
    match (existing, merged) {
        (DataValue::Map(old), DataValue::Map(new)) => {
            for (field, old_value) in old {
                if let Some(new_value) = new.get(field) {
                    if std::mem::discriminant(old_value) != std::mem::discriminant(new_value) {
                        return Err(IpfoldError::RecordType {
                            field: field.clone(),
                            existing: old_value.type_name(),
                            incoming: new_value.type_name(),
                        });
                    }
                }
            }
            Ok(())
        }
        _ if std::mem::discriminant(existing) != std::mem::discriminant(merged) => {
            Err(IpfoldError::RecordType {
                field: String::new(),
                existing: existing.type_name(),
                incoming: merged.type_name(),
            })
        }
        _ => Ok(()),
    }
}
