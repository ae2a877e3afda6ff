//! Boot metadata propagation from the live root onto a new clone.

use std::fmt;

use crate::consts::PROP_ABSENT;
use crate::engine::StorageEngine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyStatus {
    Copied(String),
    SkippedAbsent,
    ReadFailed(String),
    WriteFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyOutcome {
    pub key: String,
    pub status: PropertyStatus,
}

impl PropertyOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self.status,
            PropertyStatus::ReadFailed(_) | PropertyStatus::WriteFailed(_)
        )
    }
}

impl fmt::Display for PropertyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            PropertyStatus::Copied(v) => write!(f, "{}={} copied", self.key, v),
            PropertyStatus::SkippedAbsent => write!(f, "{} not set on source, skipped", self.key),
            PropertyStatus::ReadFailed(e) => write!(f, "{}: read failed: {}", self.key, e),
            PropertyStatus::WriteFailed(e) => write!(f, "{}: write failed: {}", self.key, e),
        }
    }
}

fn is_absent(v: &str) -> bool {
    let v = v.trim();
    v.is_empty() || v == PROP_ABSENT
}

/// Copy `keys` from `source` to `target`. Absent keys are skipped, never
/// defaulted; no key aborts the others.
pub fn propagate<E: StorageEngine + ?Sized>(
    engine: &E,
    source: &str,
    target: &str,
    keys: &[&str],
) -> Vec<PropertyOutcome> {
    keys.iter()
        .map(|key| {
            let status = match engine.get_property(source, key) {
                Err(e) => PropertyStatus::ReadFailed(format!("{:#}", e)),
                Ok(None) => PropertyStatus::SkippedAbsent,
                Ok(Some(v)) if is_absent(&v) => PropertyStatus::SkippedAbsent,
                Ok(Some(v)) => match engine.set_property(target, key, &v) {
                    Ok(()) => PropertyStatus::Copied(v),
                    Err(e) => PropertyStatus::WriteFailed(format!("{:#}", e)),
                },
            };
            PropertyOutcome {
                key: key.to_string(),
                status,
            }
        })
        .collect()
}
