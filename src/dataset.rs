//! Dataset identifiers, backup kinds and the naming scheme for snapshots/clones.
//!
//! Схема имён:
//! - snapshot: `<root>@<kind>_snapshot-<ts>`
//! - clone:    `<pool>/ROOT/<kind>_clone-<ts>`
//!
//! `<ts>` has second granularity for daily runs and minute granularity for
//! weekly runs; both formats sort lexicographically in time order.

use anyhow::{anyhow, Result};
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

use crate::consts::{
    BOOT_CONTAINER, CLONE_TAG, DAILY_TS_FORMAT, SNAPSHOT_TAG, WEEKLY_TS_FORMAT,
};

/// Name of a dataset (filesystem) in the engine namespace: `<pool>/<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow!("empty dataset name"));
        }
        if s.contains('@') {
            return Err(anyhow!("'{}' names a snapshot, not a dataset", s));
        }
        if s.starts_with('/') || s.ends_with('/') || s.contains("//") {
            return Err(anyhow!("malformed dataset name '{}'", s));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segment before the first separator.
    pub fn pool(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Everything after the pool (empty for the pool root dataset).
    pub fn path(&self) -> &str {
        self.0.split_once('/').map(|(_, p)| p).unwrap_or("")
    }

    /// Last path segment.
    pub fn basename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn has_boot_container(&self) -> bool {
        self.path().split('/').any(|seg| seg == BOOT_CONTAINER)
    }

    /// `<pool>/ROOT`, the container boot environments live in.
    pub fn boot_container(&self) -> DatasetId {
        DatasetId(format!("{}/{}", self.pool(), BOOT_CONTAINER))
    }

    pub fn child(&self, name: &str) -> DatasetId {
        DatasetId(format!("{}/{}", self.0, name))
    }

    pub fn snapshot(&self, label: &str) -> String {
        format!("{}@{}", self.0, label)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Split `<dataset>@<label>`.
pub fn split_snapshot(name: &str) -> Option<(&str, &str)> {
    let (ds, label) = name.split_once('@')?;
    if ds.is_empty() || label.is_empty() {
        return None;
    }
    Some((ds, label))
}

/// Backup cadence; decides label prefixes and timestamp granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Daily,
    Weekly,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Daily => "daily",
            Kind::Weekly => "weekly",
        }
    }

    fn ts_format(&self) -> &'static str {
        match self {
            Kind::Daily => DAILY_TS_FORMAT,
            Kind::Weekly => WEEKLY_TS_FORMAT,
        }
    }

    pub fn timestamp(&self, at: NaiveDateTime) -> String {
        at.format(self.ts_format()).to_string()
    }

    /// `daily_snapshot-`
    pub fn snapshot_prefix(&self) -> String {
        format!("{}_{}-", self.as_str(), SNAPSHOT_TAG)
    }

    /// `daily_clone-`
    pub fn clone_prefix(&self) -> String {
        format!("{}_{}-", self.as_str(), CLONE_TAG)
    }

    pub fn snapshot_label(&self, at: NaiveDateTime) -> String {
        format!("{}{}", self.snapshot_prefix(), self.timestamp(at))
    }

    pub fn clone_basename(&self, at: NaiveDateTime) -> String {
        format!("{}{}", self.clone_prefix(), self.timestamp(at))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Kind::Daily),
            "weekly" => Ok(Kind::Weekly),
            other => Err(anyhow!("unknown backup kind '{}' (daily|weekly)", other)),
        }
    }
}

/// Names produced by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunNames {
    pub label: String,
    pub snapshot: String,
    pub clone: DatasetId,
}

impl RunNames {
    pub fn new(root: &DatasetId, kind: Kind, at: NaiveDateTime) -> Self {
        let label = kind.snapshot_label(at);
        let snapshot = root.snapshot(&label);
        let clone = root.boot_container().child(&kind.clone_basename(at));
        Self {
            label,
            snapshot,
            clone,
        }
    }
}
