//! Root dataset discovery.
//!
//! Reads the mount table and resolves the dataset mounted at the designated
//! mount point. The engine is asked whether the source is one of its datasets;
//! if the engine cannot answer, the naming convention is used instead.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::BOOT_CONTAINER;
use crate::dataset::DatasetId;
use crate::engine::StorageEngine;
use crate::error::BackupError;

/// One line of `/proc/self/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fstype: String,
    pub options: String,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.split(',').any(|o| o == "ro")
    }
}

/// The kernel escapes blanks in mount fields as octal (`\040`).
fn unescape_mount_field(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let oct = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
            if let Some(v) = oct.and_then(|o| u8::from_str_radix(o, 8).ok()) {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn parse_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut it = line.split_whitespace();
            let source = it.next()?;
            let target = it.next()?;
            let fstype = it.next()?;
            let options = it.next().unwrap_or("");
            Some(MountEntry {
                source: unescape_mount_field(source),
                target: unescape_mount_field(target),
                fstype: fstype.to_string(),
                options: options.to_string(),
            })
        })
        .collect()
}

/// Last entry wins: later mounts shadow earlier ones at the same target.
pub fn find_mount<'a>(entries: &'a [MountEntry], mount_point: &Path) -> Option<&'a MountEntry> {
    entries
        .iter()
        .rev()
        .find(|e| Path::new(&e.target) == mount_point)
}

#[derive(Debug, Clone)]
pub struct RootLocator {
    mounts_table: PathBuf,
    mount_point: PathBuf,
}

impl RootLocator {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(mounts_table: P, mount_point: Q) -> Self {
        Self {
            mounts_table: mounts_table.into(),
            mount_point: mount_point.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Resolve the dataset backing the root mount.
    pub fn locate_root<E: StorageEngine + ?Sized>(&self, engine: &E) -> Result<DatasetId> {
        let text = fs::read_to_string(&self.mounts_table)
            .with_context(|| format!("read mount table {}", self.mounts_table.display()))?;
        self.locate_in(&text, engine)
    }

    pub fn locate_in<E: StorageEngine + ?Sized>(&self, mounts: &str, engine: &E) -> Result<DatasetId> {
        let entries = parse_mounts(mounts);
        let entry = find_mount(&entries, &self.mount_point).ok_or_else(|| {
            BackupError::RootNotFound(self.mount_point.display().to_string())
        })?;
        debug!(
            "root: {} on {} type {}",
            entry.source, entry.target, entry.fstype
        );

        let managed = entry.fstype == "zfs"
            || match engine.is_managed(&entry.source) {
                Ok(yes) => yes,
                Err(e) => {
                    warn!("root: engine capability query failed ({:#}), using name check", e);
                    looks_like_dataset(&entry.source)
                }
            };
        if !managed {
            return Err(BackupError::NotSupported(
                entry.source.clone(),
                format!("fstype {} is not engine-managed", entry.fstype),
            )
            .into());
        }

        let ds = DatasetId::parse(&entry.source)
            .map_err(|e| BackupError::NotSupported(entry.source.clone(), format!("{:#}", e)))?;
        if !ds.has_boot_container() {
            return Err(BackupError::NotSupported(
                entry.source.clone(),
                format!("no '{}' path segment", BOOT_CONTAINER),
            )
            .into());
        }
        Ok(ds)
    }
}

/// Portable fallback: `<pool>/<path>` with no device-path prefix.
fn looks_like_dataset(source: &str) -> bool {
    source.contains('/') && !source.starts_with('/')
}
