//! Centralized configuration for rootsnap.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - Defaults are the named constants in `consts.rs` (edited per deployment);
//!   RootsnapConfig::from_env() lets ENV override them without a rebuild.
//! - Builder-style `with_*` setters for tests and embedding.
//!
//! ENV:
//! - RSNAP_KIND = daily|weekly (default daily)
//! - RSNAP_KEEP = N, local clones/snapshots kept per kind
//! - RSNAP_EXPORT_DIR = path; empty or unset disables export
//! - RSNAP_EXPORT_KEEP = N
//! - RSNAP_EXPORT_COMPRESS = 0|1 (zstd)
//! - RSNAP_EXPORT_REMOUNT = 0|1 (toggle ro/rw around the export, default 1)
//! - RSNAP_MAIL_TO = address; empty or unset disables mail
//! - RSNAP_LOG_FILE, RSNAP_LOCK_FILE, RSNAP_MOUNT_POINT, RSNAP_MOUNTS_TABLE, RSNAP_ZFS_BIN
//! - RSNAP_CLONE_FAILURE = retain|rollback (default retain)
//! - RSNAP_COMMANDLINE_REQUIRED = 0|1 (default 0)

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::consts::{
    DEFAULT_EXPORT_KEEP, DEFAULT_KEEP, DEFAULT_LOCK_FILE, DEFAULT_LOG_FILE, DEFAULT_MOUNTS_TABLE,
    DEFAULT_MOUNT_POINT, DEFAULT_ZFS_BIN,
};
use crate::dataset::Kind;
use crate::error::BackupError;

/// What to do with the fresh snapshot when its clone cannot be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneFailurePolicy {
    /// Leave the snapshot for a later retry or manual clone.
    Retain,
    /// Destroy the snapshot so the failed run leaves nothing behind.
    Rollback,
}

impl fmt::Display for CloneFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloneFailurePolicy::Retain => "retain",
            CloneFailurePolicy::Rollback => "rollback",
        })
    }
}

impl FromStr for CloneFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" | "keep" => Ok(CloneFailurePolicy::Retain),
            "rollback" | "destroy" => Ok(CloneFailurePolicy::Rollback),
            other => Err(anyhow!("unknown clone failure policy '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RootsnapConfig {
    /// Default kind for a run without `--kind`.
    pub kind: Kind,

    /// Newest clones (and snapshots) of a kind kept locally.
    pub keep_count: usize,

    /// External export destination; None disables the export stage.
    pub export_dir: Option<PathBuf>,

    /// Newest exported files kept on the destination.
    pub export_keep_count: usize,

    /// zstd-compress exported streams.
    pub export_compress: bool,

    /// Remount the destination rw before and ro after the export.
    pub export_remount: bool,

    /// Transcript recipient; None disables mail.
    pub mail_to: Option<String>,

    pub log_file: PathBuf,
    pub lock_file: PathBuf,
    pub mount_point: PathBuf,
    pub mounts_table: PathBuf,
    pub zfs_bin: PathBuf,

    pub clone_failure: CloneFailurePolicy,

    /// Treat a failure to set the boot commandline on the clone as fatal.
    pub commandline_required: bool,
}

impl Default for RootsnapConfig {
    fn default() -> Self {
        Self {
            kind: Kind::Daily,
            keep_count: DEFAULT_KEEP,
            export_dir: None,
            export_keep_count: DEFAULT_EXPORT_KEEP,
            export_compress: false,
            export_remount: true,
            mail_to: None,
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            mount_point: PathBuf::from(DEFAULT_MOUNT_POINT),
            mounts_table: PathBuf::from(DEFAULT_MOUNTS_TABLE),
            zfs_bin: PathBuf::from(DEFAULT_ZFS_BIN),
            clone_failure: CloneFailurePolicy::Retain,
            commandline_required: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "yes" || s == "on"
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RootsnapConfig {
    /// Load configuration from environment variables on top of the defaults.
    /// Unparsable values are reported, not silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = env_nonempty("RSNAP_KIND") {
            cfg.kind = v.parse()?;
        }
        if let Some(v) = env_nonempty("RSNAP_KEEP") {
            cfg.keep_count = v
                .parse::<usize>()
                .map_err(|e| anyhow!("RSNAP_KEEP='{}': {}", v, e))?;
        }
        if let Ok(v) = std::env::var("RSNAP_EXPORT_DIR") {
            let s = v.trim();
            cfg.export_dir = if s.is_empty() { None } else { Some(PathBuf::from(s)) };
        }
        if let Some(v) = env_nonempty("RSNAP_EXPORT_KEEP") {
            cfg.export_keep_count = v
                .parse::<usize>()
                .map_err(|e| anyhow!("RSNAP_EXPORT_KEEP='{}': {}", v, e))?;
        }
        if let Ok(v) = std::env::var("RSNAP_EXPORT_COMPRESS") {
            cfg.export_compress = env_flag(&v);
        }
        if let Ok(v) = std::env::var("RSNAP_EXPORT_REMOUNT") {
            cfg.export_remount = env_flag(&v);
        }
        if let Ok(v) = std::env::var("RSNAP_MAIL_TO") {
            let s = v.trim();
            cfg.mail_to = if s.is_empty() { None } else { Some(s.to_string()) };
        }
        if let Some(v) = env_nonempty("RSNAP_LOG_FILE") {
            cfg.log_file = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("RSNAP_LOCK_FILE") {
            cfg.lock_file = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("RSNAP_MOUNT_POINT") {
            cfg.mount_point = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("RSNAP_MOUNTS_TABLE") {
            cfg.mounts_table = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("RSNAP_ZFS_BIN") {
            cfg.zfs_bin = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("RSNAP_CLONE_FAILURE") {
            cfg.clone_failure = v.parse()?;
        }
        if let Ok(v) = std::env::var("RSNAP_COMMANDLINE_REQUIRED") {
            cfg.commandline_required = env_flag(&v);
        }

        Ok(cfg)
    }

    /// Reject settings that would make a run destroy what it just created.
    pub fn validate(&self) -> Result<()> {
        if self.keep_count == 0 {
            return Err(BackupError::Precondition(
                "keep count must be at least 1 (0 would destroy the new clone)".into(),
            )
            .into());
        }
        if self.export_dir.is_some() && self.export_keep_count == 0 {
            return Err(BackupError::Precondition(
                "export keep count must be at least 1 (0 would delete the new export)".into(),
            )
            .into());
        }
        Ok(())
    }

    // ----- fluent setters -----

    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_keep_count(mut self, n: usize) -> Self {
        self.keep_count = n;
        self
    }

    pub fn with_export_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.export_dir = dir.map(Into::into);
        self
    }

    pub fn with_export_keep_count(mut self, n: usize) -> Self {
        self.export_keep_count = n;
        self
    }

    pub fn with_export_compress(mut self, on: bool) -> Self {
        self.export_compress = on;
        self
    }

    pub fn with_export_remount(mut self, on: bool) -> Self {
        self.export_remount = on;
        self
    }

    pub fn with_mail_to<S: Into<String>>(mut self, to: Option<S>) -> Self {
        self.mail_to = to.map(Into::into);
        self
    }

    pub fn with_log_file<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.log_file = p.into();
        self
    }

    pub fn with_lock_file<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.lock_file = p.into();
        self
    }

    pub fn with_mounts_table<P: Into<PathBuf>>(mut self, p: P) -> Self {
        self.mounts_table = p.into();
        self
    }

    pub fn with_clone_failure(mut self, policy: CloneFailurePolicy) -> Self {
        self.clone_failure = policy;
        self
    }

    pub fn with_commandline_required(mut self, on: bool) -> Self {
        self.commandline_required = on;
        self
    }
}

impl fmt::Display for RootsnapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kind                 = {}", self.kind)?;
        writeln!(f, "keep_count           = {}", self.keep_count)?;
        writeln!(
            f,
            "export_dir           = {}",
            self.export_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(disabled)".to_string())
        )?;
        writeln!(f, "export_keep_count    = {}", self.export_keep_count)?;
        writeln!(f, "export_compress      = {}", self.export_compress)?;
        writeln!(f, "export_remount       = {}", self.export_remount)?;
        writeln!(
            f,
            "mail_to              = {}",
            self.mail_to.as_deref().unwrap_or("(disabled)")
        )?;
        writeln!(f, "log_file             = {}", self.log_file.display())?;
        writeln!(f, "lock_file            = {}", self.lock_file.display())?;
        writeln!(f, "mount_point          = {}", self.mount_point.display())?;
        writeln!(f, "mounts_table         = {}", self.mounts_table.display())?;
        writeln!(f, "zfs_bin              = {}", self.zfs_bin.display())?;
        writeln!(f, "clone_failure        = {}", self.clone_failure)?;
        write!(f, "commandline_required = {}", self.commandline_required)
    }
}
