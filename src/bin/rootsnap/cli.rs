use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rootsnap::Kind;

/// Bootable ZFS root snapshots, clones and external exports.
///
/// Without a subcommand, performs `run` with the configured kind
/// (RSNAP_KIND, default daily). Meant to be invoked from cron/systemd timers.
#[derive(Parser, Debug)]
#[command(name = "rootsnap", version, about = "Bootable ZFS root backups")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Snapshot the root, clone it bootable, copy boot properties, prune, export.
    Run {
        /// daily | weekly (default from RSNAP_KIND)
        #[arg(long)]
        kind: Option<Kind>,
        /// Skip the external export stage even if RSNAP_EXPORT_DIR is set
        #[arg(long, default_value_t = false)]
        no_export: bool,
    },
    /// List clones and snapshots under retention, newest first
    List {
        #[arg(long)]
        kind: Option<Kind>,
    },
    /// Export one snapshot as a full stream to external media
    ///
    /// Пример:
    ///   rootsnap export --snapshot rpool/ROOT/pve-1@daily_snapshot-2026-10-19_03-00-00
    Export {
        /// Full snapshot name <dataset>@<label>
        #[arg(long)]
        snapshot: String,
        /// Destination directory (default RSNAP_EXPORT_DIR)
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Receive an exported file into a new dataset
    ///
    /// Пример:
    ///   rootsnap restore --file /mnt/backup/daily_snapshot-....zfs --target rpool/ROOT/restored
    Restore {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        target: String,
    },
    /// Print the effective configuration
    Config,
}

impl Cli {
    pub fn parse() -> Self {
        <Cli as Parser>::parse()
    }
}
