//! One backup session: preconditions, lifecycle, optional export, and the
//! final flush of the journal to the log file and notifier.

use anyhow::{anyhow, Result};
use log::warn;
use std::path::Path;

use crate::config::RootsnapConfig;
use crate::dataset::Kind;
use crate::engine::StorageEngine;
use crate::error::BackupError;
use crate::export::{
    run_export_stage, ExportOptions, ExportStatus, ExportedFile, Exporter, MountControl,
};
use crate::journal::{Journal, Level};
use crate::lifecycle::{Lifecycle, LifecycleOptions, RunReport};
use crate::lock::try_acquire_run_lock;
use crate::notify::Notifier;
use crate::retention::{RetentionPolicy, SweepReport};
use crate::root::RootLocator;

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub run: RunReport,
    pub export: Option<ExportStatus>,
}

/// Run a full backup of the current root.
///
/// Fatal errors (preconditions, snapshot or clone creation) are returned;
/// everything else is in the journal and the returned report.
pub fn run_backup<E, M>(
    cfg: &RootsnapConfig,
    engine: &E,
    mount: &M,
    kind: Kind,
    with_export: bool,
    journal: &mut Journal,
) -> Result<SessionReport>
where
    E: StorageEngine + ?Sized,
    M: MountControl + ?Sized,
{
    if let Err(e) = preflight(cfg, with_export) {
        journal.error(format!("{:#}", e));
        return Err(e);
    }

    let locator = RootLocator::new(&cfg.mounts_table, &cfg.mount_point);
    let root = match locator.locate_root(engine) {
        Ok(r) => r,
        Err(e) => {
            journal.error(format!("{:#}", e));
            return Err(e);
        }
    };
    journal.info(format!(
        "root dataset {} on {}",
        root,
        locator.mount_point().display()
    ));

    let lifecycle = Lifecycle::new(engine, LifecycleOptions::from(cfg));
    let run = lifecycle.run(&root, kind, journal)?;

    let export = match (&cfg.export_dir, with_export) {
        (Some(dir), true) => {
            let opts = ExportOptions {
                retention: RetentionPolicy::new(cfg.export_keep_count),
                compress: cfg.export_compress,
            };
            let exporter = Exporter::new(engine, mount, opts);
            Some(run_export_stage(&exporter, &run.names.snapshot, dir, journal))
        }
        _ => None,
    };

    Ok(SessionReport { run, export })
}

/// One-off export of `snapshot` outside a scheduled run.
///
/// Holds the run lock for the whole export, so it never toggles the media
/// while a `run` is writing to it. The transcript is flushed through
/// `notifier` like a run's, including the CRITICAL alert.
pub fn export_once<E, M, N>(
    cfg: &RootsnapConfig,
    engine: &E,
    mount: &M,
    notifier: &N,
    snapshot: &str,
    dest: Option<&Path>,
    journal: &mut Journal,
) -> Result<(ExportedFile, SweepReport)>
where
    E: StorageEngine + ?Sized,
    M: MountControl + ?Sized,
    N: Notifier + ?Sized,
{
    let result = export_locked(cfg, engine, mount, snapshot, dest, journal);
    if let Err(e) = &result {
        journal.error(format!("{:#}", e));
    }
    let subj = format!(
        "rootsnap export of {} on {}: {}",
        snapshot,
        hostname(),
        outcome(result.is_ok(), journal)
    );
    flush(cfg, journal, notifier, &subj);
    result
}

fn export_locked<E, M>(
    cfg: &RootsnapConfig,
    engine: &E,
    mount: &M,
    snapshot: &str,
    dest: Option<&Path>,
    journal: &mut Journal,
) -> Result<(ExportedFile, SweepReport)>
where
    E: StorageEngine + ?Sized,
    M: MountControl + ?Sized,
{
    let dest = dest
        .or(cfg.export_dir.as_deref())
        .ok_or_else(|| anyhow!("no destination: pass --dest or set RSNAP_EXPORT_DIR"))?;
    cfg.validate()?;
    let _lock = try_acquire_run_lock(&cfg.lock_file)?;

    let opts = ExportOptions {
        retention: RetentionPolicy::new(cfg.export_keep_count.max(1)),
        compress: cfg.export_compress,
    };
    Exporter::new(engine, mount, opts).export(snapshot, dest, journal)
}

/// Checks that must pass before anything is mutated.
fn preflight(cfg: &RootsnapConfig, with_export: bool) -> Result<()> {
    cfg.validate()?;
    if with_export {
        if let Some(dir) = &cfg.export_dir {
            if !dir.is_dir() {
                return Err(BackupError::Precondition(format!(
                    "export destination {} is not available",
                    dir.display()
                ))
                .into());
            }
        }
    }
    Ok(())
}

/// Mail subject summarizing the session.
pub fn subject(kind: Kind, ok: bool, journal: &Journal) -> String {
    format!("rootsnap {} backup on {}: {}", kind, hostname(), outcome(ok, journal))
}

fn outcome(ok: bool, journal: &Journal) -> &'static str {
    if !ok {
        return "FAILED";
    }
    match journal.worst() {
        Level::Info => "OK",
        Level::Warning | Level::Error => "OK with warnings",
        Level::Critical => "OK, CRITICAL condition",
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Append the transcript to the log file, mail it, and raise the alert
/// channel for CRITICAL entries. Sink failures are logged, never returned.
pub fn flush<N: Notifier + ?Sized>(
    cfg: &RootsnapConfig,
    journal: &Journal,
    notifier: &N,
    subject: &str,
) {
    if let Err(e) = journal.append_to(&cfg.log_file) {
        warn!("log file {}: {:#}", cfg.log_file.display(), e);
    }
    if cfg.mail_to.is_some() {
        if let Err(e) = notifier.send(subject, &journal.render()) {
            warn!("mail to {:?} failed: {:#}", cfg.mail_to, e);
        }
    }
    if journal.has_critical() {
        let body = journal.messages(Level::Critical).join("\n");
        if let Err(e) = notifier.alert(subject, &body) {
            warn!("critical alert delivery failed: {:#}", e);
        }
        eprintln!("rootsnap: CRITICAL: {}", body);
    }
}
