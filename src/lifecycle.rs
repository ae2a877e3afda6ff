//! Snapshot/clone lifecycle: the ordered core of a backup run.
//!
//! Stages (each gated on the previous one):
//!   Start -> SnapshotCreated -> CloneCreated -> MetadataCopied -> Verified
//!         -> RetentionSwept -> Done
//! with `Failed` reachable from any stage.
//!
//! Fatal: snapshot creation, clone creation, verification (and the boot
//! commandline when `commandline_required` is set). Everything else degrades
//! to a journal warning so that one stuck dataset never blocks later runs.
//!
//! Retention always sweeps clones before snapshots. A snapshot that is still
//! the origin of a surviving dataset is skipped, not attempted.

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use std::collections::HashMap;

use crate::config::{CloneFailurePolicy, RootsnapConfig};
use crate::consts::{BOOT_PROPERTIES, CLONE_PROPERTIES, PROP_COMMANDLINE, PROP_ORIGIN, PROP_USED};
use crate::dataset::{split_snapshot, DatasetId, Kind, RunNames};
use crate::engine::{ListKind, StorageEngine};
use crate::error::{BackupError, Stage};
use crate::journal::Journal;
use crate::props::{propagate, PropertyOutcome, PropertyStatus};
use crate::retention::{sweep_guarded, RetentionPolicy, SweepReport};

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    pub retention: RetentionPolicy,
    pub clone_failure: CloneFailurePolicy,
    pub commandline_required: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::from(&RootsnapConfig::default())
    }
}

impl From<&RootsnapConfig> for LifecycleOptions {
    fn from(cfg: &RootsnapConfig) -> Self {
        Self {
            retention: RetentionPolicy::new(cfg.keep_count),
            clone_failure: cfg.clone_failure,
            commandline_required: cfg.commandline_required,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub kind: Kind,
    pub root: DatasetId,
    pub names: RunNames,
    pub stage: Stage,
    pub properties: Vec<PropertyOutcome>,
    pub clone_used: Option<String>,
    pub clone_sweep: SweepReport,
    pub snapshot_sweep: SweepReport,
}

/// Result of one retention pass (clones first, then snapshots).
#[derive(Debug, Clone, Default)]
pub struct RetentionReport {
    pub clones: SweepReport,
    pub snapshots: SweepReport,
}

pub struct Lifecycle<'a, E: StorageEngine + ?Sized> {
    engine: &'a E,
    opts: LifecycleOptions,
}

impl<'a, E: StorageEngine + ?Sized> Lifecycle<'a, E> {
    pub fn new(engine: &'a E, opts: LifecycleOptions) -> Self {
        Self { engine, opts }
    }

    pub fn run(&self, root: &DatasetId, kind: Kind, journal: &mut Journal) -> Result<RunReport> {
        self.run_at(root, kind, Local::now().naive_local(), journal)
    }

    /// Full run with an explicit timestamp for the generated names.
    pub fn run_at(
        &self,
        root: &DatasetId,
        kind: Kind,
        at: NaiveDateTime,
        journal: &mut Journal,
    ) -> Result<RunReport> {
        let names = RunNames::new(root, kind, at);
        let mut report = RunReport {
            kind,
            root: root.clone(),
            names: names.clone(),
            stage: Stage::Start,
            properties: Vec::new(),
            clone_used: None,
            clone_sweep: SweepReport::default(),
            snapshot_sweep: SweepReport::default(),
        };
        journal.info(format!("{} backup of {} started", kind, root));

        // 1) snapshot
        if let Err(e) = self.engine.create_snapshot(root, &names.label) {
            return Err(fail(journal, &mut report, "create snapshot", e));
        }
        report.stage = Stage::SnapshotCreated;
        journal.info(format!("snapshot {} created", names.snapshot));

        // 2) clone
        if let Err(e) = self.create_clone(&names, journal) {
            let err = fail(journal, &mut report, "create clone", e);
            self.handle_clone_failure(&names.snapshot, journal);
            return Err(err);
        }
        report.stage = Stage::CloneCreated;
        journal.info(format!(
            "clone {} created from {} (canmount=noauto, mountpoint=/)",
            names.clone, names.snapshot
        ));

        // 3) metadata
        report.properties = self.copy_metadata(root, &names.clone, journal);
        if self.opts.commandline_required {
            if let Some(o) = report
                .properties
                .iter()
                .find(|o| o.key == PROP_COMMANDLINE && o.is_failure())
            {
                let e = anyhow::anyhow!("{}", o);
                return Err(fail(journal, &mut report, "set boot commandline", e));
            }
        }
        report.stage = Stage::MetadataCopied;

        // 4) verify
        match self.engine.exists(names.clone.as_str()) {
            Ok(true) => {}
            Ok(false) => {
                let e = anyhow::anyhow!("clone {} is not listed by the engine", names.clone);
                return Err(fail(journal, &mut report, "verify clone", e));
            }
            Err(e) => return Err(fail(journal, &mut report, "verify clone", e)),
        }
        match self.engine.get_property(names.clone.as_str(), PROP_USED) {
            Ok(v) => {
                journal.info(format!(
                    "clone {} verified, used={}",
                    names.clone,
                    v.as_deref().unwrap_or("?")
                ));
                report.clone_used = v;
            }
            Err(e) => journal.warn(format!("clone {} verified, size unavailable: {:#}", names.clone, e)),
        }
        report.stage = Stage::Verified;

        // 5) retention
        let r = self.sweep(root, kind, journal);
        report.clone_sweep = r.clones;
        report.snapshot_sweep = r.snapshots;
        report.stage = Stage::RetentionSwept;
        journal.info(format!(
            "retention: {} clone(s) and {} snapshot(s) removed, {} left behind",
            report.clone_sweep.removed.len(),
            report.snapshot_sweep.removed.len(),
            report.clone_sweep.failed.len()
                + report.clone_sweep.skipped.len()
                + report.snapshot_sweep.failed.len()
                + report.snapshot_sweep.skipped.len()
        ));

        report.stage = Stage::Done;
        journal.info(format!("{} backup of {} done", kind, root));
        Ok(report)
    }

    fn create_clone(&self, names: &RunNames, journal: &mut Journal) -> Result<()> {
        // коллизия имени (часы, остаток прошлого прогона): перезаписываем
        if self.engine.exists(names.clone.as_str())? {
            journal.warn(format!("{} already exists, destroying it first", names.clone));
            self.engine.destroy(names.clone.as_str())?;
        }
        self.engine
            .create_clone(&names.snapshot, &names.clone, CLONE_PROPERTIES)
    }

    fn handle_clone_failure(&self, snapshot: &str, journal: &mut Journal) {
        match self.opts.clone_failure {
            CloneFailurePolicy::Retain => {
                journal.warn(format!("snapshot {} retained after clone failure", snapshot));
            }
            CloneFailurePolicy::Rollback => match self.engine.destroy(snapshot) {
                Ok(()) => journal.info(format!("snapshot {} rolled back", snapshot)),
                Err(e) => journal.warn(format!("rollback of {} failed: {:#}", snapshot, e)),
            },
        }
    }

    fn copy_metadata(
        &self,
        root: &DatasetId,
        clone: &DatasetId,
        journal: &mut Journal,
    ) -> Vec<PropertyOutcome> {
        let outcomes = propagate(self.engine, root.as_str(), clone.as_str(), BOOT_PROPERTIES);
        for o in &outcomes {
            match &o.status {
                PropertyStatus::Copied(_) | PropertyStatus::SkippedAbsent => journal.info(o.to_string()),
                PropertyStatus::ReadFailed(_) | PropertyStatus::WriteFailed(_) => {
                    if o.key == PROP_COMMANDLINE {
                        journal.warn(format!("boot commandline not propagated: {}", o));
                    } else {
                        journal.warn(o.to_string());
                    }
                }
            }
        }
        outcomes
    }

    /// Retention pass for `kind`: clones under `<pool>/ROOT` first, then
    /// snapshots of `root`. Never fails; problems become warnings.
    pub fn sweep(&self, root: &DatasetId, kind: Kind, journal: &mut Journal) -> RetentionReport {
        let container = root.boot_container();
        let policy = self.opts.retention;

        let clones = match self.list_clones(&container, kind) {
            Ok(v) => v,
            Err(e) => {
                journal.warn(format!("retention clones: cannot list {}: {:#}", container, e));
                Vec::new()
            }
        };
        let clone_report = sweep_guarded(
            "clones",
            &clones,
            policy,
            journal,
            |name| (name == root.as_str()).then(|| "currently mounted root".to_string()),
            |name| self.engine.destroy(name),
        );

        // Снапшоты, на которые ещё ссылаются выжившие клоны, не трогаем.
        let origins = match self.origins_under(&container) {
            Ok(m) => m,
            Err(e) => {
                journal.warn(format!(
                    "retention snapshots: dependency scan of {} failed, sweep skipped: {:#}",
                    container, e
                ));
                return RetentionReport {
                    clones: clone_report,
                    snapshots: SweepReport::default(),
                };
            }
        };

        let snapshots = match self.list_snapshots(root, kind) {
            Ok(v) => v,
            Err(e) => {
                journal.warn(format!("retention snapshots: cannot list {}: {:#}", root, e));
                Vec::new()
            }
        };
        let snapshot_report = sweep_guarded(
            "snapshots",
            &snapshots,
            policy,
            journal,
            |name| {
                origins
                    .get(name)
                    .map(|clone| format!("origin of {}", clone))
            },
            |name| self.engine.destroy(name),
        );

        RetentionReport {
            clones: clone_report,
            snapshots: snapshot_report,
        }
    }

    /// Clones of `kind` directly under `container`, newest first.
    pub fn list_clones(&self, container: &DatasetId, kind: Kind) -> Result<Vec<String>> {
        let prefix = kind.clone_prefix();
        Ok(self
            .engine
            .list(ListKind::Filesystems, container)?
            .into_iter()
            .filter(|n| {
                n.rsplit('/')
                    .next()
                    .map(|b| b.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Snapshots of `kind` taken of `root`, newest first.
    pub fn list_snapshots(&self, root: &DatasetId, kind: Kind) -> Result<Vec<String>> {
        let prefix = kind.snapshot_prefix();
        Ok(self
            .engine
            .list(ListKind::Snapshots, root)?
            .into_iter()
            .filter(|n| {
                split_snapshot(n)
                    .map(|(_, label)| label.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect())
    }

    /// origin snapshot -> one dataset under `container` that depends on it.
    fn origins_under(&self, container: &DatasetId) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        for ds in self.engine.list(ListKind::Filesystems, container)? {
            if let Some(origin) = self.engine.get_property(&ds, PROP_ORIGIN)? {
                map.entry(origin).or_insert(ds);
            }
        }
        Ok(map)
    }
}

fn fail(
    journal: &mut Journal,
    report: &mut RunReport,
    action: &'static str,
    err: anyhow::Error,
) -> anyhow::Error {
    let e = BackupError::stage(report.stage, action, &err);
    journal.error(e.to_string());
    report.stage = Stage::Failed;
    e.into()
}
