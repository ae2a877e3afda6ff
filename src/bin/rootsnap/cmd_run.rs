use anyhow::Result;

use rootsnap::dataset::Kind;
use rootsnap::export::{ExportStatus, MountControl, NoRemount, Remount};
use rootsnap::journal::Journal;
use rootsnap::lock::try_acquire_run_lock;
use rootsnap::notify;
use rootsnap::session::{flush, run_backup, subject};
use rootsnap::{RootsnapConfig, ZfsCli};

/// Полный прогон: lock -> lifecycle -> export -> flush журнала.
/// Exit code is non-zero only for fatal errors.
pub fn exec(cfg: &RootsnapConfig, kind: Option<Kind>, no_export: bool) -> Result<()> {
    let kind = kind.unwrap_or(cfg.kind);
    let mut journal = Journal::new();

    let notifier = notify::for_recipient(cfg.mail_to.as_deref());

    let lock = match try_acquire_run_lock(&cfg.lock_file) {
        Ok(l) => l,
        Err(e) => {
            journal.error(format!("{:#}", e));
            flush(cfg, &journal, notifier.as_ref(), &subject(kind, false, &journal));
            return Err(e);
        }
    };

    let engine = ZfsCli::new(&cfg.zfs_bin);
    let mount: Box<dyn MountControl> = if cfg.export_remount {
        Box::new(Remount::default())
    } else {
        Box::new(NoRemount)
    };

    let result = run_backup(cfg, &engine, mount.as_ref(), kind, !no_export, &mut journal);
    drop(lock);

    let subj = subject(kind, result.is_ok(), &journal);
    flush(cfg, &journal, notifier.as_ref(), &subj);

    let report = result?;
    println!("snapshot: {}", report.run.names.snapshot);
    println!("clone:    {}", report.run.names.clone);
    println!(
        "removed:  {} clone(s), {} snapshot(s)",
        report.run.clone_sweep.removed.len(),
        report.run.snapshot_sweep.removed.len()
    );
    match &report.export {
        Some(ExportStatus::Exported { file, .. }) => {
            println!("export:   {}", file.path.display())
        }
        Some(ExportStatus::Failed(msg)) => println!("export:   FAILED ({})", msg),
        None => {}
    }
    println!("status:   {}", subj);
    Ok(())
}
