use anyhow::Result;
use std::path::PathBuf;

use rootsnap::export::{MountControl, NoRemount, Remount};
use rootsnap::journal::Journal;
use rootsnap::notify;
use rootsnap::session::export_once;
use rootsnap::{RootsnapConfig, ZfsCli};

/// Разовый экспорт снапшота под тем же run-lock, что и `run`. Unlike the
/// export stage of `run`, a failure here is the command's own result.
pub fn exec(cfg: &RootsnapConfig, snapshot: String, dest: Option<PathBuf>) -> Result<()> {
    let engine = ZfsCli::new(&cfg.zfs_bin);
    let mount: Box<dyn MountControl> = if cfg.export_remount {
        Box::new(Remount::default())
    } else {
        Box::new(NoRemount)
    };
    let notifier = notify::for_recipient(cfg.mail_to.as_deref());

    let mut journal = Journal::new();
    let (file, retention) = export_once(
        cfg,
        &engine,
        mount.as_ref(),
        notifier.as_ref(),
        &snapshot,
        dest.as_deref(),
        &mut journal,
    )?;
    println!(
        "export: {} ({} B, sha256 {})",
        file.path.display(),
        file.manifest.file_bytes,
        file.manifest.sha256
    );
    println!(
        "export retention: kept {}, removed {}, failed {}",
        retention.kept.len(),
        retention.removed.len(),
        retention.failed.len()
    );
    Ok(())
}
