//! External export: full stream of one snapshot onto removable media, plus an
//! independent retention over the exported files.
//!
//! Порядок:
//! 1) destination remounted rw (WritableMount guard);
//! 2) `zfs send` of the snapshot into `<label>.zfs.partial` (`.zfs.zst` with
//!    zstd), hashed on the fly, plus a staged JSON sidecar; both are renamed
//!    into `<label>.zfs` / `<file>.json` only after fsync;
//! 3) retention over `<kind>_snapshot-*.zfs[.zst]`, newest first;
//! 4) destination remounted ro, on every path.
//!
//! Staged files from a failed stream are removed before the ro remount; an
//! earlier export of the same snapshot stays as it was. A
//! failed ro remount is CRITICAL: protected media stays writable.
//! The export stage never fails a run; see `run_export_stage`.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use log::error;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

use crate::consts::{
    DEFAULT_MOUNT_BIN, EXPORT_EXT, EXPORT_SIDECAR_EXT, EXPORT_ZSTD_LEVEL, EXPORT_ZST_EXT,
    SNAPSHOT_TAG,
};
use crate::dataset::split_snapshot;
use crate::engine::StorageEngine;
use crate::error::BackupError;
use crate::journal::Journal;
use crate::retention::{sweep, RetentionPolicy, SweepReport};
use crate::util::HashingWriter;

// ---------------------- mount control ----------------------

/// Read-only/read-write toggle of the export destination.
pub trait MountControl {
    fn set_read_write(&self, path: &Path) -> Result<()>;
    fn set_read_only(&self, path: &Path) -> Result<()>;
}

/// `mount -o remount,{rw,ro} <path>`.
#[derive(Debug, Clone)]
pub struct Remount {
    bin: PathBuf,
}

impl Remount {
    pub fn new<P: Into<PathBuf>>(bin: P) -> Self {
        Self { bin: bin.into() }
    }

    fn remount(&self, path: &Path, mode: &str) -> Result<()> {
        let opt = format!("remount,{}", mode);
        let out = Command::new(&self.bin)
            .arg("-o")
            .arg(&opt)
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn {}", self.bin.display()))?;
        if !out.status.success() {
            return Err(anyhow!(
                "mount -o {} {} exited with {}: {}",
                opt,
                path.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}

impl Default for Remount {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_BIN)
    }
}

impl MountControl for Remount {
    fn set_read_write(&self, path: &Path) -> Result<()> {
        self.remount(path, "rw")
    }

    fn set_read_only(&self, path: &Path) -> Result<()> {
        self.remount(path, "ro")
    }
}

/// Destination is a plain directory; nothing to toggle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemount;

impl MountControl for NoRemount {
    fn set_read_write(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn set_read_only(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// RAII-гард: rw в acquire(), ro в release() или в Drop.
/// `release` reports the ro failure to the caller; `Drop` can only log it.
pub struct WritableMount<'m, M: MountControl + ?Sized> {
    mount: &'m M,
    path: PathBuf,
    armed: bool,
}

impl<'m, M: MountControl + ?Sized> WritableMount<'m, M> {
    pub fn acquire(mount: &'m M, path: &Path) -> Result<Self> {
        mount
            .set_read_write(path)
            .with_context(|| format!("remount {} read-write", path.display()))?;
        Ok(Self {
            mount,
            path: path.to_path_buf(),
            armed: true,
        })
    }

    pub fn release(mut self) -> Result<()> {
        self.armed = false;
        self.mount
            .set_read_only(&self.path)
            .with_context(|| format!("remount {} read-only", self.path.display()))
    }
}

impl<'m, M: MountControl + ?Sized> Drop for WritableMount<'m, M> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.mount.set_read_only(&self.path) {
                error!(
                    "[CRITICAL] export media {} left writable: {:#}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

// ---------------------- export ----------------------

/// Sidecar written next to every exported file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub snapshot: String,
    pub file: String,
    pub compressed: bool,
    pub stream_bytes: u64,
    pub file_bytes: u64,
    pub sha256: String,
    pub created: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub path: PathBuf,
    pub sidecar: PathBuf,
    pub manifest: ExportManifest,
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub retention: RetentionPolicy,
    pub compress: bool,
}

/// Outcome of the export stage as seen by the run.
#[derive(Debug, Clone)]
pub enum ExportStatus {
    Exported {
        file: ExportedFile,
        retention: SweepReport,
    },
    Failed(String),
}

impl ExportStatus {
    pub fn is_exported(&self) -> bool {
        matches!(self, ExportStatus::Exported { .. })
    }
}

pub fn export_file_name(label: &str, compress: bool) -> String {
    let ext = if compress { EXPORT_ZST_EXT } else { EXPORT_EXT };
    format!("{}.{}", label, ext)
}

pub fn sidecar_path(file: &Path) -> PathBuf {
    let mut s = file.as_os_str().to_os_string();
    s.push(".");
    s.push(EXPORT_SIDECAR_EXT);
    PathBuf::from(s)
}

/// `<kind>_snapshot-` part of a label; exports are pruned per kind.
fn retention_prefix(label: &str) -> &str {
    let marker = format!("_{}-", SNAPSHOT_TAG);
    match label.find(&marker) {
        Some(i) => &label[..i + marker.len()],
        None => label,
    }
}

fn is_export_name(name: &str, prefix: &str) -> bool {
    name.starts_with(prefix)
        && (name.ends_with(&format!(".{}", EXPORT_EXT))
            || name.ends_with(&format!(".{}", EXPORT_ZST_EXT)))
}

/// Exported files under `dir` matching `prefix`, newest first
/// (mtime, then name, both descending).
pub fn list_exports(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut found: Vec<(SystemTime, String, PathBuf)> = Vec::new();
    for ent in fs::read_dir(dir).with_context(|| format!("read_dir {}", dir.display()))? {
        let ent = ent?;
        let name = ent.file_name().to_string_lossy().into_owned();
        if !is_export_name(&name, prefix) || !ent.file_type()?.is_file() {
            continue;
        }
        let mtime = ent
            .metadata()?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push((mtime, name, ent.path()));
    }
    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    Ok(found.into_iter().map(|(_, _, p)| p).collect())
}

fn remove_export(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    let side = sidecar_path(path);
    match fs::remove_file(&side) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow!(e).context(format!("remove {}", side.display()))),
    }
}

pub struct Exporter<'a, E: StorageEngine + ?Sized, M: MountControl + ?Sized> {
    engine: &'a E,
    mount: &'a M,
    opts: ExportOptions,
}

impl<'a, E: StorageEngine + ?Sized, M: MountControl + ?Sized> Exporter<'a, E, M> {
    pub fn new(engine: &'a E, mount: &'a M, opts: ExportOptions) -> Self {
        Self {
            engine,
            mount,
            opts,
        }
    }

    /// Export `snapshot` into `dest` and prune old exports of the same kind.
    /// The destination ends read-only on every path; if that fails the
    /// journal gets a CRITICAL entry.
    pub fn export(
        &self,
        snapshot: &str,
        dest: &Path,
        journal: &mut Journal,
    ) -> Result<(ExportedFile, SweepReport)> {
        if !dest.is_dir() {
            return Err(BackupError::Precondition(format!(
                "export destination {} does not exist",
                dest.display()
            ))
            .into());
        }
        let (_, label) = split_snapshot(snapshot)
            .ok_or_else(|| anyhow!("'{}' is not a snapshot name", snapshot))?;

        let guard = WritableMount::acquire(self.mount, dest)?;
        journal.info(format!("export: {} mounted read-write", dest.display()));

        let result = self.write_and_prune(snapshot, label, dest, journal);

        match guard.release() {
            Ok(()) => journal.info(format!("export: {} mounted read-only", dest.display())),
            Err(e) => journal.critical(format!(
                "export media {} could not be restored to read-only: {:#}",
                dest.display(),
                e
            )),
        }
        result
    }

    fn write_and_prune(
        &self,
        snapshot: &str,
        label: &str,
        dest: &Path,
        journal: &mut Journal,
    ) -> Result<(ExportedFile, SweepReport)> {
        let path = dest.join(export_file_name(label, self.opts.compress));
        journal.info(format!("export: sending {} to {}", snapshot, path.display()));

        let file = match self.write_stream(snapshot, &path) {
            Ok(f) => f,
            Err(e) => {
                // убираем только staged-файлы; прежний экспорт под тем же именем не трогаем
                for staged in [partial_path(&path), staged_manifest_path(&sidecar_path(&path))] {
                    if !staged.exists() {
                        continue;
                    }
                    match fs::remove_file(&staged) {
                        Ok(()) => journal.info(format!("export: partial {} removed", staged.display())),
                        Err(re) => journal.warn(format!(
                            "export: partial {} not removed: {:#}",
                            staged.display(),
                            re
                        )),
                    }
                }
                return Err(e);
            }
        };
        journal.info(format!(
            "export: {} written ({} B, sha256 {})",
            file.path.display(),
            file.manifest.file_bytes,
            file.manifest.sha256
        ));

        let prefix = retention_prefix(label);
        let report = match list_exports(dest, prefix) {
            Ok(files) => {
                let names: Vec<String> = files
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                sweep("exports", &names, self.opts.retention, journal, |name| {
                    remove_export(Path::new(name))
                })
            }
            Err(e) => {
                journal.warn(format!("export: cannot list {}: {:#}", dest.display(), e));
                SweepReport::default()
            }
        };
        Ok((file, report))
    }

    /// Stream into `<file>.partial` and stage the sidecar; both are renamed
    /// over the final names only once everything is written and synced.
    fn write_stream(&self, snapshot: &str, path: &Path) -> Result<ExportedFile> {
        let partial = partial_path(path);
        let f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&partial)
            .with_context(|| format!("open {}", partial.display()))?;
        let mut sink = HashingWriter::new(BufWriter::new(f));

        let stream_bytes = if self.opts.compress {
            let mut enc = zstd::stream::write::Encoder::new(sink, EXPORT_ZSTD_LEVEL)
                .context("init zstd encoder")?;
            let n = self.engine.send_stream(snapshot, &mut enc)?;
            sink = enc.finish().context("finish zstd stream")?;
            n
        } else {
            self.engine.send_stream(snapshot, &mut sink)?
        };

        sink.flush()?;
        let (buf, file_bytes, sha256) = sink.finish();
        let f = buf
            .into_inner()
            .map_err(|e| anyhow!(e.into_error()))
            .with_context(|| format!("flush {}", partial.display()))?;
        f.sync_all()
            .with_context(|| format!("fsync {}", partial.display()))?;
        drop(f);

        let manifest = ExportManifest {
            snapshot: snapshot.to_string(),
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            compressed: self.opts.compress,
            stream_bytes,
            file_bytes,
            sha256,
            created: Local::now().to_rfc3339(),
        };
        let sidecar = sidecar_path(path);
        let staged = stage_manifest(&sidecar, &manifest)?;

        fs::rename(&partial, path)
            .with_context(|| format!("rename {} -> {}", partial.display(), path.display()))?;
        fs::rename(&staged, &sidecar)
            .with_context(|| format!("rename {} -> {}", staged.display(), sidecar.display()))?;

        Ok(ExportedFile {
            path: path.to_path_buf(),
            sidecar,
            manifest,
        })
    }
}

fn partial_path(file: &Path) -> PathBuf {
    let mut s = file.as_os_str().to_os_string();
    s.push(".partial");
    PathBuf::from(s)
}

fn staged_manifest_path(sidecar: &Path) -> PathBuf {
    let mut s = sidecar.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Write the sidecar under its staged name; the caller renames it into place.
fn stage_manifest(sidecar: &Path, m: &ExportManifest) -> Result<PathBuf> {
    let tmp = staged_manifest_path(sidecar);
    let data = serde_json::to_vec_pretty(m).context("serialize export manifest")?;
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open {}", tmp.display()))?;
    f.write_all(&data)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    Ok(tmp)
}

pub fn read_manifest(path: &Path) -> Result<ExportManifest> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

/// Export as an additive stage: failures are journaled, never returned.
pub fn run_export_stage<E, M>(
    exporter: &Exporter<'_, E, M>,
    snapshot: &str,
    dest: &Path,
    journal: &mut Journal,
) -> ExportStatus
where
    E: StorageEngine + ?Sized,
    M: MountControl + ?Sized,
{
    match exporter.export(snapshot, dest, journal) {
        Ok((file, retention)) => ExportStatus::Exported { file, retention },
        Err(e) => {
            let msg = format!("{:#}", e);
            journal.warn(format!(
                "export of {} failed, local backup unaffected: {}",
                snapshot, msg
            ));
            ExportStatus::Failed(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_prefixes() {
        assert_eq!(
            export_file_name("daily_snapshot-2026-10-19_03-00-00", true),
            "daily_snapshot-2026-10-19_03-00-00.zfs.zst"
        );
        assert_eq!(
            retention_prefix("weekly_snapshot-2026-10-19_03-00"),
            "weekly_snapshot-"
        );
        assert!(is_export_name("daily_snapshot-x.zfs", "daily_snapshot-"));
        assert!(is_export_name("daily_snapshot-x.zfs.zst", "daily_snapshot-"));
        assert!(!is_export_name("daily_snapshot-x.zfs.json", "daily_snapshot-"));
        assert!(!is_export_name("weekly_snapshot-x.zfs", "daily_snapshot-"));
        assert_eq!(
            sidecar_path(Path::new("/m/a.zfs")),
            PathBuf::from("/m/a.zfs.json")
        );
    }
}
