//! Run lock: at most one backup run per host at a time.
//!
//! Advisory exclusive lock (fs2) on a dedicated file, default
//! `/run/rootsnap.lock`. Acquisition never blocks: a concurrent run would race
//! on the same retention candidates, so the second invocation fails instead.
//! Lock is released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::BackupError;

pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // ошибки unlock на drop игнорируем: fd всё равно закрывается
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

/// Take the run lock or fail if another run holds it.
pub fn try_acquire_run_lock(path: &Path) -> Result<RunLock> {
    let mut file = open_lock_file(path)?;
    file.try_lock_exclusive().map_err(|e| {
        BackupError::Precondition(format!(
            "another run holds {} ({})",
            path.display(),
            e
        ))
    })?;
    // pid для диагностики; сам замок держит fd
    if let Err(e) = write_pid(&mut file) {
        debug!("run lock {}: pid not recorded: {}", path.display(), e);
    }
    Ok(RunLock {
        file,
        path: path.to_path_buf(),
    })
}
