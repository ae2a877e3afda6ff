//! Restore of an exported stream into a new dataset (`zfs receive`).
//!
//! The sidecar, when present, is checked first: a digest mismatch aborts
//! before anything is received.

use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::consts::EXPORT_ZST_EXT;
use crate::dataset::DatasetId;
use crate::engine::StorageEngine;
use crate::export::{read_manifest, sidecar_path};
use crate::util::sha256_file;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub target: DatasetId,
    pub verified: bool,
    pub compressed: bool,
}

pub fn restore_file<E: StorageEngine + ?Sized>(
    engine: &E,
    file: &Path,
    target: &DatasetId,
) -> Result<RestoreReport> {
    if !file.is_file() {
        return Err(anyhow!("export file {} not found", file.display()));
    }
    if engine.exists(target.as_str())? {
        return Err(anyhow!("restore target {} already exists", target));
    }

    let side = sidecar_path(file);
    let verified = if side.exists() {
        let m = read_manifest(&side)?;
        let actual = sha256_file(file)?;
        if actual != m.sha256 {
            return Err(anyhow!(
                "checksum mismatch for {}: manifest {}, file {}",
                file.display(),
                m.sha256,
                actual
            ));
        }
        info!("restore: {} matches its manifest (sha256 {})", file.display(), actual);
        true
    } else {
        warn!("restore: no manifest for {}, receiving unverified", file.display());
        false
    };

    let compressed = file
        .file_name()
        .map(|n| n.to_string_lossy().ends_with(&format!(".{}", EXPORT_ZST_EXT)))
        .unwrap_or(false);

    let f = File::open(file).with_context(|| format!("open {}", file.display()))?;
    let mut reader: Box<dyn Read> = if compressed {
        Box::new(zstd::stream::read::Decoder::new(f).context("init zstd decoder")?)
    } else {
        Box::new(BufReader::new(f))
    };

    info!("restore: receiving {} into {}", file.display(), target);
    engine
        .receive_stream(&mut *reader, target)
        .with_context(|| format!("receive {} into {}", file.display(), target))?;

    Ok(RestoreReport {
        target: target.clone(),
        verified,
        compressed,
    })
}
