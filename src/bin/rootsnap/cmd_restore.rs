use anyhow::Result;
use std::path::PathBuf;

use rootsnap::restore::restore_file;
use rootsnap::{DatasetId, RootsnapConfig, ZfsCli};

pub fn exec(cfg: &RootsnapConfig, file: PathBuf, target: String) -> Result<()> {
    let target = DatasetId::parse(&target)?;
    let engine = ZfsCli::new(&cfg.zfs_bin);
    let r = restore_file(&engine, &file, &target)?;
    println!(
        "restore: {} -> {} (verified={}, zstd={})",
        file.display(),
        r.target,
        r.verified,
        r.compressed
    );
    Ok(())
}
