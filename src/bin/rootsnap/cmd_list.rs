use anyhow::Result;

use rootsnap::dataset::Kind;
use rootsnap::root::RootLocator;
use rootsnap::{Lifecycle, LifecycleOptions, RootsnapConfig, ZfsCli};

/// Клоны и снапшоты под retention, новые первыми.
pub fn exec(cfg: &RootsnapConfig, kind: Option<Kind>) -> Result<()> {
    let engine = ZfsCli::new(&cfg.zfs_bin);
    let root = RootLocator::new(&cfg.mounts_table, &cfg.mount_point).locate_root(&engine)?;
    let lc = Lifecycle::new(&engine, LifecycleOptions::from(cfg));

    let kinds = match kind {
        Some(k) => vec![k],
        None => vec![Kind::Daily, Kind::Weekly],
    };

    println!("root: {} (keep {} per kind)", root, cfg.keep_count);
    for k in kinds {
        let clones = lc.list_clones(&root.boot_container(), k)?;
        let snaps = lc.list_snapshots(&root, k)?;
        println!("{} clones: {}", k, clones.len());
        for (i, c) in clones.iter().enumerate() {
            let mark = if i < cfg.keep_count { " " } else { "x" };
            println!("  {} {}", mark, c);
        }
        println!("{} snapshots: {}", k, snaps.len());
        for (i, s) in snaps.iter().enumerate() {
            let mark = if i < cfg.keep_count { " " } else { "x" };
            println!("  {} {}", mark, s);
        }
    }
    Ok(())
}
