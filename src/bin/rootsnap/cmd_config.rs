use anyhow::Result;

use rootsnap::RootsnapConfig;

pub fn exec(cfg: &RootsnapConfig) -> Result<()> {
    println!("{}", cfg);
    if let Err(e) = cfg.validate() {
        println!("warning: {:#}", e);
    }
    Ok(())
}
