use anyhow::Result;
use env_logger::{Builder, Env};
use log::error;

use rootsnap::RootsnapConfig;

mod cli;
mod cmd_config;
mod cmd_export;
mod cmd_list;
mod cmd_restore;
mod cmd_run;

fn init_logger() {
    // Уровень берём из RUST_LOG, иначе info.
    // Пример: RUST_LOG=debug rootsnap run --kind weekly
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    init_logger();

    if let Err(e) = run() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    let cfg = RootsnapConfig::from_env()?;

    match cli.cmd {
        None => cmd_run::exec(&cfg, None, false),

        Some(cli::Cmd::Run { kind, no_export }) => cmd_run::exec(&cfg, kind, no_export),

        Some(cli::Cmd::List { kind }) => cmd_list::exec(&cfg, kind),

        Some(cli::Cmd::Export { snapshot, dest }) => cmd_export::exec(&cfg, snapshot, dest),

        Some(cli::Cmd::Restore { file, target }) => cmd_restore::exec(&cfg, file, target),

        Some(cli::Cmd::Config) => cmd_config::exec(&cfg),
    }
}
