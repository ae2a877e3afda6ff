// tests/config_env.rs
//
// Запуск:
//   cargo test --test config_env -- --nocapture
//
// Всё, что трогает env, живёт в одном тесте: переменные процесса общие.

use std::path::PathBuf;

use anyhow::Result;

use rootsnap::{CloneFailurePolicy, Kind, LifecycleOptions, RootsnapConfig};

const VARS: &[&str] = &[
    "RSNAP_KIND",
    "RSNAP_KEEP",
    "RSNAP_EXPORT_DIR",
    "RSNAP_EXPORT_KEEP",
    "RSNAP_EXPORT_COMPRESS",
    "RSNAP_EXPORT_REMOUNT",
    "RSNAP_MAIL_TO",
    "RSNAP_CLONE_FAILURE",
    "RSNAP_COMMANDLINE_REQUIRED",
];

fn clear() {
    for v in VARS {
        std::env::remove_var(v);
    }
}

#[test]
fn env_overrides_and_rejects_garbage() -> Result<()> {
    clear();
    let d = RootsnapConfig::from_env()?;
    assert_eq!(d.kind, Kind::Daily);
    assert_eq!(d.keep_count, 7);
    assert!(d.export_dir.is_none());
    assert!(d.mail_to.is_none());
    assert!(d.export_remount);
    assert_eq!(d.clone_failure, CloneFailurePolicy::Retain);

    std::env::set_var("RSNAP_KIND", "weekly");
    std::env::set_var("RSNAP_KEEP", "3");
    std::env::set_var("RSNAP_EXPORT_DIR", "/mnt/backup");
    std::env::set_var("RSNAP_EXPORT_KEEP", "5");
    std::env::set_var("RSNAP_EXPORT_COMPRESS", "1");
    std::env::set_var("RSNAP_EXPORT_REMOUNT", "0");
    std::env::set_var("RSNAP_MAIL_TO", "  ");
    std::env::set_var("RSNAP_CLONE_FAILURE", "rollback");
    std::env::set_var("RSNAP_COMMANDLINE_REQUIRED", "yes");
    let c = RootsnapConfig::from_env()?;
    assert_eq!(c.kind, Kind::Weekly);
    assert_eq!(c.keep_count, 3);
    assert_eq!(c.export_dir, Some(PathBuf::from("/mnt/backup")));
    assert_eq!(c.export_keep_count, 5);
    assert!(c.export_compress);
    assert!(!c.export_remount);
    assert!(c.mail_to.is_none());
    assert_eq!(c.clone_failure, CloneFailurePolicy::Rollback);
    assert!(c.commandline_required);
    c.validate()?;

    let o = LifecycleOptions::from(&c);
    assert_eq!(o.retention.keep_count, 3);
    assert_eq!(o.clone_failure, CloneFailurePolicy::Rollback);
    assert!(o.commandline_required);

    std::env::set_var("RSNAP_KEEP", "three");
    assert!(RootsnapConfig::from_env().is_err());
    std::env::set_var("RSNAP_KEEP", "3");
    std::env::set_var("RSNAP_KIND", "hourly");
    assert!(RootsnapConfig::from_env().is_err());
    std::env::set_var("RSNAP_KIND", "daily");
    std::env::set_var("RSNAP_CLONE_FAILURE", "panic");
    assert!(RootsnapConfig::from_env().is_err());

    clear();
    Ok(())
}

#[test]
fn validate_rejects_zero_keep_counts() {
    let base = RootsnapConfig::default();
    assert!(base.validate().is_ok());
    assert!(base.clone().with_keep_count(0).validate().is_err());

    // export keep 0 matters only when export is configured
    let no_export = base.clone().with_export_keep_count(0);
    assert!(no_export.validate().is_ok());
    assert!(no_export
        .with_export_dir(Some("/mnt/backup"))
        .validate()
        .is_err());
}

#[test]
fn display_lists_every_setting() {
    let s = RootsnapConfig::default()
        .with_clone_failure(CloneFailurePolicy::Rollback)
        .to_string();
    for key in [
        "kind",
        "keep_count",
        "export_dir",
        "mail_to",
        "lock_file",
        "clone_failure        = rollback",
        "commandline_required",
    ] {
        assert!(s.contains(key), "missing {} in\n{}", key, s);
    }
}
