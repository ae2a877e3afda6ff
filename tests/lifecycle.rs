// tests/lifecycle.rs
//
// Запуск:
//   cargo test --test lifecycle -- --nocapture
//
// Snapshot -> clone -> metadata -> verify -> retention on MemoryEngine.

use anyhow::Result;
use chrono::{Duration, NaiveDate, NaiveDateTime};

use rootsnap::consts::{
    BOOT_PROPERTIES, PROP_CANMOUNT, PROP_COMMANDLINE, PROP_MOUNTPOINT, PROP_ORIGIN,
};
use rootsnap::props::{propagate, PropertyStatus};
use rootsnap::retention::RetentionPolicy;
use rootsnap::{
    BackupError, CloneFailurePolicy, DatasetId, Journal, Kind, Level, Lifecycle, LifecycleOptions,
    MemoryEngine, RunNames, Stage, StorageEngine,
};

const ROOT: &str = "rpool/ROOT/pve-1";

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 1)
        .and_then(|d| d.and_hms_opt(3, 0, 0))
        .expect("valid date")
}

fn opts(keep: usize) -> LifecycleOptions {
    LifecycleOptions {
        retention: RetentionPolicy::new(keep),
        clone_failure: CloneFailurePolicy::Retain,
        commandline_required: false,
    }
}

fn engine_with_root() -> (MemoryEngine, DatasetId) {
    let e = MemoryEngine::new();
    e.add_dataset(ROOT, &[(PROP_COMMANDLINE, "quiet"), ("acltype", "posixacl")]);
    e.set_content(ROOT, b"root filesystem bytes");
    (e, DatasetId::parse(ROOT).unwrap())
}

/// Prior runs: snapshot + clone pairs, oldest first, one day apart.
fn seed_pairs(e: &MemoryEngine, root: &DatasetId, kind: Kind, n: usize) -> Vec<RunNames> {
    (0..n)
        .map(|i| {
            let names = RunNames::new(root, kind, t0() + Duration::days(i as i64));
            e.create_snapshot(root, &names.label).unwrap();
            e.create_clone(&names.snapshot, &names.clone, &[]).unwrap();
            names
        })
        .collect()
}

#[test]
fn happy_path_creates_bootable_clone() -> Result<()> {
    let (e, root) = engine_with_root();
    let mut j = Journal::new();
    let at = t0();

    let r = Lifecycle::new(&e, opts(3)).run_at(&root, Kind::Daily, at, &mut j)?;

    assert_eq!(r.stage, Stage::Done);
    assert_eq!(
        r.names.snapshot,
        "rpool/ROOT/pve-1@daily_snapshot-2026-10-01_03-00-00"
    );
    assert_eq!(r.names.clone.as_str(), "rpool/ROOT/daily_clone-2026-10-01_03-00-00");
    assert!(e.has(&r.names.snapshot));
    assert!(e.has(r.names.clone.as_str()));

    let clone = r.names.clone.as_str();
    assert_eq!(e.property(clone, PROP_CANMOUNT).as_deref(), Some("noauto"));
    assert_eq!(e.property(clone, PROP_MOUNTPOINT).as_deref(), Some("/"));
    assert_eq!(e.property(clone, PROP_COMMANDLINE).as_deref(), Some("quiet"));
    assert_eq!(e.property(clone, "acltype").as_deref(), Some("posixacl"));
    assert_eq!(e.property(clone, PROP_ORIGIN).as_deref(), Some(r.names.snapshot.as_str()));
    assert!(r.clone_used.is_some());
    assert_eq!(j.count(Level::Warning), 0);
    assert_eq!(j.count(Level::Error), 0);
    Ok(())
}

#[test]
fn absent_property_is_skipped_not_defaulted() -> Result<()> {
    let (e, root) = engine_with_root();
    let mut j = Journal::new();
    let r = Lifecycle::new(&e, opts(3)).run_at(&root, Kind::Daily, t0(), &mut j)?;

    let keysource = r
        .properties
        .iter()
        .find(|o| o.key == "org.zfsbootmenu:keysource")
        .expect("keysource outcome present");
    assert_eq!(keysource.status, PropertyStatus::SkippedAbsent);
    assert_eq!(e.property(r.names.clone.as_str(), "org.zfsbootmenu:keysource"), None);
    assert_eq!(j.count(Level::Warning), 0);
    Ok(())
}

#[test]
fn retention_keeps_two_newest_of_five() -> Result<()> {
    let (e, root) = engine_with_root();
    let seeded = seed_pairs(&e, &root, Kind::Daily, 5);
    let mut j = Journal::new();

    let r = Lifecycle::new(&e, opts(2)).sweep(&root, Kind::Daily, &mut j);

    assert_eq!(r.clones.removed.len(), 3);
    assert_eq!(r.snapshots.removed.len(), 3);
    for old in &seeded[..3] {
        assert!(!e.has(old.clone.as_str()), "{} must be destroyed", old.clone);
        assert!(!e.has(&old.snapshot), "{} must be destroyed", old.snapshot);
    }
    for new in &seeded[3..] {
        assert!(e.has(new.clone.as_str()));
        assert!(e.has(&new.snapshot));
    }
    // newest first
    assert_eq!(r.clones.kept[0], seeded[4].clone.as_str());
    Ok(())
}

#[test]
fn clones_are_destroyed_before_their_snapshots() -> Result<()> {
    let (e, root) = engine_with_root();
    seed_pairs(&e, &root, Kind::Daily, 4);
    e.clear_ops();
    let mut j = Journal::new();

    Lifecycle::new(&e, opts(1)).run_at(&root, Kind::Daily, t0() + Duration::days(10), &mut j)?;

    let destroys: Vec<String> = e
        .ops()
        .into_iter()
        .filter(|op| op.starts_with("destroy "))
        .collect();
    assert_eq!(destroys.len(), 8);
    let first_snapshot = destroys
        .iter()
        .position(|op| op.contains('@'))
        .expect("snapshots destroyed");
    assert!(
        destroys[..first_snapshot].iter().all(|op| !op.contains('@')),
        "all clone destroys must come first: {:?}",
        destroys
    );
    assert!(destroys[first_snapshot..].iter().all(|op| op.contains('@')));
    assert_eq!(j.count(Level::Warning), 0);
    Ok(())
}

#[test]
fn failed_clone_destroy_does_not_block_others_and_protects_origin() -> Result<()> {
    let (e, root) = engine_with_root();
    let seeded = seed_pairs(&e, &root, Kind::Daily, 5);
    e.fail_destroy_of(seeded[1].clone.as_str());
    let mut j = Journal::new();

    let r = Lifecycle::new(&e, opts(2)).sweep(&root, Kind::Daily, &mut j);

    assert_eq!(r.clones.removed.len(), 2);
    assert_eq!(r.clones.failed.len(), 1);
    assert!(e.has(seeded[1].clone.as_str()));
    assert!(!e.has(seeded[0].clone.as_str()));
    assert!(!e.has(seeded[2].clone.as_str()));

    // origin of the stuck clone is skipped, never attempted
    assert_eq!(r.snapshots.skipped.len(), 1);
    assert_eq!(r.snapshots.skipped[0].0, seeded[1].snapshot);
    assert!(r.snapshots.failed.is_empty());
    assert!(e.has(&seeded[1].snapshot));
    assert!(!e
        .ops()
        .iter()
        .any(|op| op == &format!("destroy {}", seeded[1].snapshot)));
    assert_eq!(r.snapshots.removed.len(), 2);
    assert_eq!(j.count(Level::Warning), 2);
    Ok(())
}

#[test]
fn sweep_is_scoped_by_kind() -> Result<()> {
    let (e, root) = engine_with_root();
    let weekly = seed_pairs(&e, &root, Kind::Weekly, 3);
    seed_pairs(&e, &root, Kind::Daily, 3);
    let mut j = Journal::new();

    let r = Lifecycle::new(&e, opts(1)).sweep(&root, Kind::Daily, &mut j);

    assert_eq!(r.clones.removed.len(), 2);
    for w in &weekly {
        assert!(e.has(w.clone.as_str()));
        assert!(e.has(&w.snapshot));
    }
    Ok(())
}

#[test]
fn snapshot_failure_is_fatal_and_creates_nothing() {
    let (e, root) = engine_with_root();
    e.fail_snapshots(true);
    let mut j = Journal::new();

    let err = Lifecycle::new(&e, opts(2))
        .run_at(&root, Kind::Daily, t0(), &mut j)
        .expect_err("must fail");
    match err.downcast_ref::<BackupError>() {
        Some(BackupError::Stage { stage, .. }) => assert_eq!(*stage, Stage::Start),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(e.ops().is_empty());
    assert_eq!(j.count(Level::Error), 1);
}

#[test]
fn clone_failure_retains_snapshot_by_default() {
    let (e, root) = engine_with_root();
    e.fail_clones(true);
    let mut j = Journal::new();

    let err = Lifecycle::new(&e, opts(2))
        .run_at(&root, Kind::Daily, t0(), &mut j)
        .expect_err("must fail");
    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::Stage {
            stage: Stage::SnapshotCreated,
            ..
        })
    ));
    let names = RunNames::new(&root, Kind::Daily, t0());
    assert!(e.has(&names.snapshot));
}

#[test]
fn clone_failure_rolls_back_when_configured() {
    let (e, root) = engine_with_root();
    e.fail_clones(true);
    let mut j = Journal::new();
    let mut o = opts(2);
    o.clone_failure = CloneFailurePolicy::Rollback;

    assert!(Lifecycle::new(&e, o)
        .run_at(&root, Kind::Daily, t0(), &mut j)
        .is_err());
    let names = RunNames::new(&root, Kind::Daily, t0());
    assert!(!e.has(&names.snapshot));
}

#[test]
fn metadata_write_failure_is_a_warning() -> Result<()> {
    let (e, root) = engine_with_root();
    e.fail_set_property("acltype");
    let mut j = Journal::new();

    let r = Lifecycle::new(&e, opts(2)).run_at(&root, Kind::Daily, t0(), &mut j)?;

    assert_eq!(r.stage, Stage::Done);
    let acl = r.properties.iter().find(|o| o.key == "acltype").unwrap();
    assert!(matches!(acl.status, PropertyStatus::WriteFailed(_)));
    assert_eq!(e.property(r.names.clone.as_str(), PROP_COMMANDLINE).as_deref(), Some("quiet"));
    assert_eq!(j.count(Level::Warning), 1);
    Ok(())
}

#[test]
fn commandline_failure_warns_by_default_and_is_fatal_when_required() {
    let (e, root) = engine_with_root();
    e.fail_set_property(PROP_COMMANDLINE);

    let mut j = Journal::new();
    let r = Lifecycle::new(&e, opts(2)).run_at(&root, Kind::Daily, t0(), &mut j);
    assert!(r.is_ok());
    assert!(j
        .messages(Level::Warning)
        .iter()
        .any(|m| m.contains("boot commandline")));

    let mut j = Journal::new();
    let mut o = opts(2);
    o.commandline_required = true;
    let err = Lifecycle::new(&e, o)
        .run_at(&root, Kind::Daily, t0() + Duration::seconds(1), &mut j)
        .expect_err("commandline is required");
    assert!(matches!(
        err.downcast_ref::<BackupError>(),
        Some(BackupError::Stage {
            stage: Stage::CloneCreated,
            ..
        })
    ));
}

#[test]
fn existing_clone_name_is_overwritten() -> Result<()> {
    let (e, root) = engine_with_root();
    let names = RunNames::new(&root, Kind::Daily, t0());
    e.add_dataset(names.clone.as_str(), &[("note", "stale")]);
    let mut j = Journal::new();

    let r = Lifecycle::new(&e, opts(2)).run_at(&root, Kind::Daily, t0(), &mut j)?;

    assert_eq!(r.stage, Stage::Done);
    assert_eq!(e.property(names.clone.as_str(), "note"), None);
    assert_eq!(
        e.property(names.clone.as_str(), PROP_ORIGIN).as_deref(),
        Some(names.snapshot.as_str())
    );
    assert_eq!(j.count(Level::Warning), 1);
    Ok(())
}

#[test]
fn booted_clone_is_never_swept() -> Result<()> {
    // система загружена из старого клона: он сам является root
    let e = MemoryEngine::new();
    let booted = "rpool/ROOT/daily_clone-2026-09-01_03-00-00";
    e.add_dataset(booted, &[(PROP_COMMANDLINE, "quiet")]);
    let root = DatasetId::parse(booted)?;
    let mut j = Journal::new();

    for i in 0..3 {
        Lifecycle::new(&e, opts(1)).run_at(&root, Kind::Daily, t0() + Duration::days(i), &mut j)?;
    }

    assert!(e.has(booted));
    assert!(j
        .messages(Level::Warning)
        .iter()
        .any(|m| m.contains("currently mounted root")));
    Ok(())
}

#[test]
fn consecutive_runs_produce_distinct_names() -> Result<()> {
    let (e, root) = engine_with_root();
    let mut j = Journal::new();
    let lc = Lifecycle::new(&e, opts(5));
    let a = lc.run_at(&root, Kind::Daily, t0(), &mut j)?;
    let b = lc.run_at(&root, Kind::Daily, t0() + Duration::seconds(1), &mut j)?;
    assert_ne!(a.names.snapshot, b.names.snapshot);
    assert_ne!(a.names.clone, b.names.clone);
    assert!(e.has(a.names.clone.as_str()) && e.has(b.names.clone.as_str()));
    Ok(())
}

#[test]
fn propagation_is_idempotent() -> Result<()> {
    let (e, root) = engine_with_root();
    let clone = "rpool/ROOT/manual";
    e.add_dataset(clone, &[]);

    let first = propagate(&e, root.as_str(), clone, BOOT_PROPERTIES);
    let after_first: Vec<Option<String>> =
        BOOT_PROPERTIES.iter().map(|k| e.property(clone, k)).collect();
    let second = propagate(&e, root.as_str(), clone, BOOT_PROPERTIES);
    let after_second: Vec<Option<String>> =
        BOOT_PROPERTIES.iter().map(|k| e.property(clone, k)).collect();

    assert_eq!(first, second);
    assert_eq!(after_first, after_second);
    assert_eq!(e.property(clone, PROP_COMMANDLINE).as_deref(), Some("quiet"));
    assert!(first.iter().all(|o| !o.is_failure()));
    Ok(())
}
