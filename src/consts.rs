//! Общие константы: имена, свойства ZFS и дефолты конфигурации.
//!
//! The `DEFAULT_*` values are the operator-editable constants of a deployment.
//! Every one of them can be overridden from ENV (see `config.rs`).

// -------- Naming --------
pub const BOOT_CONTAINER: &str = "ROOT";
pub const SNAPSHOT_TAG: &str = "snapshot";
pub const CLONE_TAG: &str = "clone";
pub const DAILY_TS_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const WEEKLY_TS_FORMAT: &str = "%Y-%m-%d_%H-%M";

// -------- Export files --------
pub const EXPORT_EXT: &str = "zfs";
pub const EXPORT_ZST_EXT: &str = "zfs.zst";
pub const EXPORT_SIDECAR_EXT: &str = "json";
pub const EXPORT_ZSTD_LEVEL: i32 = 3;

// -------- Engine properties --------
/// Value reported by `zfs get` for an unset property.
pub const PROP_ABSENT: &str = "-";
pub const PROP_CANMOUNT: &str = "canmount";
pub const PROP_MOUNTPOINT: &str = "mountpoint";
pub const PROP_ORIGIN: &str = "origin";
pub const PROP_USED: &str = "used";

/// Primary boot property: a clone without it boots with the wrong cmdline.
pub const PROP_COMMANDLINE: &str = "org.zfsbootmenu:commandline";

/// Boot-relevant properties copied from the live root onto every new clone.
pub const BOOT_PROPERTIES: &[&str] = &[
    PROP_COMMANDLINE,
    "org.zfsbootmenu:keysource",
    "org.zfsbootmenu:active",
    "org.zfsbootmenu:timeout",
    "acltype",
    "aclinherit",
    "xattr",
    "atime",
    "relatime",
];

/// Properties set atomically at clone creation.
pub const CLONE_PROPERTIES: &[(&str, &str)] = &[(PROP_CANMOUNT, "noauto"), (PROP_MOUNTPOINT, "/")];

// -------- Defaults --------
pub const DEFAULT_KEEP: usize = 7;
pub const DEFAULT_EXPORT_KEEP: usize = 4;
pub const DEFAULT_MOUNT_POINT: &str = "/";
pub const DEFAULT_MOUNTS_TABLE: &str = "/proc/self/mounts";
pub const DEFAULT_LOG_FILE: &str = "/var/log/rootsnap.log";
pub const DEFAULT_LOCK_FILE: &str = "/run/rootsnap.lock";
pub const DEFAULT_ZFS_BIN: &str = "zfs";
pub const DEFAULT_MOUNT_BIN: &str = "mount";
pub const DEFAULT_MAIL_BIN: &str = "mail";

// -------- Journal --------
pub const JOURNAL_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
