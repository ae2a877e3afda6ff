//! rootsnap: bootable ZFS root snapshots/clones with retention and external export.

// Базовые модули
pub mod consts;
pub mod config;
pub mod error;
pub mod dataset;
pub mod journal;
pub mod lock;

// Движок хранения (zfs CLI / in-memory)
pub mod engine;

// Стадии прогона
pub mod root;
pub mod props;
pub mod retention;
pub mod lifecycle;
pub mod export;
pub mod restore;
pub mod notify;
pub mod session;

// Утилиты (to_hex, HashingWriter, sha256_file)
pub mod util;

// Удобные реэкспорты
pub use config::{CloneFailurePolicy, RootsnapConfig};
pub use dataset::{DatasetId, Kind, RunNames};
pub use engine::{ListKind, MemoryEngine, StorageEngine, ZfsCli};
pub use error::{BackupError, Stage};
pub use journal::{Journal, Level};
pub use lifecycle::{Lifecycle, LifecycleOptions, RunReport};
pub use lock::try_acquire_run_lock;
