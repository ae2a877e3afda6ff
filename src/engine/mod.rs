//! Storage engine capability interface.
//!
//! Состав:
//! - zfs.rs: `ZfsCli`, a thin wrapper over the `zfs` binary.
//! - memory.rs: `MemoryEngine`, an in-process engine with the same dependency
//!   rules (a snapshot with a live clone cannot be destroyed) and failure
//!   injection, so the lifecycle can be exercised without real pools.
//!
//! Higher layers only talk to `StorageEngine`; nothing above this module
//! spawns `zfs` directly.

use anyhow::Result;
use std::io::{Read, Write};

use crate::dataset::DatasetId;

mod memory;
mod zfs;

pub use memory::MemoryEngine;
pub use zfs::ZfsCli;

/// What `StorageEngine::list` enumerates under a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Snapshots of the scope dataset itself.
    Snapshots,
    /// Filesystems directly below the scope dataset (clones live here).
    Filesystems,
}

pub trait StorageEngine {
    /// Create `<dataset>@<label>` and return its full name.
    fn create_snapshot(&self, dataset: &DatasetId, label: &str) -> Result<String>;

    /// Clone `snapshot` into `target`, setting `properties` at creation time.
    fn create_clone(
        &self,
        snapshot: &str,
        target: &DatasetId,
        properties: &[(&str, &str)],
    ) -> Result<()>;

    /// Destroy a dataset or a snapshot (never recursive).
    fn destroy(&self, name: &str) -> Result<()>;

    fn exists(&self, name: &str) -> Result<bool>;

    /// `Ok(None)` when the engine reports the property as unset.
    fn get_property(&self, name: &str, key: &str) -> Result<Option<String>>;

    fn set_property(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Names under `scope`, newest first (creation time, descending).
    fn list(&self, kind: ListKind, scope: &DatasetId) -> Result<Vec<String>>;

    /// Write a full (non-incremental) stream of `snapshot` into `sink`.
    /// Returns the number of bytes written.
    fn send_stream(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64>;

    /// Create `target` from a stream produced by `send_stream`.
    fn receive_stream(&self, source: &mut dyn Read, target: &DatasetId) -> Result<()>;

    /// Capability query: is `name` a dataset this engine manages?
    /// An `Err` means the engine could not answer (e.g. the tool is missing).
    fn is_managed(&self, name: &str) -> Result<bool>;
}
