//! In-process storage engine.
//!
//! Keeps datasets and snapshots in ordered maps with a logical creation clock.
//! Enforces the same dependency rules as ZFS for the operations used here:
//! - a snapshot cannot be destroyed while some dataset has it as origin;
//! - a dataset cannot be destroyed while it has snapshots or children;
//! - clone targets must not exist and their parent must exist.
//!
//! Every mutating call is appended to an operation log (`ops()`), which tests
//! use to check ordering.

use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};

use super::{ListKind, StorageEngine};
use crate::consts::{PROP_ORIGIN, PROP_USED};
use crate::dataset::{split_snapshot, DatasetId};

#[derive(Debug, Default, Clone)]
struct MemDataset {
    props: BTreeMap<String, String>,
    origin: Option<String>,
    content: Vec<u8>,
    created: u64,
}

#[derive(Debug, Default, Clone)]
struct MemSnapshot {
    content: Vec<u8>,
    created: u64,
}

#[derive(Debug, Default)]
struct State {
    datasets: BTreeMap<String, MemDataset>,
    snapshots: BTreeMap<String, MemSnapshot>,
    clock: u64,
    ops: Vec<String>,

    // failure injection
    fail_snapshot: bool,
    fail_clone: bool,
    fail_destroy: HashSet<String>,
    fail_set: HashSet<String>,
    fail_send_after: Option<usize>,
    unmanaged_queries: bool,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn ensure_dataset(&mut self, name: &str) {
        if self.datasets.contains_key(name) {
            return;
        }
        if let Some((parent, _)) = name.rsplit_once('/') {
            self.ensure_dataset(parent);
        }
        let created = self.tick();
        self.datasets.insert(
            name.to_string(),
            MemDataset {
                created,
                ..MemDataset::default()
            },
        );
    }
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: RefCell<State>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dataset (and any missing parents) with the given local properties.
    pub fn add_dataset(&self, name: &str, props: &[(&str, &str)]) {
        let mut st = self.state.borrow_mut();
        st.ensure_dataset(name);
        if let Some(ds) = st.datasets.get_mut(name) {
            for (k, v) in props {
                ds.props.insert(k.to_string(), v.to_string());
            }
        }
    }

    /// Replace the bytes a later snapshot of `name` will carry in its stream.
    pub fn set_content(&self, name: &str, bytes: &[u8]) {
        if let Some(ds) = self.state.borrow_mut().datasets.get_mut(name) {
            ds.content = bytes.to_vec();
        }
    }

    pub fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.state.borrow().datasets.get(name).map(|d| d.content.clone())
    }

    pub fn fail_snapshots(&self, on: bool) {
        self.state.borrow_mut().fail_snapshot = on;
    }

    pub fn fail_clones(&self, on: bool) {
        self.state.borrow_mut().fail_clone = on;
    }

    /// Make `destroy(name)` fail until cleared.
    pub fn fail_destroy_of(&self, name: &str) {
        self.state.borrow_mut().fail_destroy.insert(name.to_string());
    }

    /// Make `set_property(_, key, _)` fail for this key.
    pub fn fail_set_property(&self, key: &str) {
        self.state.borrow_mut().fail_set.insert(key.to_string());
    }

    /// `send_stream` writes at most `n` bytes and then fails.
    pub fn fail_send_after(&self, n: Option<usize>) {
        self.state.borrow_mut().fail_send_after = n;
    }

    /// `is_managed` returns an error, as a missing `zfs` binary would.
    pub fn fail_capability_queries(&self, on: bool) {
        self.state.borrow_mut().unmanaged_queries = on;
    }

    pub fn has(&self, name: &str) -> bool {
        let st = self.state.borrow();
        st.datasets.contains_key(name) || st.snapshots.contains_key(name)
    }

    /// Local property value, bypassing failure injection.
    pub fn property(&self, name: &str, key: &str) -> Option<String> {
        let st = self.state.borrow();
        let ds = st.datasets.get(name)?;
        if key == PROP_ORIGIN {
            return ds.origin.clone();
        }
        ds.props.get(key).cloned()
    }

    pub fn ops(&self) -> Vec<String> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }
}

impl StorageEngine for MemoryEngine {
    fn create_snapshot(&self, dataset: &DatasetId, label: &str) -> Result<String> {
        let mut st = self.state.borrow_mut();
        let name = dataset.snapshot(label);
        if st.fail_snapshot {
            return Err(anyhow!("cannot create snapshot '{}': injected failure", name));
        }
        let content = st
            .datasets
            .get(dataset.as_str())
            .map(|d| d.content.clone())
            .ok_or_else(|| anyhow!("dataset does not exist: {}", dataset))?;
        if st.snapshots.contains_key(&name) {
            return Err(anyhow!("dataset already exists: {}", name));
        }
        let created = st.tick();
        st.snapshots.insert(name.clone(), MemSnapshot { content, created });
        st.ops.push(format!("snapshot {}", name));
        Ok(name)
    }

    fn create_clone(
        &self,
        snapshot: &str,
        target: &DatasetId,
        properties: &[(&str, &str)],
    ) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.fail_clone {
            return Err(anyhow!("cannot create '{}': injected failure", target));
        }
        let content = st
            .snapshots
            .get(snapshot)
            .map(|s| s.content.clone())
            .ok_or_else(|| anyhow!("snapshot does not exist: {}", snapshot))?;
        if st.datasets.contains_key(target.as_str()) {
            return Err(anyhow!("dataset already exists: {}", target));
        }
        if let Some((parent, _)) = target.as_str().rsplit_once('/') {
            if !st.datasets.contains_key(parent) {
                return Err(anyhow!("parent does not exist: {}", parent));
            }
        }
        let created = st.tick();
        let props = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        st.datasets.insert(
            target.as_str().to_string(),
            MemDataset {
                props,
                origin: Some(snapshot.to_string()),
                content,
                created,
            },
        );
        st.ops.push(format!("clone {} {}", snapshot, target));
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.fail_destroy.contains(name) {
            return Err(anyhow!("cannot destroy '{}': dataset is busy", name));
        }
        if st.snapshots.contains_key(name) {
            if let Some((dep, _)) = st
                .datasets
                .iter()
                .find(|(_, d)| d.origin.as_deref() == Some(name))
            {
                return Err(anyhow!(
                    "cannot destroy '{}': snapshot has dependent clones ({})",
                    name,
                    dep
                ));
            }
            st.snapshots.remove(name);
            st.ops.push(format!("destroy {}", name));
            return Ok(());
        }
        if st.datasets.contains_key(name) {
            let child_prefix = format!("{}/", name);
            let snap_prefix = format!("{}@", name);
            if st.datasets.keys().any(|k| k.starts_with(&child_prefix))
                || st.snapshots.keys().any(|k| k.starts_with(&snap_prefix))
            {
                return Err(anyhow!("cannot destroy '{}': filesystem has children", name));
            }
            st.datasets.remove(name);
            st.ops.push(format!("destroy {}", name));
            return Ok(());
        }
        Err(anyhow!("could not find any snapshots/datasets named '{}'", name))
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.has(name))
    }

    fn get_property(&self, name: &str, key: &str) -> Result<Option<String>> {
        let st = self.state.borrow();
        if let Some(s) = st.snapshots.get(name) {
            return Ok(match key {
                PROP_USED => Some(format!("{}B", s.content.len())),
                _ => None,
            });
        }
        let ds = st
            .datasets
            .get(name)
            .ok_or_else(|| anyhow!("dataset does not exist: {}", name))?;
        Ok(match key {
            PROP_ORIGIN => ds.origin.clone(),
            PROP_USED => Some(format!("{}B", ds.content.len())),
            _ => ds.props.get(key).filter(|v| !v.is_empty()).cloned(),
        })
    }

    fn set_property(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let mut st = self.state.borrow_mut();
        if st.fail_set.contains(key) {
            return Err(anyhow!("cannot set property '{}' on '{}': permission denied", key, name));
        }
        let ds = st
            .datasets
            .get_mut(name)
            .ok_or_else(|| anyhow!("dataset does not exist: {}", name))?;
        ds.props.insert(key.to_string(), value.to_string());
        st.ops.push(format!("set {} {}={}", name, key, value));
        Ok(())
    }

    fn list(&self, kind: ListKind, scope: &DatasetId) -> Result<Vec<String>> {
        let st = self.state.borrow();
        if !st.datasets.contains_key(scope.as_str()) {
            return Err(anyhow!("dataset does not exist: {}", scope));
        }
        let mut found: Vec<(u64, String)> = match kind {
            ListKind::Snapshots => st
                .snapshots
                .iter()
                .filter(|(n, _)| split_snapshot(n).map(|(ds, _)| ds) == Some(scope.as_str()))
                .map(|(n, s)| (s.created, n.clone()))
                .collect(),
            ListKind::Filesystems => st
                .datasets
                .iter()
                .filter(|(n, _)| {
                    n.rsplit_once('/').map(|(parent, _)| parent) == Some(scope.as_str())
                })
                .map(|(n, d)| (d.created, n.clone()))
                .collect(),
        };
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, n)| n).collect())
    }

    fn send_stream(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64> {
        let (content, limit) = {
            let mut st = self.state.borrow_mut();
            let content = st
                .snapshots
                .get(snapshot)
                .map(|s| s.content.clone())
                .ok_or_else(|| anyhow!("snapshot does not exist: {}", snapshot))?;
            st.ops.push(format!("send {}", snapshot));
            (content, st.fail_send_after)
        };
        match limit {
            Some(n) if n < content.len() => {
                sink.write_all(&content[..n])?;
                Err(anyhow!("send {}: broken pipe after {} bytes", snapshot, n))
            }
            _ => {
                sink.write_all(&content)?;
                Ok(content.len() as u64)
            }
        }
    }

    fn receive_stream(&self, source: &mut dyn Read, target: &DatasetId) -> Result<()> {
        let mut buf = Vec::new();
        source.read_to_end(&mut buf)?;
        let mut st = self.state.borrow_mut();
        if st.datasets.contains_key(target.as_str()) {
            return Err(anyhow!("destination '{}' exists", target));
        }
        let created = st.tick();
        st.datasets.insert(
            target.as_str().to_string(),
            MemDataset {
                content: buf,
                created,
                ..MemDataset::default()
            },
        );
        st.ops.push(format!("receive {}", target));
        Ok(())
    }

    fn is_managed(&self, name: &str) -> Result<bool> {
        let st = self.state.borrow();
        if st.unmanaged_queries {
            return Err(anyhow!("zfs: command not found"));
        }
        Ok(st.datasets.contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_with_clone_cannot_be_destroyed() {
        let e = MemoryEngine::new();
        e.add_dataset("rpool/ROOT/pve-1", &[]);
        let root = DatasetId::parse("rpool/ROOT/pve-1").unwrap();
        let snap = e.create_snapshot(&root, "s1").unwrap();
        let clone = DatasetId::parse("rpool/ROOT/c1").unwrap();
        e.create_clone(&snap, &clone, &[]).unwrap();

        assert!(e.destroy(&snap).is_err());
        e.destroy(clone.as_str()).unwrap();
        e.destroy(&snap).unwrap();
        assert!(!e.has(&snap));
    }

    #[test]
    fn list_is_newest_first_and_scoped() {
        let e = MemoryEngine::new();
        e.add_dataset("rpool/ROOT/a", &[]);
        e.add_dataset("rpool/ROOT/b", &[]);
        e.add_dataset("rpool/data", &[]);
        let scope = DatasetId::parse("rpool/ROOT").unwrap();
        let got = e.list(ListKind::Filesystems, &scope).unwrap();
        assert_eq!(got, vec!["rpool/ROOT/b".to_string(), "rpool/ROOT/a".to_string()]);
    }
}
