//! `zfs(8)` command-line adapter.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::{self, JoinHandle};

use super::{ListKind, StorageEngine};
use crate::consts::PROP_ABSENT;
use crate::dataset::DatasetId;

#[derive(Debug, Clone)]
pub struct ZfsCli {
    bin: PathBuf,
}

impl ZfsCli {
    pub fn new<P: Into<PathBuf>>(bin: P) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!("zfs: {} {}", self.bin.display(), args.join(" "));
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        cmd
    }

    /// Run to completion; stdout on success, stderr folded into the error otherwise.
    fn run(&self, args: &[&str]) -> Result<String> {
        let out = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn {}", self.bin.display()))?;
        check_status(args, &out)?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Like `run`, but a non-zero exit is an answer ("no"), not an error.
    fn exits_ok(&self, args: &[&str]) -> Result<bool> {
        let out = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawn {}", self.bin.display()))?;
        Ok(out.status.success())
    }
}

impl Default for ZfsCli {
    fn default() -> Self {
        Self::new(crate::consts::DEFAULT_ZFS_BIN)
    }
}

fn check_status(args: &[&str], out: &Output) -> Result<()> {
    check_exit(args, out.status, &String::from_utf8_lossy(&out.stderr))
}

fn check_exit(args: &[&str], status: ExitStatus, stderr: &str) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(anyhow!(
        "zfs {} exited with {}: {}",
        args.first().copied().unwrap_or(""),
        status,
        stderr.trim()
    ))
}

/// Читаем stderr в отдельном потоке, пока основной качает stdin/stdout:
/// иначе полный pipe диагностики останавливает zfs.
fn drain_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

impl StorageEngine for ZfsCli {
    fn create_snapshot(&self, dataset: &DatasetId, label: &str) -> Result<String> {
        let name = dataset.snapshot(label);
        self.run(&["snapshot", &name])?;
        Ok(name)
    }

    fn create_clone(
        &self,
        snapshot: &str,
        target: &DatasetId,
        properties: &[(&str, &str)],
    ) -> Result<()> {
        let opts: Vec<String> = properties
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        let mut args: Vec<&str> = vec!["clone"];
        for o in &opts {
            args.push("-o");
            args.push(o.as_str());
        }
        args.push(snapshot);
        args.push(target.as_str());
        self.run(&args)?;
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.run(&["destroy", name])?;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.exits_ok(&["list", "-H", "-o", "name", "-t", "all", name])
    }

    fn get_property(&self, name: &str, key: &str) -> Result<Option<String>> {
        let out = self.run(&["get", "-H", "-o", "value", key, name])?;
        let v = out.trim();
        if v.is_empty() || v == PROP_ABSENT {
            Ok(None)
        } else {
            Ok(Some(v.to_string()))
        }
    }

    fn set_property(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let kv = format!("{}={}", key, value);
        self.run(&["set", &kv, name])?;
        Ok(())
    }

    fn list(&self, kind: ListKind, scope: &DatasetId) -> Result<Vec<String>> {
        let t = match kind {
            ListKind::Snapshots => "snapshot",
            ListKind::Filesystems => "filesystem",
        };
        let out = self.run(&[
            "list", "-H", "-o", "name", "-t", t, "-S", "creation", "-d", "1", scope.as_str(),
        ])?;
        // -d 1 для filesystem включает сам scope, выкидываем его
        Ok(lines(&out)
            .into_iter()
            .filter(|n| n != scope.as_str())
            .collect())
    }

    fn send_stream(&self, snapshot: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut child = self
            .command(&["send", snapshot])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {} send", self.bin.display()))?;
        let stderr = drain_stderr(&mut child);

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("zfs send: stdout not captured"))?;
        let copied = io::copy(&mut stdout, sink);
        drop(stdout);

        let bytes = match copied {
            Ok(n) => n,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                let diag = collect_stderr(stderr);
                return Err(anyhow!(e).context(format!("stream {}: {}", snapshot, diag.trim())));
            }
        };
        let status = child.wait().context("wait zfs send")?;
        check_exit(&["send"], status, &collect_stderr(stderr))?;
        Ok(bytes)
    }

    fn receive_stream(&self, source: &mut dyn Read, target: &DatasetId) -> Result<()> {
        let mut child = self
            .command(&["receive", target.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {} receive", self.bin.display()))?;
        let stderr = drain_stderr(&mut child);

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("zfs receive: stdin not captured"))?;
        let copied = io::copy(source, &mut stdin);
        // закрываем stdin, иначе receive не завершится
        drop(stdin);

        let status = child.wait().context("wait zfs receive")?;
        let diag = collect_stderr(stderr);
        copied.with_context(|| format!("feed stream into {}: {}", target, diag.trim()))?;
        check_exit(&["receive"], status, &diag)?;
        Ok(())
    }

    fn is_managed(&self, name: &str) -> Result<bool> {
        self.exits_ok(&["list", "-H", "-o", "name", "-t", "filesystem", name])
    }
}
