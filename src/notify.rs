//! Notification sink for the session transcript.
//!
//! `alert` is the separate channel for CRITICAL conditions; by default it is a
//! distinctly-tagged mail, so an operator filter can route it elsewhere.

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::consts::DEFAULT_MAIL_BIN;

pub trait Notifier {
    fn send(&self, subject: &str, body: &str) -> Result<()>;

    fn alert(&self, subject: &str, body: &str) -> Result<()> {
        self.send(&format!("[CRITICAL] {}", subject), body)
    }
}

/// Pipes the body into `mail -s <subject> <to>`.
#[derive(Debug, Clone)]
pub struct MailCommand {
    bin: PathBuf,
    to: String,
}

impl MailCommand {
    pub fn new<S: Into<String>>(to: S) -> Self {
        Self {
            bin: PathBuf::from(DEFAULT_MAIL_BIN),
            to: to.into(),
        }
    }

    pub fn with_bin<P: Into<PathBuf>>(mut self, bin: P) -> Self {
        self.bin = bin.into();
        self
    }
}

impl Notifier for MailCommand {
    fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mut child = Command::new(&self.bin)
            .arg("-s")
            .arg(subject)
            .arg(&self.to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn {}", self.bin.display()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(body.as_bytes())
                .context("write mail body")?;
        }
        let out = child.wait_with_output().context("wait mail")?;
        if !out.status.success() {
            return Err(anyhow!(
                "{} exited with {}: {}",
                self.bin.display(),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(())
    }
}

/// `MailCommand` when a recipient is configured, otherwise `NullNotifier`.
pub fn for_recipient(mail_to: Option<&str>) -> Box<dyn Notifier> {
    match mail_to {
        Some(to) => Box::new(MailCommand::new(to)),
        None => Box::new(NullNotifier),
    }
}

/// No mail configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, _subject: &str, _body: &str) -> Result<()> {
        Ok(())
    }
}
