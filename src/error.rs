//! Fatal error classes. Everything non-fatal goes to the journal instead.

use std::fmt;
use thiserror::Error;

/// Stage of a backup run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SnapshotCreated,
    CloneCreated,
    MetadataCopied,
    Verified,
    RetentionSwept,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Start => "start",
            Stage::SnapshotCreated => "snapshot-created",
            Stage::CloneCreated => "clone-created",
            Stage::MetadataCopied => "metadata-copied",
            Stage::Verified => "verified",
            Stage::RetentionSwept => "retention-swept",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("no filesystem mounted at {0}")]
    RootNotFound(String),

    #[error("root source '{0}' is not a ZFS boot environment ({1})")]
    NotSupported(String, String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A stage could not complete; `stage` is the last stage reached.
    #[error("{action} failed after stage {stage}: {reason}")]
    Stage {
        stage: Stage,
        action: &'static str,
        reason: String,
    },
}

impl BackupError {
    pub fn stage(stage: Stage, action: &'static str, err: &anyhow::Error) -> Self {
        BackupError::Stage {
            stage,
            action,
            reason: format!("{:#}", err),
        }
    }
}
