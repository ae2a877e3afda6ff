//! Keep-newest-N retention shared by the local sweeps and the export sweep.
//!
//! Input lists are newest first. The first `keep_count` items are kept, the
//! rest are removed one by one; a failed removal is recorded as a warning and
//! never stops the loop.

use anyhow::Result;

use crate::journal::Journal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_count: usize,
}

impl RetentionPolicy {
    pub fn new(keep_count: usize) -> Self {
        Self { keep_count }
    }

    /// `(kept, expired)` for a newest-first slice.
    pub fn split<'a, T>(&self, newest_first: &'a [T]) -> (&'a [T], &'a [T]) {
        let n = self.keep_count.min(newest_first.len());
        newest_first.split_at(n)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: Vec<String>,
    pub removed: Vec<String>,
    /// Expired but deliberately left alone (name, reason).
    pub skipped: Vec<(String, String)>,
    /// Removal attempted and failed (name, error).
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    /// Everything still present after the sweep.
    pub fn survivors(&self) -> impl Iterator<Item = &str> {
        self.kept
            .iter()
            .map(|s| s.as_str())
            .chain(self.skipped.iter().map(|(n, _)| n.as_str()))
            .chain(self.failed.iter().map(|(n, _)| n.as_str()))
    }
}

/// Sweep with no protected items.
pub fn sweep<F>(
    what: &str,
    newest_first: &[String],
    policy: RetentionPolicy,
    journal: &mut Journal,
    remove: F,
) -> SweepReport
where
    F: FnMut(&str) -> Result<()>,
{
    sweep_guarded(what, newest_first, policy, journal, |_| None, remove)
}

/// `guard` returns a reason when an expired item must not be removed yet.
pub fn sweep_guarded<G, F>(
    what: &str,
    newest_first: &[String],
    policy: RetentionPolicy,
    journal: &mut Journal,
    guard: G,
    mut remove: F,
) -> SweepReport
where
    G: Fn(&str) -> Option<String>,
    F: FnMut(&str) -> Result<()>,
{
    let (kept, expired) = policy.split(newest_first);
    let mut report = SweepReport {
        kept: kept.to_vec(),
        ..SweepReport::default()
    };
    journal.info(format!(
        "retention {}: {} found, keeping {}, {} expired",
        what,
        newest_first.len(),
        kept.len(),
        expired.len()
    ));

    for name in expired {
        if let Some(reason) = guard(name) {
            journal.warn(format!("retention {}: skip {} ({})", what, name, reason));
            report.skipped.push((name.clone(), reason));
            continue;
        }
        match remove(name) {
            Ok(()) => {
                journal.info(format!("retention {}: removed {}", what, name));
                report.removed.push(name.clone());
            }
            Err(e) => {
                journal.warn(format!(
                    "retention {}: failed to remove {}: {:#} (left for next run)",
                    what, name, e
                ));
                report.failed.push((name.clone(), format!("{:#}", e)));
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn names(n: usize) -> Vec<String> {
        // newest first: c4, c3, ... c0
        (0..n).rev().map(|i| format!("c{}", i)).collect()
    }

    #[test]
    fn split_keeps_newest() {
        let v = names(5);
        let (kept, expired) = RetentionPolicy::new(2).split(&v);
        assert_eq!(kept, &["c4".to_string(), "c3".to_string()]);
        assert_eq!(expired.len(), 3);

        let (kept, expired) = RetentionPolicy::new(10).split(&v);
        assert_eq!(kept.len(), 5);
        assert!(expired.is_empty());
    }

    #[test]
    fn failures_do_not_block_later_candidates() {
        let v = names(6);
        let mut j = Journal::new();
        let mut attempted = Vec::new();
        let r = sweep("clones", &v, RetentionPolicy::new(2), &mut j, |n| {
            attempted.push(n.to_string());
            if n == "c2" {
                Err(anyhow!("busy"))
            } else {
                Ok(())
            }
        });
        assert_eq!(attempted, vec!["c3", "c2", "c1", "c0"]);
        assert_eq!(r.removed, vec!["c3", "c1", "c0"]);
        assert_eq!(r.failed.len(), 1);
        assert_eq!(r.failed[0].0, "c2");
        assert_eq!(r.kept, vec!["c5", "c4"]);
        assert_eq!(j.count(crate::journal::Level::Warning), 1);
    }

    #[test]
    fn guarded_items_are_skipped_not_attempted() {
        let v = names(3);
        let mut j = Journal::new();
        let mut attempted = Vec::new();
        let r = sweep_guarded(
            "snapshots",
            &v,
            RetentionPolicy::new(1),
            &mut j,
            |n| (n == "c1").then(|| "still referenced".to_string()),
            |n| {
                attempted.push(n.to_string());
                Ok(())
            },
        );
        assert_eq!(attempted, vec!["c0"]);
        assert_eq!(r.skipped, vec![("c1".to_string(), "still referenced".to_string())]);
        let survivors: Vec<&str> = r.survivors().collect();
        assert_eq!(survivors, vec!["c2", "c1"]);
    }
}
