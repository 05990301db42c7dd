//! Writes server verdicts back onto registry entries.
//!
//! Matching is by filename, against the entries of the batch that was
//! actually sent (or, for follow-ups, the entries still processing). Each
//! verdict is consumed by at most one entry (first unconsumed match wins),
//! so duplicate names pair up in the order the server returned them.
//! Entries without a match keep their status.

use super::registry::{FileRegistry, UploadBatch};
use super::schema::{FileStatus, ServerVerdict, VerdictStatus};
use tracing::warn;

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub completed: Vec<String>,
    pub processing: Vec<String>,
    pub failed: Vec<String>,
    /// Entries that received no verdict and stay where they were.
    pub gaps: Vec<String>,
    /// Verdicts that matched no entry.
    pub unmatched: usize,
}

impl ReconcileReport {
    pub fn matched(&self) -> usize {
        self.completed.len() + self.processing.len() + self.failed.len()
    }
}

fn target_status(verdict: VerdictStatus) -> FileStatus {
    match verdict {
        VerdictStatus::Completed => FileStatus::Completed,
        VerdictStatus::Processing => FileStatus::Processing,
        VerdictStatus::Failed => FileStatus::Error,
    }
}

/// `(id, name)` of the entries in `from` that `keep` selects, in registry order.
fn candidates(
    registry: &FileRegistry,
    from: FileStatus,
    keep: impl Fn(&str) -> bool,
) -> Vec<(String, String)> {
    registry
        .files()
        .iter()
        .filter(|f| f.status == from && keep(&f.id))
        .map(|f| (f.id.clone(), f.name().to_string()))
        .collect()
}

fn apply_to(
    registry: &mut FileRegistry,
    candidates: Vec<(String, String)>,
    verdicts: Vec<ServerVerdict>,
) -> ReconcileReport {
    let mut pool: Vec<Option<ServerVerdict>> = verdicts.into_iter().map(Some).collect();

    let mut report = ReconcileReport::default();
    for (id, name) in candidates {
        let slot = pool
            .iter_mut()
            .find(|v| v.as_ref().is_some_and(|v| v.filename == name));
        let Some(verdict) = slot.and_then(Option::take) else {
            report.gaps.push(id);
            continue;
        };

        let status = target_status(verdict.status);
        match registry.attach_verdict(&id, status, verdict) {
            Ok(()) => match status {
                FileStatus::Completed => report.completed.push(id),
                FileStatus::Error => report.failed.push(id),
                _ => report.processing.push(id),
            },
            Err(e) => warn!(file = %id, error = %e, "Dropping verdict"),
        }
    }

    report.unmatched = pool.iter().filter(|v| v.is_some()).count();
    if !report.gaps.is_empty() {
        warn!(count = report.gaps.len(), "Files received no verdict");
    }
    report
}

/// Reconcile an upload response against the entries of `batch` that are
/// still uploading.
pub fn reconcile(
    registry: &mut FileRegistry,
    batch: &UploadBatch,
    verdicts: Vec<ServerVerdict>,
) -> ReconcileReport {
    let sent = candidates(registry, FileStatus::Uploading, |id| batch.contains(id));
    apply_to(registry, sent, verdicts)
}

/// Reconcile a later result fetch against the `processing` entries.
pub fn reconcile_followup(registry: &mut FileRegistry, verdicts: Vec<ServerVerdict>) -> ReconcileReport {
    let waiting = candidates(registry, FileStatus::Processing, |_| true);
    apply_to(registry, waiting, verdicts)
}

/// The whole transfer failed: every entry of `batch` still uploading
/// becomes `error`.
pub fn fail_uploading(registry: &mut FileRegistry, batch: &UploadBatch, message: &str) -> Vec<String> {
    registry.fail_batch(batch, message)
}
