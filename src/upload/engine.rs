//! Upload orchestration: the single owner of the file registry.
//!
//! The presentation layer drives the engine with user intents (add, remove,
//! clear, submit) and renders from `files()`, the progress watch channel and
//! the notice queue.

use super::error::{EngineError, RegistryError, TransportError};
use super::extract::{expand_all, LeafFile};
use super::reconcile::{fail_uploading, reconcile, reconcile_followup, ReconcileReport};
use super::registry::{FileRegistry, TrackedFile, UploadBatch};
use super::schema::ServerVerdict;
use super::session::SessionToken;
use super::transport::Backend;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
    Info,
    Warning,
}

/// A dismissible user-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
}

/// Outcome of adding a selection.
#[derive(Debug, Default, Clone)]
pub struct AddOutcome {
    pub added: Vec<String>,
    pub failed_archives: Vec<String>,
}

pub struct UploadEngine {
    backend: Arc<dyn Backend>,
    registry: FileRegistry,
    uploading: bool,
    progress: watch::Sender<u8>,
    last_error: Option<String>,
    notices: Vec<Notice>,
    next_notice: u64,
}

impl UploadEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (progress, _) = watch::channel(0);
        Self {
            backend,
            registry: FileRegistry::new(),
            uploading: false,
            progress,
            last_error: None,
            notices: Vec::new(),
            next_notice: 0,
        }
    }

    pub fn files(&self) -> &[TrackedFile] {
        self.registry.files()
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading
    }

    /// Aggregate progress of the current (or last) transfer, 0–100.
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    /// Live view of the aggregate progress for a renderer on another task.
    pub fn subscribe_progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn dismiss(&mut self, id: u64) {
        self.notices.retain(|n| n.id != id);
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Expand a user selection and add all resulting leaves in one step.
    pub fn add_files(&mut self, selection: Vec<LeafFile>) -> AddOutcome {
        let expansion = expand_all(selection);

        let mut outcome = AddOutcome::default();
        for failure in &expansion.failures {
            outcome.failed_archives.push(failure.archive.clone());
            self.notify(
                NoticeLevel::Error,
                format!("Failed to extract {}", failure.archive),
            );
        }

        outcome.added = self.registry.add(expansion.leaves);
        let n = outcome.added.len();
        let level = if n == 0 { NoticeLevel::Warning } else { NoticeLevel::Success };
        self.notify(level, format!("Added {} file{}", n, if n == 1 { "" } else { "s" }));

        self.last_error = expansion
            .failures
            .last()
            .map(|f| format!("Failed to extract {}", f.archive));
        outcome
    }

    /// Remove one entry. Entries that are uploading are refused.
    pub fn remove_file(&mut self, id: &str) -> Result<Option<TrackedFile>, RegistryError> {
        self.registry.remove(id).inspect_err(|e| {
            warn!(file = %id, error = %e, "Remove refused");
        })
    }

    /// Empty the registry and reset the aggregate progress.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.progress.send_replace(0);
        self.last_error = None;
    }

    /// Upload every pending file in one transfer and reconcile the verdicts.
    ///
    /// Cancelling `cancel` aborts the transfer; every file still uploading
    /// then ends in `error`, as for any other transport failure.
    pub async fn submit(
        &mut self,
        session: &SessionToken,
        cancel: CancellationToken,
    ) -> Result<ReconcileReport, EngineError> {
        if self.uploading {
            return Err(EngineError::AlreadyUploading);
        }

        let batch = self.registry.begin_upload();
        if batch.is_empty() {
            let err = EngineError::NothingToUpload;
            self.last_error = Some(err.to_string());
            self.notify(NoticeLevel::Error, err.to_string());
            return Err(err);
        }

        self.uploading = true;
        self.last_error = None;
        self.progress.send_replace(0);
        info!(files = batch.len(), session = %session, "Submitting batch");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::clone(&self.backend);
        let result = {
            let upload = backend.upload(session.as_str(), &batch, tx, cancel);
            tokio::pin!(upload);
            loop {
                tokio::select! {
                    biased;
                    Some(event) = rx.recv() => {
                        self.progress.send_replace(event.percentage);
                    }
                    result = &mut upload => break result,
                }
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.progress.send_replace(event.percentage);
        }
        self.uploading = false;

        match result {
            Ok(verdicts) => Ok(self.apply_verdicts(&batch, verdicts)),
            Err(e) => {
                self.fail_batch(&batch, &e);
                Err(EngineError::Transport(e))
            }
        }
    }

    /// Fetch the latest results for the session and advance files that are
    /// still processing server-side.
    pub async fn refresh(&mut self, session: &SessionToken) -> Result<ReconcileReport, EngineError> {
        let verdicts = match self.backend.analysis_results(session.as_str()).await {
            Ok(v) => v,
            Err(e) => {
                self.last_error = Some(e.to_string());
                self.notify(NoticeLevel::Error, e.to_string());
                return Err(EngineError::Transport(e));
            }
        };
        let report = reconcile_followup(&mut self.registry, verdicts);
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            "Refreshed results"
        );
        Ok(report)
    }

    fn apply_verdicts(&mut self, batch: &UploadBatch, verdicts: Vec<ServerVerdict>) -> ReconcileReport {
        let report = reconcile(&mut self.registry, batch, verdicts);
        info!(
            matched = report.matched(),
            gaps = report.gaps.len(),
            "Upload finished"
        );

        let level = if report.matched() == 0 {
            NoticeLevel::Warning
        } else {
            NoticeLevel::Success
        };
        self.notify(level, format!("Uploaded {} file(s)", report.matched()));
        for id in &report.failed {
            if let Some(file) = self.registry.get(id) {
                let message = format!(
                    "{}: {}",
                    file.name(),
                    file.error.as_deref().unwrap_or("Processing failed")
                );
                self.notify(NoticeLevel::Error, message);
            }
        }
        if !report.gaps.is_empty() {
            self.notify(
                NoticeLevel::Warning,
                format!("{} file(s) received no result from the server", report.gaps.len()),
            );
        }
        report
    }

    fn fail_batch(&mut self, batch: &UploadBatch, e: &TransportError) {
        let message = e.to_string();
        let failed = fail_uploading(&mut self.registry, batch, &message);
        error!(status = e.status(), files = failed.len(), error = %message, "Upload failed");
        self.last_error = Some(message.clone());
        self.notify(NoticeLevel::Error, message);
    }

    fn notify(&mut self, level: NoticeLevel, message: String) {
        self.next_notice += 1;
        self.notices.push(Notice {
            id: self.next_notice,
            level,
            message,
        });
    }
}
