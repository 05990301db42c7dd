use super::error::RegistryError;
use super::extract::LeafFile;
use super::schema::{FileStatus, ServerVerdict};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// A submitted file and its client-side lifecycle.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    pub id: String,
    pub file: LeafFile,
    pub status: FileStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub result: Option<ServerVerdict>,
}

impl TrackedFile {
    fn new(id: String, file: LeafFile) -> Self {
        Self {
            id,
            file,
            status: FileStatus::Pending,
            progress: 0,
            error: None,
            result: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    fn transition(&mut self, next: FileStatus) -> Result<(), RegistryError> {
        if !self.status.can_transition_to(next) {
            return Err(RegistryError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// Payload snapshot of one file taken at submit time.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub id: String,
    pub file: LeafFile,
}

/// Ordered snapshot handed to the transport for one submit.
#[derive(Debug, Clone, Default)]
pub struct UploadBatch {
    pub entries: Vec<BatchEntry>,
}

impl UploadBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.file.size()).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }
}

/// Authoritative in-memory collection of tracked files.
///
/// All mutation goes through the methods below so status changes always
/// follow the forward-only lifecycle.
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: Vec<TrackedFile>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn files(&self) -> &[TrackedFile] {
        &self.files
    }

    pub fn get(&self, id: &str) -> Option<&TrackedFile> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    /// Append files as `pending` entries, returning the new ids in input order.
    pub fn add(&mut self, files: Vec<LeafFile>) -> Vec<String> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let id = Uuid::new_v4().to_string();
            ids.push(id.clone());
            self.files.push(TrackedFile::new(id, file));
        }
        debug!(added = ids.len(), total = self.files.len(), "Registry add");
        ids
    }

    /// Delete an entry. Unknown ids are a no-op and return `Ok(None)`.
    pub fn remove(&mut self, id: &str) -> Result<Option<TrackedFile>, RegistryError> {
        let Some(pos) = self.files.iter().position(|f| f.id == id) else {
            return Ok(None);
        };
        if self.files[pos].status == FileStatus::Uploading {
            return Err(RegistryError::RemoveWhileUploading { id: id.to_string() });
        }
        Ok(Some(self.files.remove(pos)))
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    /// Move every entry that may legally reach `status` there.
    /// Returns the ids that moved, in registry order.
    pub fn set_all_status(&mut self, status: FileStatus) -> Vec<String> {
        let mut moved = Vec::new();
        for file in &mut self.files {
            if file.transition(status).is_ok() {
                moved.push(file.id.clone());
            }
        }
        moved
    }

    /// Transition every `pending` entry to `uploading` and snapshot their
    /// payloads in registry order.
    pub fn begin_upload(&mut self) -> UploadBatch {
        let moved: HashSet<String> = self
            .set_all_status(FileStatus::Uploading)
            .into_iter()
            .collect();
        let entries = self
            .files
            .iter()
            .filter(|f| moved.contains(&f.id))
            .map(|f| BatchEntry {
                id: f.id.clone(),
                file: f.file.clone(),
            })
            .collect();
        UploadBatch { entries }
    }

    /// Record a verdict on an entry and move it to `status`. A verdict that
    /// repeats the current status only replaces the attached result.
    pub(crate) fn attach_verdict(
        &mut self,
        id: &str,
        status: FileStatus,
        verdict: ServerVerdict,
    ) -> Result<(), RegistryError> {
        let Some(file) = self.files.iter_mut().find(|f| f.id == id) else {
            return Ok(());
        };
        if file.status != status {
            file.transition(status)?;
        }
        file.progress = 100;
        if status == FileStatus::Error {
            file.error = Some(
                verdict
                    .error
                    .clone()
                    .unwrap_or_else(|| "Processing failed".to_string()),
            );
        }
        file.result = Some(verdict);
        Ok(())
    }

    /// Fail the entries of `batch` that are still uploading, all with the
    /// same message. Entries outside the batch are left alone.
    pub(crate) fn fail_batch(&mut self, batch: &UploadBatch, message: &str) -> Vec<String> {
        let mut failed = Vec::new();
        for file in self
            .files
            .iter_mut()
            .filter(|f| f.status == FileStatus::Uploading && batch.contains(&f.id))
        {
            if file.transition(FileStatus::Error).is_ok() {
                file.error = Some(message.to_string());
                failed.push(file.id.clone());
            }
        }
        failed
    }
}
