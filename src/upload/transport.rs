use super::error::TransportError;
use super::registry::UploadBatch;
use super::schema::{SessionData, ServerVerdict, UploadProgress};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receiving end of a transfer's progress events.
pub type ProgressSink = mpsc::UnboundedSender<UploadProgress>;

/// Backend operations the engine and session manager depend on.
///
/// `upload` sends every progress event before it returns, so once the
/// future resolves the progress stream is complete.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn upload(
        &self,
        session_id: &str,
        batch: &UploadBatch,
        progress: ProgressSink,
        cancel: CancellationToken,
    ) -> Result<Vec<ServerVerdict>, TransportError>;

    async fn create_session(&self, session_id: &str) -> Result<SessionData, TransportError>;

    async fn analysis_results(&self, session_id: &str) -> Result<Vec<ServerVerdict>, TransportError>;
}

/// Turns raw byte counts into a non-decreasing percentage stream.
pub(crate) struct ProgressTracker {
    loaded: u64,
    total: u64,
    last: Option<u8>,
    sink: ProgressSink,
}

impl ProgressTracker {
    pub(crate) fn new(total: u64, sink: ProgressSink) -> Self {
        Self {
            loaded: 0,
            total,
            last: None,
            sink,
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        self.loaded = (self.loaded + bytes).min(self.total);
        let event = UploadProgress::new(self.loaded, self.total);
        if self.last.is_none_or(|last| event.percentage > last) {
            self.emit(event);
        }
    }

    /// Report completion. Emits a final 100% event unless one was already sent.
    pub(crate) fn finish(&mut self) {
        self.loaded = self.total;
        if self.last != Some(100) {
            self.emit(UploadProgress::new(self.total, self.total));
        }
    }

    fn emit(&mut self, event: UploadProgress) {
        self.last = Some(event.percentage);
        // The receiver may have stopped listening; progress is advisory.
        let _ = self.sink.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::UnboundedReceiver<UploadProgress>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p.percentage);
        }
        out
    }

    #[test]
    fn emits_only_increasing_percentages() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = ProgressTracker::new(1000, tx);
        for _ in 0..100 {
            tracker.advance(1);
        }
        tracker.advance(500);
        tracker.advance(400);
        tracker.finish();

        let seen = drain(&mut rx);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn finish_reports_hundred_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = ProgressTracker::new(10, tx);
        tracker.advance(10);
        tracker.finish();
        assert_eq!(drain(&mut rx), vec![100]);
    }

    #[test]
    fn empty_batch_finishes_at_hundred() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = ProgressTracker::new(0, tx);
        tracker.finish();
        assert_eq!(drain(&mut rx), vec![100]);
    }
}
