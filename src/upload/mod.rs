//! Upload & session orchestration
//!
//! Expands selected files (including zip archives), tracks each file through
//! its upload lifecycle, sends the batch to the analysis backend in one
//! multipart transfer and reconciles the returned verdicts.

pub mod client;
pub mod engine;
pub mod error;
pub mod extract;
pub mod reconcile;
pub mod registry;
pub mod schema;
pub mod session;
pub mod storage;
pub mod transport;

pub use client::ApiClient;
pub use engine::{AddOutcome, Notice, NoticeLevel, UploadEngine};
pub use error::{ArchiveError, EngineError, RegistryError, SessionError, TransportError};
pub use extract::{expand, expand_all, LeafFile};
pub use registry::{FileRegistry, TrackedFile, UploadBatch};
pub use schema::{FileStatus, ServerVerdict, UploadProgress, VerdictStatus};
pub use session::{SessionManager, SessionToken};
pub use storage::SessionStorage;
pub use transport::Backend;
