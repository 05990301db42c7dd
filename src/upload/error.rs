use thiserror::Error;

/// A zip container that could not be decoded.
#[derive(Debug, Error)]
#[error("Failed to extract archive {archive}: {source}")]
pub struct ArchiveError {
    pub archive: String,
    #[source]
    pub source: zip::result::ZipError,
}

/// Network/HTTP-level failure of a backend call.
///
/// `status()` follows the wire convention of the web client: `0` means no
/// response was received at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("{message}")]
    Connectivity {
        message: String,
        detail: Option<String>,
    },

    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        detail: Option<String>,
    },

    #[error("{message}")]
    Malformed {
        status: u16,
        message: String,
        detail: Option<String>,
    },

    #[error("Upload cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn status(&self) -> u16 {
        match self {
            Self::Connectivity { .. } | Self::Cancelled => 0,
            Self::Rejected { status, .. } | Self::Malformed { status, .. } => *status,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Connectivity { detail, .. }
            | Self::Rejected { detail, .. }
            | Self::Malformed { detail, .. } => detail.as_deref(),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Session token storage and registration errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session record is corrupted: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session registration failed: {0}")]
    Registration(#[source] TransportError),
}

/// Rejected registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("File {id} is uploading and cannot be removed")]
    RemoveWhileUploading { id: String },

    #[error("File {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: super::FileStatus,
        to: super::FileStatus,
    },
}

/// Errors surfaced by the orchestration engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No files to upload")]
    NothingToUpload,

    #[error("An upload is already in progress")]
    AlreadyUploading,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
