use super::error::SessionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Fixed key the session token is stored under.
pub const SESSION_KEY: &str = "platinum_session_id";

/// Persisted session entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// Durable key/value storage for client state, one JSON file per key.
pub struct SessionStorage {
    base_dir: PathBuf,
}

impl SessionStorage {
    pub fn new(base_dir: &str) -> Self {
        let expanded = shellexpand::tilde(base_dir).to_string();
        Self {
            base_dir: PathBuf::from(expanded),
        }
    }

    pub fn with_path(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Path of the session entry.
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.json", SESSION_KEY))
    }

    /// Read the stored session, `None` when nothing was persisted yet.
    pub async fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        match fs::read_to_string(self.path()).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    /// Persist the session entry (write to temp file, then rename).
    pub async fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        fs::create_dir_all(&self.base_dir).await?;

        let path = self.path();
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}
