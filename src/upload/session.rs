use super::error::SessionError;
use super::schema::SessionData;
use super::storage::{SessionStorage, StoredSession};
use super::transport::Backend;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

const SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque, client-generated session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// `session_<unix millis>_<random base36>`.
    pub fn generate() -> Self {
        let mut bits = rand::random::<u64>();
        let mut suffix = String::with_capacity(SUFFIX_LEN);
        for _ in 0..SUFFIX_LEN {
            suffix.push(BASE36[(bits % 36) as usize] as char);
            bits /= 36;
        }
        Self(format!("session_{}_{}", Utc::now().timestamp_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owns the persisted session token and its backend registration.
pub struct SessionManager {
    storage: SessionStorage,
    backend: Arc<dyn Backend>,
    token: Option<SessionToken>,
    registered: bool,
}

impl SessionManager {
    pub fn new(storage: SessionStorage, backend: Arc<dyn Backend>) -> Self {
        Self {
            storage,
            backend,
            token: None,
            registered: false,
        }
    }

    /// Return the persisted token, generating and persisting one if absent.
    pub async fn ensure_session(&mut self) -> Result<SessionToken, SessionError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }

        let token = match self.storage.load().await? {
            Some(stored) => SessionToken(stored.session_id),
            None => {
                let token = SessionToken::generate();
                self.storage
                    .save(&StoredSession {
                        session_id: token.as_str().to_string(),
                        created_at: Utc::now(),
                    })
                    .await?;
                info!(session = %token, "Created new session");
                token
            }
        };
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Register `token` with the backend. The endpoint is idempotent, so a
    /// failed attempt is simply retried by the next call.
    pub async fn register_session(&mut self, token: &SessionToken) -> Result<SessionData, SessionError> {
        match self.backend.create_session(token.as_str()).await {
            Ok(data) => {
                self.registered = true;
                info!(session = %token, "Session registered");
                Ok(data)
            }
            Err(e) => {
                warn!(session = %token, error = %e, "Session registration failed");
                Err(SessionError::Registration(e))
            }
        }
    }

    /// Ensure a token exists and register it unless that already succeeded
    /// during this manager's lifetime. Registration failure is returned
    /// alongside the still-usable token.
    pub async fn ensure_registered(
        &mut self,
    ) -> Result<(SessionToken, Option<SessionError>), SessionError> {
        let token = self.ensure_session().await?;
        if self.registered {
            return Ok((token, None));
        }
        let failure = self.register_session(&token).await.err();
        Ok((token, failure))
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::error::TransportError;
    use crate::upload::registry::UploadBatch;
    use crate::upload::schema::ServerVerdict;
    use crate::upload::transport::ProgressSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    /// Fails the first `failures` registrations, then succeeds.
    struct FlakyBackend {
        failures: Mutex<usize>,
        calls: Mutex<usize>,
    }

    impl FlakyBackend {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl Backend for FlakyBackend {
        async fn upload(
            &self,
            _session_id: &str,
            _batch: &UploadBatch,
            _progress: ProgressSink,
            _cancel: CancellationToken,
        ) -> Result<Vec<ServerVerdict>, TransportError> {
            Ok(Vec::new())
        }

        async fn create_session(&self, session_id: &str) -> Result<SessionData, TransportError> {
            *self.calls.lock() += 1;
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Connectivity {
                    message: "Network error. Please check your connection.".into(),
                    detail: None,
                });
            }
            Ok(SessionData {
                session_id: session_id.to_string(),
                created_at: "2026-01-01T00:00:00".into(),
                last_active: "2026-01-01T00:00:00".into(),
            })
        }

        async fn analysis_results(&self, _session_id: &str) -> Result<Vec<ServerVerdict>, TransportError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn generated_tokens_have_expected_shape() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);

        let parts: Vec<_> = a.as_str().splitn(3, '_').collect();
        assert_eq!(parts[0], "session");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), SUFFIX_LEN);
    }

    #[tokio::test]
    async fn ensure_session_is_stable_and_persisted() {
        let temp = tempdir().unwrap();
        let backend = FlakyBackend::new(0);

        let mut first = SessionManager::new(SessionStorage::with_path(temp.path().into()), backend.clone());
        let a = first.ensure_session().await.unwrap();
        let b = first.ensure_session().await.unwrap();
        assert_eq!(a, b);

        let mut second = SessionManager::new(SessionStorage::with_path(temp.path().into()), backend);
        assert_eq!(second.ensure_session().await.unwrap(), a);
    }

    #[tokio::test]
    async fn failed_registration_is_non_fatal_and_retried() {
        let temp = tempdir().unwrap();
        let backend = FlakyBackend::new(1);
        let mut manager = SessionManager::new(SessionStorage::with_path(temp.path().into()), backend.clone());

        let (token, failure) = manager.ensure_registered().await.unwrap();
        assert!(matches!(failure, Some(SessionError::Registration(_))));
        assert!(!manager.is_registered());

        let (again, failure) = manager.ensure_registered().await.unwrap();
        assert_eq!(again, token);
        assert!(failure.is_none());
        assert!(manager.is_registered());

        manager.ensure_registered().await.unwrap();
        assert_eq!(*backend.calls.lock(), 2);
    }
}
