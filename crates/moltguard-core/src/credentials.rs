//! Credential resolution for the detection service.
//!
//! Resolution order: configured key, persisted credentials file,
//! auto-registration. Registration happens at most once per process
//! lifetime, even under concurrent authentication failures.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::GuardConfig;
use crate::error::{GuardError, Result};

/// Resolution state, transitioned only by the resolver itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// No resolution attempt has happened yet.
    Unresolved,
    /// Registration request is in flight.
    Registering,
    /// A key is available (configured, loaded, or freshly registered).
    Resolved,
    /// No key could be obtained; analyses will fail authentication.
    Failed,
}

/// Persisted credentials file contents.
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(rename = "apiKey")]
    api_key: String,
}

#[derive(Debug)]
struct ResolverInner {
    state: CredentialState,
    key: Option<String>,
    /// Set the moment a registration is attempted, success or not.
    registration_attempted: bool,
    /// Failure is logged once, not on every analysis.
    failure_logged: bool,
}

/// Resolves and persists the detection-service API key.
pub struct CredentialResolver {
    api_base_url: String,
    configured_key: Option<String>,
    auto_register: bool,
    path: PathBuf,
    http: reqwest::Client,
    inner: Mutex<ResolverInner>,
}

impl CredentialResolver {
    /// Creates a resolver using the default credentials file location.
    pub fn new(config: &GuardConfig) -> Result<Self> {
        Ok(Self::with_path(config, Self::default_credentials_path()?))
    }

    /// Creates a resolver with an explicit credentials file path.
    pub fn with_path(config: &GuardConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            configured_key: config.api_key.clone(),
            auto_register: config.auto_register,
            path: path.into(),
            http: reqwest::Client::new(),
            inner: Mutex::new(ResolverInner {
                state: CredentialState::Unresolved,
                key: None,
                registration_attempted: false,
                failure_logged: false,
            }),
        }
    }

    /// Default credentials file path under the app data directory.
    pub fn default_credentials_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "moltguard", "moltguard").ok_or_else(|| {
            GuardError::Credential("could not determine app data directory".to_string())
        })?;
        Ok(dirs.data_dir().join("credentials.json"))
    }

    /// Current resolution state.
    pub async fn state(&self) -> CredentialState {
        self.inner.lock().await.state
    }

    /// Returns the API key, resolving it on first use.
    ///
    /// `None` means resolution failed; detection calls will be rejected by
    /// the service and callers fail open.
    pub async fn resolve(&self) -> Option<String> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CredentialState::Resolved => return inner.key.clone(),
            CredentialState::Failed => return None,
            CredentialState::Unresolved | CredentialState::Registering => {}
        }

        if let Some(key) = &self.configured_key {
            inner.state = CredentialState::Resolved;
            inner.key = Some(key.clone());
            return inner.key.clone();
        }

        if let Some(key) = self.load_from_file() {
            info!("Loaded API key from credentials file");
            inner.state = CredentialState::Resolved;
            inner.key = Some(key);
            return inner.key.clone();
        }

        if self.auto_register && !inner.registration_attempted {
            return self.register_locked(&mut inner).await;
        }

        if !inner.failure_logged {
            warn!("No API key configured and auto-registration is disabled; analyses will fail until a key is set");
            inner.failure_logged = true;
        }
        inner.state = CredentialState::Failed;
        None
    }

    /// Handles an authentication rejection from the detection service.
    ///
    /// `rejected` is the key the failed request carried. If another task has
    /// already replaced it, the replacement is returned directly. Otherwise
    /// the key is discarded and, when auto-registration is enabled and has
    /// not been attempted this process lifetime, one registration is made
    /// and the fresh key returned. A revoked persisted key is treated the
    /// same as a first run.
    pub async fn reauthorize(&self, rejected: Option<&str>) -> Option<String> {
        let mut inner = self.inner.lock().await;

        if inner.key.as_deref() != rejected {
            if let Some(current) = &inner.key {
                return Some(current.clone());
            }
        }
        inner.key = None;

        if self.auto_register && !inner.registration_attempted {
            return self.register_locked(&mut inner).await;
        }

        if !inner.failure_logged {
            warn!("Detection service rejected the API key and no registration attempt remains");
            inner.failure_logged = true;
        }
        inner.state = CredentialState::Failed;
        None
    }

    /// Registers with the service and persists the returned key. Must be
    /// called with the inner lock held; sets `registration_attempted`
    /// before any await so concurrent callers never double-register.
    async fn register_locked(&self, inner: &mut ResolverInner) -> Option<String> {
        inner.registration_attempted = true;
        inner.state = CredentialState::Registering;

        match self.register().await {
            Ok(key) => {
                info!("Auto-registered with detection service");
                if let Err(e) = self.persist(&key) {
                    warn!("Failed to persist credentials: {}", e);
                }
                inner.state = CredentialState::Resolved;
                inner.key = Some(key.clone());
                Some(key)
            }
            Err(e) => {
                warn!("Auto-registration failed: {}", e);
                inner.state = CredentialState::Failed;
                inner.failure_logged = true;
                None
            }
        }
    }

    /// Calls the registration endpoint with no credentials.
    async fn register(&self) -> Result<String> {
        let url = format!("{}/v1/register", self.api_base_url);
        let response = self.http.post(&url).json(&serde_json::json!({})).send().await?;

        if !response.status().is_success() {
            return Err(GuardError::Registration(format!(
                "registration endpoint returned {}",
                response.status()
            )));
        }

        let stored: StoredCredentials = response.json().await?;
        Ok(stored.api_key)
    }

    fn load_from_file(&self) -> Option<String> {
        let data = std::fs::read_to_string(&self.path).ok()?;
        let stored: StoredCredentials = serde_json::from_str(&data).ok()?;
        if stored.api_key.is_empty() {
            None
        } else {
            Some(stored.api_key)
        }
    }

    /// Writes the credentials file atomically: temp file, then rename.
    fn persist(&self, key: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let stored = StoredCredentials {
            api_key: key.to_string(),
        };
        let tmp = temp_path(&self.path);
        std::fs::write(&tmp, serde_json::to_string_pretty(&stored)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn config_with(base_url: &str) -> GuardConfig {
        GuardConfig::default().with_api_base_url(base_url)
    }

    /// Minimal registration stub returning `{"apiKey": ...}` and counting calls.
    async fn spawn_registration_stub(counter: Arc<AtomicUsize>) -> String {
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/v1/register",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    axum::Json(serde_json::json!({"apiKey": "mg_fresh_key"}))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn configured_key_resolves_directly() {
        let dir = TempDir::new().unwrap();
        let config = config_with("http://127.0.0.1:9").with_api_key("mg_configured");
        let resolver = CredentialResolver::with_path(&config, dir.path().join("credentials.json"));

        assert_eq!(resolver.resolve().await.as_deref(), Some("mg_configured"));
        assert_eq!(resolver.state().await, CredentialState::Resolved);
    }

    #[tokio::test]
    async fn persisted_key_is_loaded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, r#"{"apiKey": "mg_saved"}"#).unwrap();

        let config = config_with("http://127.0.0.1:9").with_auto_register(false);
        let resolver = CredentialResolver::with_path(&config, &path);

        assert_eq!(resolver.resolve().await.as_deref(), Some("mg_saved"));
    }

    #[tokio::test]
    async fn missing_key_without_auto_register_fails() {
        let dir = TempDir::new().unwrap();
        let config = config_with("http://127.0.0.1:9").with_auto_register(false);
        let resolver = CredentialResolver::with_path(&config, dir.path().join("credentials.json"));

        assert!(resolver.resolve().await.is_none());
        assert_eq!(resolver.state().await, CredentialState::Failed);
    }

    #[tokio::test]
    async fn auto_registration_persists_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let base_url = spawn_registration_stub(counter.clone()).await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("credentials.json");
        let resolver = CredentialResolver::with_path(&config_with(&base_url), &path);

        assert_eq!(resolver.resolve().await.as_deref(), Some("mg_fresh_key"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("mg_fresh_key"));
        // No stray temp file after the atomic rename.
        assert!(!dir.path().join("credentials.json.tmp").exists());
    }

    #[tokio::test]
    async fn concurrent_reauthorize_registers_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let base_url = spawn_registration_stub(counter.clone()).await;

        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(CredentialResolver::with_path(
            &config_with(&base_url),
            dir.path().join("credentials.json"),
        ));

        let (a, b) = tokio::join!(resolver.reauthorize(None), resolver.reauthorize(None));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // One caller registers; the other picks up the replacement key.
        assert_eq!(a.as_deref(), Some("mg_fresh_key"));
        assert_eq!(b.as_deref(), Some("mg_fresh_key"));
    }

    #[tokio::test]
    async fn registration_attempted_at_most_once_even_after_failure() {
        // Point at a closed port: registration fails, and no second attempt
        // is made on the next auth failure.
        let dir = TempDir::new().unwrap();
        let resolver = CredentialResolver::with_path(
            &config_with("http://127.0.0.1:1"),
            dir.path().join("credentials.json"),
        );

        assert!(resolver.reauthorize(None).await.is_none());
        assert_eq!(resolver.state().await, CredentialState::Failed);
        assert!(resolver.reauthorize(None).await.is_none());
    }
}
