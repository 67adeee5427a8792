//! Shared process state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cormorant_catalog::Catalog;
use cormorant_storage::{StorageLayout, StorageManager, TableLockRegistry};
use parking_lot::Mutex;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::AppError;
use cormorant_protocol::ApiError;

/// Pending staged upload, held in memory until finalized or expired.
///
/// Process-local by design: entries are expired lazily on lookup and
/// removed on successful finalization.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub project_id: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub expected_size: Option<i64>,
    pub tags: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set once the bytes have landed in staging.
    pub staged_path: Option<PathBuf>,
    pub staged_size: Option<i64>,
    pub staged_checksum: Option<String>,
}

/// Process-wide application state shared by every handler.
pub struct App {
    pub config: Config,
    pub storage: StorageManager,
    pub dispatcher: Dispatcher,
    pub uploads: Mutex<HashMap<String, UploadSession>>,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let layout = StorageLayout::new(
            config.data_dir.clone(),
            config.snapshots_dir.clone(),
            config.files_dir.clone(),
        );
        let catalog = Arc::new(Catalog::open(&layout.catalog_path())?);
        let locks = Arc::new(TableLockRegistry::new());
        let storage = StorageManager::new(layout, catalog, locks, config.engine_options());
        storage.init_backend()?;

        Ok(Arc::new(Self {
            config,
            storage,
            dispatcher: Dispatcher::new(),
            uploads: Mutex::new(HashMap::new()),
        }))
    }

    pub fn catalog(&self) -> &Catalog {
        self.storage.catalog()
    }

    /// Fetch an upload session, expiring it lazily when stale.
    pub fn upload_session_if_valid(&self, upload_key: &str) -> Option<UploadSession> {
        let mut uploads = self.uploads.lock();
        match uploads.get(upload_key) {
            None => None,
            Some(session) if session.expires_at <= Utc::now() => {
                uploads.remove(upload_key);
                None
            }
            Some(session) => Some(session.clone()),
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish()
    }
}

/// Run synchronous core work off the async runtime.
pub async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|err| AppError::from(ApiError::internal(format!("blocking task failed: {err}"))))?
}
