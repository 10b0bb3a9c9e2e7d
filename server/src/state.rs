use std::path::PathBuf;
use std::sync::Arc;

use crate::store::SqliteStore;
use crate::worker::WorkerPool;

/// Shared, immutable application state. All per-request state lives in the
/// request task; nothing here changes after startup.
pub struct AppState {
    pub store: SqliteStore,
    pub workers: Arc<WorkerPool>,
    pub upload_dir: PathBuf,
}
