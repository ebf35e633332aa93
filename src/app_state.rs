use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::services::process::ProcessSupervisor;
use crate::services::templates::TemplateRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub templates: Arc<TemplateRegistry>,
    pub supervisor: ProcessSupervisor,
    /// SIGTERM-to-SIGKILL grace used by the cancel endpoint.
    pub cancel_grace: Duration,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        templates: Arc<TemplateRegistry>,
        supervisor: ProcessSupervisor,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            db,
            templates,
            supervisor,
            cancel_grace,
        }
    }
}
