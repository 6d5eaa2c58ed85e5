use mongodb::Database;
use std::sync::Arc;
use voxrelay_config::Settings;
use voxrelay_services::{AuthService, DbWriteQueue, QuotaService};

use crate::ws::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub settings: Settings,
    pub auth: Arc<AuthService>,
    pub quota: Arc<QuotaService>,
    pub write_queue: Arc<DbWriteQueue>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(db: Database, settings: Settings) -> Self {
        let auth = Arc::new(AuthService::new(settings.auth.clone()));
        let quota = Arc::new(QuotaService::new(&db));
        let write_queue = DbWriteQueue::new(db.clone());
        let sessions = Arc::new(SessionRegistry::new());

        Self {
            db,
            settings,
            auth,
            quota,
            write_queue,
            sessions,
        }
    }
}
