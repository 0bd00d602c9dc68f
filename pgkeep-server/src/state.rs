use chrono::{DateTime, Utc};
use pgkeep::catalog::Catalog;
use pgkeep::scheduler::Scheduler;
use std::sync::Arc;

pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub catalog: Arc<Catalog>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>, catalog: Arc<Catalog>) -> Self {
        Self {
            scheduler,
            catalog,
            started_at: Utc::now(),
        }
    }
}
