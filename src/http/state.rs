use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::job_manager::JobManager;
use crate::llm::LlmClient;
use crate::registries::Registries;

/// Shared application state handed to every route. Each field is its own
/// `Arc` rather than one `Arc<AppState>` field-by-field clone, so a
/// background job task can hold only what it needs.
pub struct AppState {
    pub db: Arc<Database>,
    pub registries: Arc<Registries>,
    pub llm: Arc<LlmClient>,
    pub job_manager: Arc<JobManager>,
    pub config: Arc<Config>,
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::registries::CatalogFile;
    use clap::Parser;

    pub fn in_memory_state() -> SharedState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registries = Arc::new(Registries::from_catalog(CatalogFile::default()));
        let llm = Arc::new(LlmClient::new("test-key", "http://localhost:0").unwrap());
        let job_manager = Arc::new(JobManager::new(Arc::clone(&db)));
        let config = Arc::new(Config::parse_from(["analyst-orchestrator"]));
        Arc::new(AppState { db, registries, llm, job_manager, config })
    }
}
