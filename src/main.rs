use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use analyst_orchestrator::config::Config;
use analyst_orchestrator::db::Database;
use analyst_orchestrator::http::{self, AppState};
use analyst_orchestrator::job_manager::JobManager;
use analyst_orchestrator::llm::LlmClient;
use analyst_orchestrator::registries::Registries;
use analyst_orchestrator::workflow_runner::WorkflowRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    init_logging(&config);
    config.ensure_directories()?;

    let db_backend = config.database_backend()?;
    let analyst_orchestrator::config::DatabaseBackend::Sqlite(db_path) = db_backend;
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);

    let registries = Arc::new(
        Registries::load(&config.catalog_dir).context("failed to load engine/stance/chain/view catalog")?,
    );
    for warning in registries.validate_references() {
        tracing::warn!(?warning, "catalog reference warning at startup");
    }

    let api_key = config.anthropic_api_key.clone().unwrap_or_default();
    let llm = Arc::new(LlmClient::new(api_key, config.anthropic_base_url.clone())?);
    let job_manager = Arc::new(JobManager::new(Arc::clone(&db)));
    let config = Arc::new(config);

    let resumable = job_manager.recover_all_orphans().context("orphan recovery scan failed")?;
    for job in resumable {
        tracing::info!(job_id = %job.job_id, "resuming orphaned job");
        if let Some(plan) = job.plan_snapshot.clone() {
            resume_job(&db, &registries, &llm, &job_manager, &config, job.job_id.clone(), plan);
        } else {
            tracing::warn!(job_id = %job.job_id, "orphan has no plan snapshot to resume, needs replanning via the API");
        }
    }

    let state = Arc::new(AppState {
        db,
        registries,
        llm,
        job_manager,
        config: Arc::clone(&config),
    });

    let app = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "analyst-orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn resume_job(
    db: &Arc<Database>,
    registries: &Arc<Registries>,
    llm: &Arc<LlmClient>,
    job_manager: &Arc<JobManager>,
    config: &Arc<Config>,
    job_id: String,
    plan: analyst_common::plan::WorkflowExecutionPlan,
) {
    let db = Arc::clone(db);
    let registries = Arc::clone(registries);
    let llm = Arc::clone(llm);
    let job_manager = Arc::clone(job_manager);
    let config = Arc::clone(config);

    tokio::spawn(async move {
        let document_ids: Vec<String> = match job_manager.get_job(&job_id) {
            Ok(job) => job
                .document_ids
                .iter()
                .filter(|(k, _)| *k != "__dedupe_key")
                .map(|(_, v)| v.clone())
                .collect(),
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "failed to reload resumed job");
                return;
            }
        };
        let documents = match db.get_documents(&document_ids) {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "failed to load documents for resumed job");
                let _ = job_manager.mark_failed(&job_id, &err.to_string());
                return;
            }
        };

        let runner = WorkflowRunner::new(
            &registries,
            &llm,
            &db,
            config.dependency_group_concurrency,
            config.per_work_concurrency,
        );
        match runner.run(&job_id, &plan, &documents).await {
            Ok(()) => {
                let _ = job_manager.mark_completed(&job_id);
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "resumed job failed");
                let _ = job_manager.mark_failed(&job_id, &err.to_string());
            }
        }
    });
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    tracing::info!("shutting down");
}
