use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;

use crate::config::{Config, DatabaseConfig};
use crate::db::Database;
use crate::error::SchemaHealError;
use crate::reconcile::{MigrationResult, Reconciler, ValidationReport};
use crate::schema;

/// Whether the startup reconciliation has finished.
#[derive(Clone)]
pub struct ReadyFlag(pub Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new(ready: bool) -> Self {
        Self(Arc::new(AtomicBool::new(ready)))
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_ready(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Shared between the background reconciliation and the HTTP handlers.
#[derive(Clone)]
pub struct SchemaStatus {
    ready: ReadyFlag,
    last: Arc<RwLock<Option<MigrationResult>>>,
    database: DatabaseConfig,
}

impl SchemaStatus {
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            ready: ReadyFlag::new(false),
            last: Arc::new(RwLock::new(None)),
            database,
        }
    }

    /// Store a finished run and flip the ready flag.
    pub fn finish(&self, result: MigrationResult) {
        match self.last.write() {
            Ok(mut last) => *last = Some(result),
            Err(poisoned) => *poisoned.into_inner() = Some(result),
        }
        self.ready.set_ready();
    }

    pub fn last_result(&self) -> Option<MigrationResult> {
        match self.last.read() {
            Ok(last) => last.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn health(&self) -> &'static str {
        if !self.ready.is_ready() {
            return "migrating";
        }
        match self.last_result() {
            Some(result) if result.success => "ok",
            _ => "degraded",
        }
    }
}

/// One reconciliation against the configured database on a fresh connection.
///
/// A database that cannot be opened is reported the same way as an unreadable
/// catalog.
pub fn reconcile_database(database: &DatabaseConfig, interrupt: Arc<AtomicBool>) -> MigrationResult {
    let db = match Database::open(Path::new(&database.path), database.busy_timeout()) {
        Ok(db) => db,
        Err(e) => {
            error!("Unable to open database for reconciliation: {}", e);
            return MigrationResult::catalog_unavailable(&e.to_string());
        }
    };

    Reconciler::new(schema::builtin())
        .with_interrupt(interrupt)
        .reconcile(&db)
}

/// Run the reconciliation off the async runtime, bounded by `timeout`.
///
/// When the bound is hit the interrupt flag is raised and the run is awaited
/// until it stops at the next step boundary.
pub async fn run_startup_reconcile(status: SchemaStatus, timeout: Duration) {
    let interrupt = Arc::new(AtomicBool::new(false));
    let task_interrupt = Arc::clone(&interrupt);
    let database = status.database.clone();

    let mut handle =
        tokio::task::spawn_blocking(move || reconcile_database(&database, task_interrupt));

    let joined = match tokio::time::timeout(timeout, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(
                "Schema reconciliation exceeded {}s, interrupting",
                timeout.as_secs()
            );
            interrupt.store(true, Ordering::Release);
            handle.await
        }
    };

    let result = joined.unwrap_or_else(|e| {
        error!("Schema reconciliation task failed: {}", e);
        MigrationResult::catalog_unavailable(&format!("reconciliation task failed: {}", e))
    });

    if result.success {
        info!("Startup schema reconciliation finished: {}", result.outcome);
    } else {
        warn!(
            "Startup schema reconciliation finished: {}\n{}",
            result.outcome, result.report_text
        );
    }
    status.finish(result);
}

pub struct WebServer {
    config: Config,
}

impl WebServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn start(&self) -> Result<(), SchemaHealError> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| SchemaHealError::Error(format!("Invalid address: {}", e)))?;

        // Bind before reconciling so health checks see "migrating" instead of a refused connection
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SchemaHealError::Error(format!("Failed to bind to {}: {}", addr, e)))?;

        let status = SchemaStatus::new(self.config.database.clone());
        tokio::spawn(run_startup_reconcile(
            status.clone(),
            self.config.reconcile.timeout(),
        ));

        let app = create_router(status);

        info!("Server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| SchemaHealError::Error(format!("Server error: {}", e)))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

pub fn create_router(status: SchemaStatus) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/schema/status", get(schema_status))
        .route("/api/schema/validate", get(schema_validate))
        .with_state(status)
}

async fn health_check(State(status): State<SchemaStatus>) -> (StatusCode, &'static str) {
    (StatusCode::OK, status.health())
}

async fn schema_status(State(status): State<SchemaStatus>) -> Response {
    match status.last_result() {
        Some(result) => Json(result).into_response(),
        None => (StatusCode::NOT_FOUND, "reconciliation has not finished").into_response(),
    }
}

async fn schema_validate(State(status): State<SchemaStatus>) -> Response {
    let database = status.database.clone();
    let validated = tokio::task::spawn_blocking(move || -> Result<ValidationReport, SchemaHealError> {
        let db = Database::open(Path::new(&database.path), database.busy_timeout())?;
        Reconciler::new(schema::builtin()).validate(&db)
    })
    .await;

    match validated {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(e)) => {
            error!("Schema validation failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::RunOutcome;
    use tempfile::TempDir;

    fn temp_database(dir: &TempDir) -> DatabaseConfig {
        DatabaseConfig {
            path: dir.path().join("app.db").to_string_lossy().into_owned(),
            busy_timeout_ms: 5000,
        }
    }

    #[test]
    fn test_ready_flag() {
        let flag = ReadyFlag::new(false);
        let shared = flag.clone();
        assert!(!shared.is_ready());
        flag.set_ready();
        assert!(shared.is_ready());
    }

    #[tokio::test]
    async fn test_health_reports_migrating_then_result() {
        let dir = TempDir::new().unwrap();
        let status = SchemaStatus::new(temp_database(&dir));

        let (code, body) = health_check(State(status.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "migrating");

        status.finish(MigrationResult::from_tables(Vec::new(), false));
        assert_eq!(health_check(State(status.clone())).await.1, "ok");

        status.finish(MigrationResult::catalog_unavailable("offline"));
        assert_eq!(health_check(State(status)).await.1, "degraded");
    }

    #[tokio::test]
    async fn test_status_is_404_before_first_run() {
        let dir = TempDir::new().unwrap();
        let status = SchemaStatus::new(temp_database(&dir));
        let response = schema_status(State(status)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_startup_reconcile_heals_and_flips_ready() {
        let dir = TempDir::new().unwrap();
        let database = temp_database(&dir);
        {
            let db = Database::open(Path::new(&database.path), database.busy_timeout()).unwrap();
            schema::create_missing_tables(&db, schema::builtin()).unwrap();
            db.conn()
                .execute_batch("CREATE TABLE legacy (x INTEGER);")
                .unwrap();
        }

        let status = SchemaStatus::new(database);
        run_startup_reconcile(status.clone(), Duration::from_secs(30)).await;

        assert!(status.ready.is_ready());
        let result = status.last_result().unwrap();
        assert_eq!(result.outcome, RunOutcome::Success);
        assert!(result.added.is_empty());

        let response = schema_status(State(status.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = schema_validate(State(status)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unopenable_database_is_degraded() {
        let dir = TempDir::new().unwrap();
        let status = SchemaStatus::new(DatabaseConfig {
            path: dir
                .path()
                .join("missing")
                .join("app.db")
                .to_string_lossy()
                .into_owned(),
            busy_timeout_ms: 5000,
        });

        run_startup_reconcile(status.clone(), Duration::from_secs(30)).await;

        let result = status.last_result().unwrap();
        assert_eq!(result.outcome, RunOutcome::Failed);
        assert_eq!(health_check(State(status.clone())).await.1, "degraded");

        let response = schema_validate(State(status)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_reconcile_database_adds_missing_column() {
        let dir = TempDir::new().unwrap();
        let database = temp_database(&dir);
        {
            let db = Database::open(Path::new(&database.path), database.busy_timeout()).unwrap();
            db.conn()
                .execute_batch("CREATE TABLE notes (id INTEGER PRIMARY KEY, client_id INTEGER NOT NULL);")
                .unwrap();
        }

        let result = reconcile_database(&database, Arc::new(AtomicBool::new(false)));
        assert!(result
            .added
            .contains(&("notes".to_string(), "content".to_string())));
        assert!(result
            .added
            .contains(&("notes".to_string(), "created_at".to_string())));
        // The other six tables are missing, which is a warning, not a failure
        assert_eq!(result.outcome, RunOutcome::Success);
    }
}
