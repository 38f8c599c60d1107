// Reappointment Trends - Web Server
// Read-only JSON API over the SQLite run store

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use reappointment_trends::{
    get_annual_proportions, get_latest_run, get_org_history, get_org_year_stats, get_run,
    get_trend, get_yearly_maxima, list_runs, open_database, RunRecord,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }

    fn fail(status: StatusCode, message: String) -> Response {
        (
            status,
            Json(Self {
                success: false,
                data: None,
                error: Some(message),
            }),
        )
            .into_response()
    }
}

/// `?run=<uuid>` selects a run; default is the latest
#[derive(Debug, Deserialize)]
struct RunQuery {
    run: Option<String>,
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Connection>, Response> {
    state.db.lock().map_err(|_| {
        ApiResponse::<()>::fail(StatusCode::INTERNAL_SERVER_ERROR, "database lock poisoned".to_string())
    })
}

/// Resolve the requested run (or the latest one)
fn resolve_run(conn: &Connection, query: &RunQuery) -> Result<RunRecord, Response> {
    let found = match &query.run {
        Some(id) => get_run(conn, id),
        None => get_latest_run(conn),
    };

    match found {
        Ok(Some(run)) => Ok(run),
        Ok(None) => Err(ApiResponse::<()>::fail(
            StatusCode::NOT_FOUND,
            "no matching analysis run".to_string(),
        )),
        Err(e) => {
            eprintln!("Error resolving run: {}", e);
            Err(ApiResponse::<()>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// Run a query against the selected run and wrap the result
fn with_run<T, F>(state: &AppState, query: &RunQuery, fetch: F) -> Response
where
    T: Serialize,
    F: FnOnce(&Connection, &RunRecord) -> anyhow::Result<T>,
{
    let conn = match lock(state) {
        Ok(conn) => conn,
        Err(response) => return response,
    };

    let run = match resolve_run(&*conn, query) {
        Ok(run) => run,
        Err(response) => return response,
    };

    match fetch(&*conn, &run) {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            eprintln!("Error querying run {}: {}", run.run_id, e);
            ApiResponse::<T>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    ApiResponse::ok("OK")
}

/// GET /api/runs - All stored runs, newest first
async fn get_runs(State(state): State<AppState>) -> impl IntoResponse {
    let conn = match lock(&state) {
        Ok(conn) => conn,
        Err(response) => return response,
    };

    match list_runs(&conn) {
        Ok(runs) => ApiResponse::ok(runs),
        Err(e) => {
            eprintln!("Error listing runs: {}", e);
            ApiResponse::<Vec<RunRecord>>::fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /api/annual - Annual proportions
async fn get_annual(State(state): State<AppState>, Query(query): Query<RunQuery>) -> impl IntoResponse {
    with_run(&state, &query, |conn, run| get_annual_proportions(conn, &run.run_id))
}

/// GET /api/org-year - Org-year table
async fn get_org_year(State(state): State<AppState>, Query(query): Query<RunQuery>) -> impl IntoResponse {
    with_run(&state, &query, |conn, run| get_org_year_stats(conn, &run.run_id))
}

/// GET /api/maxima - Top organization per year
async fn get_maxima(State(state): State<AppState>, Query(query): Query<RunQuery>) -> impl IntoResponse {
    with_run(&state, &query, |conn, run| get_yearly_maxima(conn, &run.run_id))
}

/// GET /api/trend - Trend model (null data if the run's fit failed)
async fn get_trend_model(State(state): State<AppState>, Query(query): Query<RunQuery>) -> impl IntoResponse {
    with_run(&state, &query, |conn, run| get_trend(conn, &run.run_id))
}

/// GET /api/organizations/:name - One organization's history
async fn get_organization(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunQuery>,
) -> impl IntoResponse {
    // Path already percent-decodes; a literal '%' in the name must survive
    with_run(&state, &query, |conn, run| get_org_history(conn, &run.run_id, &name))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("🌐 Reappointment Trends - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("REAPPOINTMENT_DB").unwrap_or_else(|_| "reappointments.db".to_string());
    let db_path = std::path::Path::new(&db_path);

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: reappointment-trends analyze --input <PATH> --db {}", db_path.display());
        eprintln!("   to store an analysis run first.");
        std::process::exit(1);
    }

    let conn = match open_database(db_path) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("❌ Failed to open database: {:#}", e);
            std::process::exit(1);
        }
    };
    println!("✓ Database opened: {:?}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/runs", get(get_runs))
        .route("/annual", get(get_annual))
        .route("/org-year", get(get_org_year))
        .route("/maxima", get(get_maxima))
        .route("/trend", get(get_trend_model))
        .route("/organizations/:name", get(get_organization))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("REAPPOINTMENT_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("❌ Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    println!("\n🚀 Server running on http://{}", addr);
    println!("   API: http://{}/api/annual", addr);
    println!("\n   Press Ctrl+C to stop\n");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ Server error: {}", e);
        std::process::exit(1);
    }
}
