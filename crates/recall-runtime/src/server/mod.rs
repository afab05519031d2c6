use crate::logging::tail_log;
use crate::settings::Settings;
use crate::worker::Worker;
use crate::{Error, Result};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use recall_vector::{DocType, QueryFilters};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

// Local HTTP surface on 127.0.0.1: hook ingress for the host, read APIs for
// the dashboard and the MCP search tools. No authentication; the listener
// never leaves loopback.

pub fn router(worker: Arc<Worker>) -> Router {
    Router::new()
        .route("/hooks/:platform/:event", post(handle_hook))
        .route("/observations", get(list_observations))
        .route("/observations/:ids", get(get_observations))
        .route("/timeline", get(get_timeline))
        .route("/search", get(search))
        .route("/projects", get(get_projects))
        .route("/stats", get(get_stats))
        .route("/logs", get(get_logs))
        .route("/settings", get(get_settings).put(put_settings))
        .layer(CorsLayer::permissive())
        .with_state(worker)
}

pub async fn serve(worker: Arc<Worker>, port: u16) -> Result<()> {
    worker.startup().await;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(Error::Io)?;
    info!("worker listening on http://127.0.0.1:{}", port);

    axum::serve(listener, router(worker.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .map_err(Error::Io)?;

    worker.shutdown().await;
    Ok(())
}

type HttpError = (StatusCode, String);

fn internal(err: impl std::fmt::Display) -> HttpError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

/// Hooks are always answered 200 with an envelope; the hook executable must
/// never disrupt the host. Internal failures are logged here.
async fn handle_hook(
    State(worker): State<Arc<Worker>>,
    Path((platform, event)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    match worker.handle_hook(&platform, &event, &payload).await {
        Ok(result) => Json(json!({ "ok": true, "result": result })),
        Err(err) => {
            warn!("hook {}/{} failed: {}", platform, event, err);
            Json(json!({ "ok": false, "error": err.to_string() }))
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    project: Option<String>,
    limit: Option<usize>,
}

async fn list_observations(
    State(worker): State<Arc<Worker>>,
    Query(query): Query<ListQuery>,
) -> std::result::Result<Json<Value>, HttpError> {
    let store = worker.store().lock().unwrap();
    let observations = store
        .list_observations(query.project.as_deref(), query.limit.unwrap_or(50))
        .map_err(internal)?;
    Ok(Json(json!({ "observations": observations })))
}

async fn get_observations(
    State(worker): State<Arc<Worker>>,
    Path(ids): Path<String>,
) -> std::result::Result<Json<Value>, HttpError> {
    let ids: Vec<i64> = ids
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();

    let store = worker.store().lock().unwrap();
    let observations = store.get_observations_by_ids(&ids).map_err(internal)?;
    Ok(Json(json!({ "observations": observations })))
}

#[derive(Deserialize)]
struct TimelineQuery {
    anchor: i64,
    radius: Option<usize>,
}

async fn get_timeline(
    State(worker): State<Arc<Worker>>,
    Query(query): Query<TimelineQuery>,
) -> std::result::Result<Json<Value>, HttpError> {
    let store = worker.store().lock().unwrap();
    let observations = store
        .get_timeline(query.anchor, query.radius.unwrap_or(5))
        .map_err(internal)?;
    Ok(Json(json!({ "anchor": query.anchor, "observations": observations })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
    project: Option<String>,
    doc_type: Option<String>,
    session: Option<String>,
    min_epoch: Option<i64>,
    max_epoch: Option<i64>,
    limit: Option<usize>,
}

/// Semantic search with a plain-text fallback when the vector backend is
/// disabled or empty.
async fn search(
    State(worker): State<Arc<Worker>>,
    Query(query): Query<SearchQuery>,
) -> std::result::Result<Json<Value>, HttpError> {
    let limit = query.limit.unwrap_or(10);
    let filters = QueryFilters {
        project: query.project.clone(),
        doc_type: query.doc_type.as_deref().and_then(DocType::parse),
        memory_session_id: query.session.clone(),
        min_epoch: query.min_epoch,
        max_epoch: query.max_epoch,
    };

    let hits = match worker.vector().query(&query.q, limit, &filters).await {
        Ok(hits) => hits,
        Err(err) => {
            warn!("vector query failed, using text search: {}", err);
            Vec::new()
        }
    };

    let observations = {
        let store = worker.store().lock().unwrap();
        if hits.is_empty() {
            store
                .search_by_text(&query.q, query.project.as_deref(), limit)
                .map_err(internal)?
        } else {
            let ids: Vec<i64> = hits
                .iter()
                .filter(|hit| hit.doc_type == DocType::Observation)
                .map(|hit| hit.sqlite_id)
                .collect();
            store.get_observations_by_ids(&ids).map_err(internal)?
        }
    };

    Ok(Json(json!({ "hits": hits, "observations": observations })))
}

async fn get_projects(
    State(worker): State<Arc<Worker>>,
) -> std::result::Result<Json<Value>, HttpError> {
    let store = worker.store().lock().unwrap();
    let projects = store.list_projects().map_err(internal)?;
    Ok(Json(json!({ "projects": projects })))
}

async fn get_stats(
    State(worker): State<Arc<Worker>>,
) -> std::result::Result<Json<Value>, HttpError> {
    let store_stats = {
        let store = worker.store().lock().unwrap();
        store.stats().map_err(internal)?
    };
    let vector_stats = worker.vector().stats().await.ok();
    Ok(Json(json!({ "store": store_stats, "vector": vector_stats })))
}

#[derive(Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn get_logs(
    State(worker): State<Arc<Worker>>,
    Query(query): Query<LogsQuery>,
) -> std::result::Result<Json<Value>, HttpError> {
    let lines = tail_log(&worker.dirs().worker_log(), query.limit.unwrap_or(200))
        .map_err(internal)?;
    Ok(Json(json!({ "lines": lines })))
}

async fn get_settings(State(worker): State<Arc<Worker>>) -> Json<Settings> {
    Json(worker.settings_snapshot())
}

async fn put_settings(
    State(worker): State<Arc<Worker>>,
    Json(settings): Json<Settings>,
) -> std::result::Result<Json<Value>, HttpError> {
    worker.update_settings(settings).map_err(internal)?;
    Ok(Json(json!({ "ok": true })))
}
