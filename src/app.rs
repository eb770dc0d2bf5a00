use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::aggregator::StatisticsSnapshot;
use crate::config::Settings;
use crate::detection::{DetectionIngestor, FaceDetection, IngestError};
use crate::live::{fetch_snapshot, LiveAnalytics, LiveAnalyticsHandle, LiveOptions};
use crate::metrics::gather_metrics;
use crate::store::{build_record_store, RecordStore, StoreError};
use crate::time_window::{SystemClock, TimeRange, TimeWindowSelector};
use crate::types::DetectionRecord;

#[derive(Clone)]
pub struct AppState {
    settings: Arc<Settings>,
    store: Arc<dyn RecordStore>,
    selector: TimeWindowSelector<Local>,
    live: LiveAnalyticsHandle,
    ingestor: Arc<DetectionIngestor>,
}

pub async fn run(settings: Settings) -> Result<()> {
    let settings = Arc::new(settings);
    let store = build_record_store(&settings).await?;
    let selector = TimeWindowSelector::new(Arc::new(SystemClock), Local, settings.week_start);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (live, mut live_task) = LiveAnalytics::spawn(
        store.clone(),
        selector.clone(),
        LiveOptions::from_settings(&settings),
        settings.default_time_range,
        shutdown_tx.subscribe(),
    );
    let state = AppState {
        settings: settings.clone(),
        store: store.clone(),
        selector,
        live,
        ingestor: Arc::new(DetectionIngestor::new(store, settings.worker_id.clone())),
    };

    let http_server = spawn_server(router(state), settings.http_port, shutdown_tx.subscribe()).await?;
    let metrics_server = spawn_server(metrics_router(), settings.prometheus_port, shutdown_tx.subscribe()).await?;

    info!(
        worker_id = %settings.worker_id,
        http_port = settings.http_port,
        metrics_port = settings.prometheus_port,
        range = %settings.default_time_range,
        "Analytics worker started"
    );

    let live_finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            false
        }
        res = &mut live_task => {
            if let Err(err) = res {
                error!(error = %err, "Live analytics task crashed");
            }
            true
        }
    };

    let _ = shutdown_tx.send(());

    if !live_finished {
        live_task.await.ok();
    }
    http_server.await.ok();
    metrics_server.await.ok();

    info!("Analytics worker shutdown complete");
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(current_stats))
        .route("/stats/:range", get(stats_for_range))
        .route("/range", put(switch_range))
        .route("/refresh", post(refresh))
        .route("/detections", post(ingest_detection))
        .with_state(state)
}

fn metrics_router() -> Router {
    Router::new().route(
        "/metrics",
        get(|| async { ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], gather_metrics()) }),
    )
}

async fn spawn_server(app: Router, port: u16, mut shutdown: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind listener on {addr}"))?;
    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(err) = served {
            warn!(error = %err, port, "HTTP server stopped with error");
        }
    }))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unprocessable(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            Self::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "workerId": state.settings.worker_id }))
}

async fn current_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.live.current())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RangeStats {
    range: TimeRange,
    lower_bound: Option<DateTime<Utc>>,
    snapshot: StatisticsSnapshot,
}

async fn stats_for_range(State(state): State<AppState>, Path(range): Path<String>) -> Result<Json<RangeStats>, ApiError> {
    let range = range
        .parse::<TimeRange>()
        .map_err(|err| ApiError::BadRequest(err.to_string()))?;
    let (lower_bound, snapshot) =
        fetch_snapshot(state.store.as_ref(), &state.selector, range, state.settings.fetch_timeout).await?;
    Ok(Json(RangeStats {
        range,
        lower_bound,
        snapshot,
    }))
}

#[derive(Debug, Deserialize)]
struct RangeRequest {
    range: TimeRange,
}

async fn switch_range(State(state): State<AppState>, Json(request): Json<RangeRequest>) -> Result<StatusCode, ApiError> {
    state
        .live
        .set_range(request.range)
        .await
        .map_err(|err| ApiError::Unavailable(err.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn refresh(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .live
        .refresh()
        .await
        .map_err(|err| ApiError::Unavailable(err.to_string()))?;
    Ok(StatusCode::ACCEPTED)
}

async fn ingest_detection(
    State(state): State<AppState>,
    Json(detection): Json<FaceDetection>,
) -> Result<(StatusCode, Json<DetectionRecord>), ApiError> {
    match state.ingestor.ingest(detection).await {
        Ok(record) => Ok((StatusCode::CREATED, Json(record))),
        Err(IngestError::Detection(err)) => Err(ApiError::Unprocessable(err.to_string())),
        Err(IngestError::Store(err)) => Err(err.into()),
    }
}
