use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{Config, PollerConfig, SettingsHandle};
use crate::domains::downloadable::DownloadType;
use crate::domains::envelope::Envelope;
use crate::error::{Result, TransportError};
use crate::handlers::message::MessageHandler;
use crate::interfaces::reporting::{ErrorReporter, Notification};
use crate::scheduler::Scheduler;
use crate::services::acknowledgement::AcknowledgementGenerator;
use crate::services::concentrator::ConcentratorClient;
use crate::services::dispatch::DispatchRegistry;
use crate::services::notifications::BroadcastReporter;
use crate::services::poller::{CredentialStore, DownloadPoller, PollerJob};

pub const DEFAULT_INBOX_DIR: &str = "./data/inbox";

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<AcknowledgementGenerator>,
    pub credentials: CredentialStore,
    pub token: String,
    pub notification_tx: broadcast::Sender<Notification>,
    pub config_path: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct CredentialRequest {
    patient_id: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/acknowledge", post(acknowledge))
        .route("/credential", post(set_credential))
        .route("/notifications", get(notifications))
        .route("/reload_config", post(reload_config))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn acknowledge(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }

    let envelope: Envelope = match serde_json::from_value(payload) {
        Ok(envelope) => envelope,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    match state.generator.acknowledge(&envelope) {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(err @ TransportError::InvalidEnvelope(_)) => {
            error_response(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => {
            warn!(inbound = envelope.tracking_id(), error = %err, "acknowledgement failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn set_credential(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CredentialRequest>,
) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }

    match payload.patient_id.filter(|id| !id.trim().is_empty()) {
        Some(patient_id) => {
            state.credentials.set_patient_id(patient_id);
            (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
        }
        None => {
            state.credentials.clear();
            (StatusCode::OK, Json(json!({"status": "cleared"}))).into_response()
        }
    }
}

async fn reload_config(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }

    let Some(path) = state.config_path.as_deref() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "daemon was started without a config file".to_string(),
        );
    };
    match Config::from_file(path) {
        Ok(config) => {
            state
                .generator
                .settings()
                .replace(config.acknowledgement.unwrap_or_default());
            info!(path, "acknowledgement settings reloaded");
            (
                StatusCode::OK,
                Json(json!({"status": "ok", "message": "Config reloaded"})),
            )
                .into_response()
        }
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn notifications(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(err) = authorize(&headers, &state.token) {
        return err.into_response();
    }

    let mut receiver = state.notification_tx.subscribe();
    let body = Body::from_stream(async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(notification) => {
                    let payload = serde_json::to_string(&notification).unwrap_or_default();
                    let line = format!("data: {}\n\n", payload);
                    yield Ok::<Bytes, std::convert::Infallible>(Bytes::from(line));
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
        .unwrap_or_else(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

fn authorize(
    headers: &HeaderMap,
    token: &str,
) -> std::result::Result<(), (StatusCode, Json<ErrorResponse>)> {
    let header = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let api_key = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let bearer = header.strip_prefix("Bearer ").unwrap_or("");

    if bearer == token || api_key == token {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Unauthorized".to_string(),
            }),
        ))
    }
}

/// Registry with the built-in handlers. A handler that cannot be prepared
/// yields a failed registry rather than stopping the daemon.
pub async fn build_registry(
    poller: Option<&PollerConfig>,
    reporter: Arc<dyn ErrorReporter>,
) -> Arc<DispatchRegistry> {
    let inbox = poller
        .and_then(|cfg| cfg.inbox_dir.as_deref())
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .unwrap_or(DEFAULT_INBOX_DIR)
        .to_string();
    if let Err(err) = tokio::fs::create_dir_all(&inbox).await {
        let err = TransportError::Runtime(format!("cannot prepare inbox {inbox}: {err}"));
        warn!(error = %err, "downloadable handler registry failed to start");
        return Arc::new(DispatchRegistry::failed(reporter, err));
    }
    let registry = DispatchRegistry::new(reporter);
    registry
        .register(DownloadType::PatientMessage, Arc::new(MessageHandler::new(inbox)))
        .await;
    Arc::new(registry)
}

/// Generator with its templates already loaded, so the first `/acknowledge`
/// does not read template files on the request path. A load failure is logged
/// and retried on the first acknowledgement.
pub fn prepare_generator(settings: SettingsHandle) -> Arc<AcknowledgementGenerator> {
    let generator = AcknowledgementGenerator::new(settings);
    if let Err(err) = generator.templates().get() {
        warn!(error = %err, "acknowledgement templates could not be loaded at startup");
    }
    Arc::new(generator)
}

pub async fn run(host: &str, port: u16, config_path: Option<&str>, token: &str) -> Result<()> {
    run_with_shutdown(host, port, config_path, token, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(
    host: &str,
    port: u16,
    config_path: Option<&str>,
    token: &str,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = match config_path {
        Some(path) if Path::new(path).exists() => Config::from_file(path)?,
        Some(path) => {
            warn!(path, "config file not found, starting with defaults");
            Config::default()
        }
        None => Config::default(),
    };

    let (notification_tx, _) = broadcast::channel(256);
    let reporter: Arc<dyn ErrorReporter> =
        Arc::new(BroadcastReporter::new(notification_tx.clone()));
    let settings = SettingsHandle::new(config.acknowledgement.clone().unwrap_or_default());
    let generator = prepare_generator(settings);
    let credentials = CredentialStore::new();

    let mut scheduler = Scheduler::new();
    if let Some(poller_config) = config.poller.as_ref().filter(|p| p.base_url.is_some()) {
        if let Some(patient_id) = poller_config.patient_id.as_deref() {
            credentials.set_patient_id(patient_id);
        }
        let registry = build_registry(Some(poller_config), reporter.clone()).await;
        let source = Arc::new(ConcentratorClient::from_config(poller_config)?);
        let poller = DownloadPoller::new(
            poller_config.device_id()?,
            credentials.clone(),
            source,
            registry,
            reporter.clone(),
        )
        .with_failure_policy(poller_config.failure_policy());
        scheduler.register_job(Arc::new(PollerJob::new(
            Arc::new(poller),
            Duration::from_secs(poller_config.poll_seconds()),
        )));
    }
    scheduler.start();
    info!(jobs = ?scheduler.job_names(), "scheduler started");

    let state = AppState {
        generator,
        credentials,
        token: token.to_string(),
        notification_tx,
        config_path: config_path.map(str::to_string),
    };
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TransportError::Runtime(e.to_string()))?;
    info!(%addr, "daemon listening");
    let shutdown = async move {
        shutdown.await;
        scheduler.stop().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TransportError::Runtime(e.to_string()))?;

    Ok(())
}
