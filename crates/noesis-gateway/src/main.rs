use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxumPath, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use noesis_bus::StreamKind;
use noesis_runtime::{OpenAiCompatibleProvider, Runtime};
use noesis_store::Store;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    runtime: Arc<Runtime>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "noesis_gateway=info".into()),
        )
        .init();

    let config_path = std::env::var("NOESIS_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("/etc/noesis/config.json"));
    let config = noesis_core::config::load_bootstrap_config(&config_path).unwrap_or_default();

    let db_path = config
        .db_path
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("/var/lib/noesis/noesis.db"));
    let store = Arc::new(Store::open(&db_path)?);

    let api_key = std::env::var("NOESIS_API_KEY")
        .map_err(|_| anyhow::anyhow!("NOESIS_API_KEY must be set"))?;
    let base_url =
        std::env::var("NOESIS_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let primary: Arc<dyn noesis_core::llm::LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
        &base_url,
        &api_key,
        &config.model,
    ));
    let reflection: Arc<dyn noesis_core::llm::LlmProvider> = Arc::new(OpenAiCompatibleProvider::new(
        &base_url,
        &api_key,
        &config.model,
    ));

    let port = config.gateway.port.unwrap_or(3100);
    let bind = config.gateway.bind.clone().unwrap_or_else(|| "0.0.0.0".into());

    let runtime = Runtime::bootstrap(config, store, primary, reflection);
    let state = AppState { runtime };

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/stream/:kind", get(stream_handler))
        .route("/screenshots/:id", get(screenshot_handler))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!("noesis-gateway listening on {bind}:{port}");

    let shutdown = state.runtime.shutdown.clone();
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }
    shutdown.shutdown().await;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "shutting_down": state.runtime.shutdown.is_shutting_down(),
        "active_runs": state.runtime.active_run_count(),
    }))
}

#[derive(serde::Deserialize)]
struct ChatRequest {
    session_id: String,
    message: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let run_request = noesis_agent::RunRequest {
        session_id: req.session_id,
        user_message: req.message,
        images: Vec::new(),
        max_iterations: None,
        cancel: state.runtime.shutdown.token(),
    };

    match state.runtime.run_chat(run_request).await {
        Ok(rx) => {
            let stream = UnboundedReceiverStream::new(rx).map(|event| {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                Ok::<_, Infallible>(SseEvent::default().data(payload))
            });
            Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => (axum::http::StatusCode::TOO_MANY_REQUESTS, e.to_string()).into_response(),
    }
}

async fn stream_handler(
    State(state): State<AppState>,
    AxumPath(kind): AxumPath<String>,
) -> impl IntoResponse {
    let Some(stream_kind) = parse_stream_kind(&kind) else {
        return (axum::http::StatusCode::NOT_FOUND, "unknown stream").into_response();
    };

    let messages = state.runtime.bus.subscribe(stream_kind);
    let sse_stream = messages.map(|msg| {
        let payload = serde_json::to_string(&msg).unwrap_or_default();
        Ok::<_, Infallible>(SseEvent::default().data(payload))
    });
    Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

/// Serves a screenshot `browser.rs::do_screenshot` wrote under `{workspace_dir}/screenshots/`,
/// addressed by the same `id` (file name) the tool's `ImageDescriptor` reports.
async fn screenshot_handler(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    if id.contains('/') || id.contains('\\') || id.contains("..") {
        return (axum::http::StatusCode::BAD_REQUEST, "invalid screenshot id").into_response();
    }

    let path = std::path::Path::new(&state.runtime.config.workspace_dir)
        .join("screenshots")
        .join(&id);

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
            bytes,
        )
            .into_response(),
        Err(_) => (axum::http::StatusCode::NOT_FOUND, "screenshot not found").into_response(),
    }
}

fn parse_stream_kind(kind: &str) -> Option<StreamKind> {
    match kind {
        "thoughts" => Some(StreamKind::Thoughts),
        "tasks" => Some(StreamKind::Tasks),
        "timeline" => Some(StreamKind::Timeline),
        _ => None,
    }
}
