use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use shiling::pipeline::{CascadeError, CascadeObserver, GenerationError, PipelineError};
use shiling::{Language, RecommendationService};
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

use crate::api::{
    ApiContextQuery, ApiContextResponse, ApiModelsResponse, ApiRecommendRequest,
    ApiRecommendResponse, ApiTranslateRequest, ApiTranslateResponse,
};

type Channels = Arc<Mutex<HashMap<String, broadcast::Sender<StreamEvent>>>>;

#[derive(Clone)]
struct AppState {
    service: Arc<RecommendationService>,
    timeout_ms: u64,
    channels: Channels,
    shutdown: CancellationToken,
}

#[derive(Clone, Serialize)]
struct StreamEvent {
    event: String,
    message: String,
    model: Option<String>,
    timestamp_ms: u128,
}

#[derive(serde::Deserialize)]
struct StreamQuery {
    request_id: String,
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

const STREAM_IDLE_CHECK: Duration = Duration::from_secs(30);

/// Relays cascade progress to the SSE channel of one request.
struct ChannelObserver {
    sender: broadcast::Sender<StreamEvent>,
}

impl CascadeObserver for ChannelObserver {
    fn attempt_started(&self, model: &str, index: usize, total: usize) {
        send_event(
            &self.sender,
            "calling",
            &format!("Calling {} ({}/{})", model, index + 1, total),
            Some(model),
        );
    }

    fn attempt_failed(&self, model: &str, error: &GenerationError) {
        send_event(
            &self.sender,
            "fallback",
            &format!("{} failed: {}", model, error),
            Some(model),
        );
    }

    fn attempt_succeeded(&self, model: &str, elapsed: Duration) {
        send_event(
            &self.sender,
            "received",
            &format!("{} answered in {:.1}s", model, elapsed.as_secs_f64()),
            Some(model),
        );
    }
}

pub async fn serve(args: crate::ServeArgs, service: RecommendationService, timeout_ms: u64) -> Result<(), String> {
    let shutdown = CancellationToken::new();
    let state = AppState {
        service: Arc::new(service),
        timeout_ms,
        channels: Arc::new(Mutex::new(HashMap::new())),
        shutdown: shutdown.clone(),
    };

    let web_root = args.web_root;
    let index_path = format!("{}/index.html", web_root.trim_end_matches('/'));
    let static_service = ServeDir::new(web_root).not_found_service(ServeFile::new(index_path));

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/models", get(models_handler))
        .route("/api/context", get(context_handler))
        .route("/api/recommend", post(recommend_handler))
        .route("/api/recommend/stream", get(stream_handler))
        .route("/api/translate", post(translate_handler))
        .nest_service("/", static_service)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|err| format!("invalid bind address: {}", err))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| format!("failed to bind server: {}", err))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            shutdown.cancel();
        })
        .await
        .map_err(|err| format!("server error: {}", err))?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn models_handler(State(state): State<AppState>) -> Json<ApiModelsResponse> {
    Json(ApiModelsResponse {
        models: state.service.models().to_vec(),
        timeout_ms: state.timeout_ms,
    })
}

async fn context_handler(
    State(state): State<AppState>,
    Query(query): Query<ApiContextQuery>,
) -> Result<Json<ApiContextResponse>, (StatusCode, String)> {
    let moment = crate::api::parse_moment(query.date.as_deref(), query.time.as_deref())
        .map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    let context = state.service.context(&moment);
    Ok(Json(ApiContextResponse::from_context(&context)))
}

async fn recommend_handler(
    State(state): State<AppState>,
    Json(request): Json<ApiRecommendRequest>,
) -> Result<Json<ApiRecommendResponse>, (StatusCode, String)> {
    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(generate_request_id);
    let (moment, selections) = request
        .into_selections()
        .map_err(|err| (StatusCode::BAD_REQUEST, err))?;

    let sender = get_or_create_channel(&state, &request_id).await;
    send_event(&sender, "start", "Collecting solar term context", None);
    let observer = ChannelObserver {
        sender: sender.clone(),
    };

    let cancel = state.shutdown.child_token();
    let outcome = state
        .service
        .recommend(&moment, &selections, &cancel, &observer)
        .await;
    schedule_cleanup(state.channels.clone(), request_id.clone());

    match outcome {
        Ok(outcome) => {
            send_event(&sender, "done", "Recommendation ready", Some(&outcome.model));
            Ok(Json(ApiRecommendResponse::from_outcome(outcome, request_id)))
        }
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "recommendation failed");
            send_event(&sender, "error", &err.to_string(), None);
            Err(error_response(err))
        }
    }
}

async fn translate_handler(
    State(state): State<AppState>,
    Json(request): Json<ApiTranslateRequest>,
) -> Result<Json<ApiTranslateResponse>, (StatusCode, String)> {
    let request_id = request
        .request_id
        .clone()
        .unwrap_or_else(generate_request_id);
    let language = Language::from_str(&request.language)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid language: {}", request.language)))?;

    let sender = get_or_create_channel(&state, &request_id).await;
    let observer = ChannelObserver {
        sender: sender.clone(),
    };
    let cancel = state.shutdown.child_token();
    let translated = state.service.translate(language, &cancel, &observer).await;
    schedule_cleanup(state.channels.clone(), request_id.clone());

    match translated {
        Ok(recommendation) => {
            send_event(&sender, "done", "Translation ready", None);
            Ok(Json(ApiTranslateResponse {
                request_id,
                language,
                recommendation,
            }))
        }
        Err(err) => {
            warn!(request_id = %request_id, error = %err, "translation failed");
            send_event(&sender, "error", &err.to_string(), None);
            Err(error_response(err))
        }
    }
}

async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>, StatusCode>
{
    let sender = get_or_create_channel(&state, &query.request_id).await;
    let receiver = sender.subscribe();
    schedule_idle_cleanup(
        state.channels.clone(),
        query.request_id.clone(),
        sender.clone(),
        STREAM_IDLE_CHECK,
    );
    let stream = BroadcastStream::new(receiver).filter_map(|event| match event {
        Ok(event) => {
            let data = serde_json::to_string(&event).unwrap_or_default();
            Some(Ok(Event::default().event(event.event.clone()).data(data)))
        }
        Err(_) => None,
    });

    send_event(&sender, "connected", "Streaming generation status", None);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(8))))
}

fn error_response(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::Cascade(CascadeError::Exhausted { .. }) => StatusCode::BAD_GATEWAY,
        PipelineError::Cascade(CascadeError::Cancelled { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Cascade(CascadeError::NoModels) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Credential(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::NothingToTranslate => StatusCode::CONFLICT,
        PipelineError::Translation(_) => StatusCode::BAD_GATEWAY,
        PipelineError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

async fn get_or_create_channel(
    state: &AppState,
    request_id: &str,
) -> broadcast::Sender<StreamEvent> {
    let mut guard = state.channels.lock().await;
    if let Some(sender) = guard.get(request_id) {
        return sender.clone();
    }
    let (sender, _) = broadcast::channel(32);
    guard.insert(request_id.to_string(), sender.clone());
    sender
}

fn send_event(sender: &broadcast::Sender<StreamEvent>, event: &str, message: &str, model: Option<&str>) {
    let _ = sender.send(StreamEvent {
        event: event.to_string(),
        message: message.to_string(),
        model: model.map(str::to_string),
        timestamp_ms: now_ms(),
    });
}

fn schedule_cleanup(channels: Channels, request_id: String) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let mut guard = channels.lock().await;
        guard.remove(&request_id);
    });
}

/// Removes a channel once no stream listens to it, unless it was replaced meanwhile.
fn schedule_idle_cleanup(
    channels: Channels,
    request_id: String,
    sender: broadcast::Sender<StreamEvent>,
    check_every: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(check_every).await;
            if sender.receiver_count() == 0 {
                break;
            }
        }
        let mut guard = channels.lock().await;
        if guard
            .get(&request_id)
            .is_some_and(|current| current.same_channel(&sender))
        {
            guard.remove(&request_id);
        }
    });
}

fn generate_request_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{}", now_ms(), counter)
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels_with(request_id: &str) -> (Channels, broadcast::Sender<StreamEvent>) {
        let (sender, _) = broadcast::channel(4);
        let mut map = HashMap::new();
        map.insert(request_id.to_string(), sender.clone());
        (Arc::new(Mutex::new(map)), sender)
    }

    #[tokio::test]
    async fn stream_only_channel_is_removed_after_disconnect() {
        let (channels, sender) = channels_with("req-1");
        let receiver = sender.subscribe();
        schedule_idle_cleanup(
            channels.clone(),
            "req-1".to_string(),
            sender.clone(),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channels.lock().await.contains_key("req-1"));

        drop(receiver);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(channels.lock().await.is_empty());
    }

    #[tokio::test]
    async fn replaced_channel_is_left_alone() {
        let (channels, stale) = channels_with("req-2");
        let (fresh, _) = broadcast::channel(4);
        channels
            .lock()
            .await
            .insert("req-2".to_string(), fresh.clone());

        schedule_idle_cleanup(
            channels.clone(),
            "req-2".to_string(),
            stale,
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let guard = channels.lock().await;
        assert!(guard
            .get("req-2")
            .is_some_and(|current| current.same_channel(&fresh)));
    }
}
