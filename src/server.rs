use crate::config::{CredentialSource, ProxyConfig};
use crate::error::ProxyError;
use crate::logging::{RequestSummary, SharedLogger};
use crate::proxy::{self, Prepared};
use crate::router::ModelRouter;
use crate::translate::anthropic_types::{
    ErrorResponse, MessagesRequest, TokenCountRequest, TokenCountResponse,
};
use crate::translate::response::anthropic_error_type;
use crate::translate::streaming::SseFrame;
use crate::upstream::UpstreamClient;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MESSAGES_PATH: &str = "/v1/messages";
const COUNT_TOKENS_PATH: &str = "/v1/messages/count_tokens";
const DEFAULT_LOG_LIMIT: usize = 100;

pub struct AppState {
    pub config: ProxyConfig,
    pub router: ModelRouter,
    pub credentials: Arc<dyn CredentialSource>,
    pub upstream: UpstreamClient,
    pub logger: SharedLogger,
}

impl AppState {
    /// Build the state from a validated config.
    pub fn new(
        config: ProxyConfig,
        credentials: Arc<dyn CredentialSource>,
        http: reqwest::Client,
        logger: SharedLogger,
    ) -> crate::Result<Self> {
        let router = ModelRouter::from_config(&config)?;
        let upstream = UpstreamClient::new(http, &config);
        Ok(Self {
            config,
            router,
            credentials,
            upstream,
            logger,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route(MESSAGES_PATH, post(handle_messages))
        .route(COUNT_TOKENS_PATH, post(handle_count_tokens))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {e}"));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let mut prepared = match proxy::prepare(&req, &state.router) {
        Ok(p) => p,
        Err(e) => return fail(&state, &req.model, MESSAGES_PATH, &e),
    };
    if let Err(e) = proxy::attach_credentials(&mut prepared, state.credentials.as_ref()) {
        return fail(&state, &req.model, MESSAGES_PATH, &e);
    }

    tracing::debug!(
        model = %req.model,
        routed = %prepared.route.model,
        streaming = req.is_streaming(),
        "Processing request"
    );

    if req.is_streaming() {
        handle_streaming(state, &prepared).await
    } else {
        handle_non_streaming(state, &prepared).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, prepared: &Prepared) -> Response {
    let started = std::time::Instant::now();
    match proxy::proxy_non_streaming(prepared, &state.upstream).await {
        Ok(resp) => {
            log_summary(&state, MESSAGES_PATH, prepared, 200);
            state.logger.debug(
                "proxy",
                format!(
                    "Completed {} in {:.2}s: in={} out={} tokens",
                    prepared.route.model,
                    started.elapsed().as_secs_f64(),
                    resp.usage.input_tokens,
                    resp.usage.output_tokens
                ),
            );
            Json(resp).into_response()
        }
        Err(e) => {
            let response = error_response(&e);
            log_summary(&state, MESSAGES_PATH, prepared, response.status().as_u16());
            state.logger.error("proxy", format!("Upstream error: {e}"));
            response
        }
    }
}

async fn handle_streaming(state: Arc<AppState>, prepared: &Prepared) -> Response {
    let frames = match proxy::proxy_streaming(prepared, &state.upstream).await {
        Ok(s) => s,
        Err(e) => {
            let response = error_response(&e);
            log_summary(&state, MESSAGES_PATH, prepared, response.status().as_u16());
            state.logger.error("stream", format!("Streaming setup error: {e}"));
            return response;
        }
    };
    log_summary(&state, MESSAGES_PATH, prepared, 200);

    let logger = state.logger.clone();
    let model = prepared.route.model.clone();
    let events = frames.map(move |frame| -> std::result::Result<Event, Infallible> {
        if matches!(frame, SseFrame::Done) {
            logger.info("stream", format!("Stream completed for {model}"));
        }
        Ok(to_sse_event(&frame))
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn to_sse_event(frame: &SseFrame) -> Event {
    let event = Event::default().data(frame.data());
    match frame.event_name() {
        Some(name) => event.event(name),
        None => event,
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: TokenCountRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };
    let model = req.model.clone();

    match proxy::prepare(&req.into_messages_request(), &state.router) {
        Ok(prepared) => {
            log_summary(&state, COUNT_TOKENS_PATH, &prepared, 200);
            Json(TokenCountResponse {
                input_tokens: proxy::estimate_input_tokens(&prepared.request),
            })
            .into_response()
        }
        Err(e) => fail(&state, &model, COUNT_TOKENS_PATH, &e),
    }
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Anthropic Messages bridge for OpenAI-compatible providers",
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .router
        .catalogs()
        .flat_map(|(provider, models)| {
            models.iter().map(move |name| {
                serde_json::json!({
                    "id": format!("{}/{name}", provider.prefix()),
                    "object": "model",
                    "owned_by": provider.prefix(),
                })
            })
        })
        .collect();

    Json(serde_json::json!({
        "data": models,
        "object": "list",
        "preferred_provider": state.router.preferred().prefix(),
        "big_model": state.config.big_model,
        "small_model": state.config.small_model,
    }))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state
        .logger
        .recent(query.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    Json(serde_json::json!({ "entries": entries }))
}

fn log_summary(state: &AppState, path: &str, prepared: &Prepared, status: u16) {
    state.logger.log_request(&RequestSummary {
        method: "POST",
        path,
        client_model: &prepared.route.requested,
        routed_model: &prepared.route.model,
        messages: prepared.request.messages.len(),
        tools: prepared.tool_count(),
        status,
    });
}

/// Error before a request could be routed.
fn fail(state: &AppState, model: &str, path: &str, err: &ProxyError) -> Response {
    let response = error_response(err);
    state.logger.warn(
        "server",
        format!(
            "POST {path} model={model} rejected with {}: {err}",
            response.status().as_u16()
        ),
    );
    response
}

/// Status code and Anthropic error body for a failed request.
pub fn error_response(err: &ProxyError) -> Response {
    let (status, body) = match err {
        ProxyError::Validation { message } => (
            StatusCode::BAD_REQUEST,
            ErrorResponse::invalid_request(message.clone()),
        ),
        ProxyError::Upstream {
            status,
            error_type,
            message,
        } => (
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorResponse::new(anthropic_error_type(error_type), message.clone()),
        ),
        ProxyError::Provider { .. } | ProxyError::Http(_) => (
            StatusCode::BAD_GATEWAY,
            ErrorResponse::api_error(err.to_string()),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorResponse::api_error(err.to_string()),
        ),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_response(&ProxyError::validation("bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_response(&ProxyError::upstream(429, "rate_limit_exceeded", "slow")).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            error_response(&ProxyError::upstream(1000, "x", "bogus status")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(&ProxyError::provider("connection refused")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_response(&ProxyError::missing_credential("openai")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_done_frame_has_no_event_name() {
        // axum renders this as a bare `data: [DONE]` frame
        let frame = SseFrame::Done;
        assert_eq!(frame.event_name(), None);
        assert_eq!(frame.data(), "[DONE]");
    }
}
