use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::models;
use crate::pricing::PricingCache;
use crate::proxy::{self, Upstream};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest};
use crate::translate::openai_types::ChatErrorResponse;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub pricing: Arc<PricingCache>,
}

impl AppState {
    fn upstream<'a>(&'a self, credential: &'a str) -> Upstream<'a> {
        Upstream {
            config: &self.config,
            client: &self.client,
            pricing: &self.pricing,
            credential,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_info))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Pull the client credential from `x-api-key` or `Authorization`, falling
/// back to the configured environment key.
pub fn extract_credential(headers: &HeaderMap, config: &ProxyConfig) -> Option<String> {
    let from_api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let from_authorization = || {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("Key "))
            .unwrap_or(value)
            .trim();
        (!token.is_empty()).then_some(token)
    };

    from_api_key
        .or_else(from_authorization)
        .map(ToString::to_string)
        .or_else(|| config.fallback_api_key())
}

fn missing_credential(config: &ProxyConfig) -> ProxyError {
    let hint = config
        .api_key_env()
        .map(|var| format!(" or set {var}"))
        .unwrap_or_default();
    ProxyError::credential(format!("send x-api-key or Authorization{hint}"))
}

fn status_from(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY)
}

fn anthropic_error(err: &ProxyError) -> Response {
    let body = ErrorResponse::new(err.error_type(), err.to_string());
    (status_from(err.status_code()), Json(body)).into_response()
}

fn openai_error(err: &ProxyError) -> Response {
    let body = ChatErrorResponse::new(err.error_type(), err.to_string());
    (status_from(err.status_code()), Json(body)).into_response()
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Failed to parse request");
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {e}"));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let Some(credential) = extract_credential(&headers, &state.config) else {
        return anthropic_error(&missing_credential(&state.config));
    };

    let is_streaming = req.is_streaming();

    info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Request"
    );

    let upstream = state.upstream(&credential);
    if is_streaming {
        handle_streaming(&req, &upstream).await
    } else {
        handle_non_streaming(&req, &upstream).await
    }
}

async fn handle_non_streaming(req: &MessagesRequest, upstream: &Upstream<'_>) -> Response {
    match proxy::proxy_non_streaming(req, upstream).await {
        Ok(proxy::ProxyResult::Success(resp)) => Json(resp).into_response(),
        Ok(proxy::ProxyResult::Error(err, status_code)) => {
            (status_from(status_code), Json(err)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Proxy error");
            anthropic_error(&e)
        }
    }
}

async fn handle_streaming(req: &MessagesRequest, upstream: &Upstream<'_>) -> Response {
    let sse_stream = match proxy::proxy_streaming(req, upstream).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Streaming setup error");
            return anthropic_error(&e);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
        warn!(error = %e, "Failed to parse passthrough request");
        let err = ChatErrorResponse::invalid_request(format!("Invalid request body: {e}"));
        return (StatusCode::BAD_REQUEST, Json(err)).into_response();
    }

    let Some(credential) = extract_credential(&headers, &state.config) else {
        return openai_error(&missing_credential(&state.config));
    };

    match proxy::proxy_passthrough(body, &state.upstream(&credential)).await {
        Ok(resp) => {
            let status = status_from(resp.status().as_u16());
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();

            Response::builder()
                .status(status)
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from_stream(resp.bytes_stream()))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            error!(error = %e, "Passthrough error");
            openai_error(&e)
        }
    }
}

async fn handle_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.config.provider.name,
        "endpoints": ["/v1/messages", "/v1/chat/completions", "/v1/models", "/health"],
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<models::ModelList> {
    Json(models::model_list(&state.config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_without_fallback() -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.provider.api_key_env = Some("FAL_ROUTER_PROXY_TEST_UNSET_KEY".to_string());
        config
    }

    #[test]
    fn test_x_api_key_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("from-header"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer other"));
        assert_eq!(
            extract_credential(&headers, &config_without_fallback()).as_deref(),
            Some("from-header")
        );
    }

    #[test]
    fn test_authorization_schemes_stripped() {
        let config = config_without_fallback();
        for value in ["Bearer abc", "Key abc"] {
            let mut headers = HeaderMap::new();
            headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert_eq!(extract_credential(&headers, &config).as_deref(), Some("abc"));
        }
    }

    #[test]
    fn test_no_credential() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("  "));
        assert!(extract_credential(&headers, &config_without_fallback()).is_none());
    }
}
