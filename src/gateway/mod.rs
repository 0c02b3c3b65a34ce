//! Inbound HTTP gateway: the confirm endpoint and the local mock endpoint.
//!
//! All state is injected through [`AppState`]; handlers are request-scoped
//! and hold nothing across calls.

use crate::config::Config;
use crate::orchestrator::{ConfirmOptions, Orchestrator};
use crate::providers::OpenAiCompatProvider;
use crate::store::cache::MemoryCache;
use crate::store::ratelimit::SlidingWindowRateLimiter;
use crate::store::sqlite::SqliteStore;
use crate::store::ActionRegistry;
use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};
use uuid::Uuid;

const MAX_BODY_BYTES: usize = 64 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ── Error taxonomy ───────────────────────────────────────────────

/// Request-level failures. Item-scoped execution failures never surface
/// here; they ride inside the 200 response as that item's result.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication required")]
    Authentication,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("{0}")]
    Validation(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Authentication => (StatusCode::UNAUTHORIZED, self.to_string()),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            Self::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string()),
            Self::Unexpected(e) => {
                error!("unexpected gateway failure: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".into())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub conversation_id: i64,
    pub confirm: bool,
    #[serde(default)]
    pub user_api_key: Option<String>,
    #[serde(default)]
    pub mock_api_responses: bool,
}

/// `outs` carries one entry per attempted item on confirm, or the single
/// cancellation assistant turn on cancel.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub outs: Vec<serde_json::Value>,
}

// ── State and router ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<dyn ActionRegistry>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/v1/confirm",
            post(confirm_handler).fallback(|| async { ApiError::MethodNotAllowed }),
        )
        .route("/api/mock", any(mock_handler))
        .route("/api/mock/{*path}", any(mock_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

/// Build the full service stack from config and serve it until shutdown.
pub async fn run_gateway(host: &str, port: u16, mut config: Config) -> anyhow::Result<()> {
    // The orchestrator derives the mock-endpoint base from these.
    config.gateway.host = host.to_string();
    config.gateway.port = port;

    let store = Arc::new(
        SqliteStore::open(&config.store_path()?).context("failed to open the durable store")?,
    );
    let provider = Arc::new(OpenAiCompatProvider::new(
        &config.llm.base_url,
        config.llm.api_key.as_deref(),
        &config.llm.model,
    )?);
    let limiter = Arc::new(SlidingWindowRateLimiter::per_minute(
        config.gateway.confirm_per_minute,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        store.clone(),
        Arc::new(MemoryCache::new()),
        provider,
        config,
    )?);

    let app = router(AppState {
        orchestrator,
        registry: store,
        limiter,
    });

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    info!("gateway listening on {host}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("gateway exited")
}

// ── Handlers ─────────────────────────────────────────────────────

async fn confirm_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConfirmRequest>, JsonRejection>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    let token = extract_bearer_token(&headers).ok_or(ApiError::Authentication)?;
    let org = state
        .registry
        .organization_by_token(token)
        .await?
        .ok_or(ApiError::Authentication)?;

    if !state.limiter.allow(token) {
        return Err(ApiError::RateLimited);
    }

    let Json(request) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let request_id = Uuid::new_v4();
    info!(
        %request_id,
        org = %org.name,
        conversation_id = request.conversation_id,
        confirm = request.confirm,
        "confirm request"
    );

    if request.confirm {
        let opts = ConfirmOptions {
            user_api_key: request.user_api_key,
            mock: request.mock_api_responses,
        };
        let outs = state
            .orchestrator
            .confirm(&org, request.conversation_id, &opts)
            .await?
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(anyhow::Error::from)?;
        Ok(Json(ConfirmResponse { outs }))
    } else {
        let notice = state
            .orchestrator
            .cancel(&org, request.conversation_id)
            .await?;
        Ok(Json(ConfirmResponse {
            outs: vec![json!({ "role": "assistant", "content": notice })],
        }))
    }
}

/// Canned response for mock execution mode. Echoes enough of the request
/// for tests to assert the redirect preserved method and path.
async fn mock_handler(method: Method, uri: Uri) -> Json<serde_json::Value> {
    let path = uri
        .path()
        .strip_prefix("/api/mock")
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    Json(json!({
        "mock": true,
        "method": method.as_str(),
        "path": path,
    }))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(confirm_per_minute: u32) -> AppState {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store.insert_organization("Acme", "token", None).unwrap();
        let provider = Arc::new(
            OpenAiCompatProvider::new("http://127.0.0.1:1/v1", None, "test-model").unwrap(),
        );
        let orchestrator = Arc::new(
            Orchestrator::new(
                store.clone(),
                store.clone(),
                Arc::new(MemoryCache::new()),
                provider,
                Config::default(),
            )
            .unwrap(),
        );
        AppState {
            orchestrator,
            registry: store,
            limiter: Arc::new(SlidingWindowRateLimiter::per_minute(confirm_per_minute)),
        }
    }

    fn confirm_request(token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/confirm")
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = router(test_state(0));
        let response = app
            .oneshot(confirm_request(None, r#"{"conversation_id":1,"confirm":true}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_json(response).await.get("error").is_some());
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let app = router(test_state(0));
        let response = app
            .oneshot(confirm_request(
                Some("wrong"),
                r#"{"conversation_id":1,"confirm":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn invalid_body_is_bad_request() {
        let app = router(test_state(0));
        let response = app
            .oneshot(confirm_request(Some("token"), "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await.get("error").is_some());
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let app = router(test_state(0));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/confirm")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn rate_limit_yields_429() {
        let app = router(test_state(1));
        let first = app
            .clone()
            .oneshot(confirm_request(
                Some("token"),
                r#"{"conversation_id":1,"confirm":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app
            .oneshot(confirm_request(
                Some("token"),
                r#"{"conversation_id":1,"confirm":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn confirm_with_nothing_pending_is_empty_ok() {
        let app = router(test_state(0));
        let response = app
            .oneshot(confirm_request(
                Some("token"),
                r#"{"conversation_id":1,"confirm":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["outs"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn cancel_returns_the_notice_as_an_assistant_out() {
        let app = router(test_state(0));
        let response = app
            .oneshot(confirm_request(
                Some("token"),
                r#"{"conversation_id":1,"confirm":false}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["outs"][0]["role"], serde_json::json!("assistant"));
        assert!(body["outs"][0]["content"]
            .as_str()
            .unwrap()
            .contains("cancelled"));
    }

    #[tokio::test]
    async fn mock_endpoint_echoes_method_and_path() {
        let app = router(test_state(0));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/mock/weather?city=Oslo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["mock"], serde_json::json!(true));
        assert_eq!(body["method"], serde_json::json!("GET"));
        assert_eq!(body["path"], serde_json::json!("/weather"));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), Some("abc"));
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_none());
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(extract_bearer_token(&headers).is_none());
    }
}
