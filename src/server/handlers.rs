use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

use super::models::{AnalyzeResponse, ErrorResponse};
use super::state::ServerState;
use crate::AppGateway;
use crate::gateway::GatewayResult;

pub fn router(gateway: AppGateway, route: &str) -> Router {
    let state = Arc::new(ServerState { gateway });
    Router::new()
        .route("/health", get(health))
        .route(route, post(analyze))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

pub async fn run_server(gateway: AppGateway, route: &str, addr: &str) -> Result<()> {
    let app = router(gateway, route);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind server address: {}", addr))?;
    info!("listening on {} (POST {})", addr, route);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type"),
    );
}

// The body is taken as raw bytes so that malformed JSON takes the same
// fallback path as every other failure.
async fn analyze(State(state): State<Arc<ServerState>>, body: Bytes) -> Response<Body> {
    match state.gateway.handle(&body).await {
        GatewayResult::Success { text } => {
            (StatusCode::OK, Json(AnalyzeResponse { result: text })).into_response()
        }
        GatewayResult::Failure { user_message, .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: user_message,
            }),
        )
            .into_response(),
    }
}
