//! HTTP transport for the gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::{ChatRequest, Gateway, GatewayError, PlanStatus};

/// `POST /chat` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    /// Scan id.
    pub scan_id: String,
    /// Question for the quick response.
    #[serde(default)]
    pub question: String,
    /// Whether to return the plan.
    #[serde(default)]
    pub request_plan: bool,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human readable message. Generic for server-side failures.
    pub error: String,
    /// Machine readable code.
    pub code: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", "forbidden"),
            GatewayError::Pending => (StatusCode::OK, "PENDING", "plan pending"),
            GatewayError::InvalidScanId => {
                (StatusCode::BAD_REQUEST, "INVALID_SCAN_ID", "invalid scan id")
            }
            GatewayError::Decryption(_)
            | GatewayError::CorruptPlan(_)
            | GatewayError::Storage(_)
            | GatewayError::Configuration(_) => {
                error!(error = %self, "gateway request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "plan unavailable",
                )
            }
        };

        let body = ErrorResponse {
            error: message.to_owned(),
            code: code.to_owned(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the gateway router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Result<Response, GatewayError> {
    let request = ChatRequest {
        scan_id: body.scan_id,
        question: body.question,
        request_plan: body.request_plan,
        token: bearer_token(&headers),
    };
    let response = gateway.chat(request).await?;
    let status = match response.plan_status {
        PlanStatus::Forbidden => StatusCode::FORBIDDEN,
        _ => StatusCode::OK,
    };
    Ok((status, Json(response)).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
}

/// Serve the gateway on `bind` until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(bind: SocketAddr, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr().unwrap_or(bind), "gateway listening");

    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("gateway shutting down");
        })
        .await
        .context("gateway server failed")
}
