//! Inbound WhatsApp webhook.
//!
//! `POST /webhook/wa` runs the message through the conversation handler and
//! forwards the reply to the relay. Each request is handled to completion in
//! its own task; there is no queue and no deduplication by message id.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chatbot::context::RequestContext;
use crate::chatbot::engine::ConversationHandler;
use crate::chatbot::message::WebhookPayload;
use crate::chatbot::relay::{self, RelayClient};
use crate::groq;

/// How long in-flight requests get to finish after a shutdown signal.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const CORS_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, GET, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
];

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<ConversationHandler>,
    pub relay: Arc<RelayClient>,
    /// Deadline for handling one inbound message.
    pub request_timeout: Duration,
}

/// Ways a webhook request can fail.
#[derive(Debug)]
pub enum WebhookError {
    InvalidPayload(serde_json::Error),
    Handle(groq::Error),
    Forward(relay::Error),
}

impl std::fmt::Display for WebhookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookError::InvalidPayload(e) => write!(f, "invalid payload: {e}"),
            WebhookError::Handle(e) => write!(f, "error processing message: {e}"),
            WebhookError::Forward(e) => write!(f, "error sending response: {e}"),
        }
    }
}

impl std::error::Error for WebhookError {}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebhookError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "Invalid payload"),
            WebhookError::Handle(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error processing message")
            }
            WebhookError::Forward(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error sending response")
            }
        };
        (status, CORS_HEADERS, message).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/wa", post(handle_webhook).options(preflight))
        .route("/test", get(liveness))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, CORS_HEADERS)
}

async fn liveness() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "Webhook server is running")
}

async fn handle_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!("Rejected webhook payload: {e}: {}", String::from_utf8_lossy(&body));
        WebhookError::InvalidPayload(e)
    })?;

    info!(
        "📨 Message {} from {} ({}): {}",
        payload.message.id, payload.from, payload.pushname, payload.message.text
    );

    let ctx = RequestContext::background().with_timeout(state.request_timeout);
    let reply = state
        .handler
        .handle(&ctx, &payload.message.text)
        .await
        .map_err(|e| {
            error!("Error processing message: {e}");
            WebhookError::Handle(e)
        })?;

    state
        .relay
        .send_message(&payload.from, &reply.text)
        .await
        .map_err(|e| {
            error!("Error sending WhatsApp response: {e}");
            WebhookError::Forward(e)
        })?;

    Ok((StatusCode::OK, CORS_HEADERS))
}

/// Serve until `shutdown` resolves, then drain for at most [`DRAIN_TIMEOUT`]
/// before dropping the remaining connections.
pub async fn serve<S>(listener: TcpListener, state: AppState, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let draining = Arc::new(Notify::new());
    let signal = {
        let draining = draining.clone();
        async move {
            shutdown.await;
            draining.notify_one();
        }
    };

    let app = router(state);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app).with_graceful_shutdown(signal).await
    });

    tokio::select! {
        res = &mut server => return flatten(res),
        _ = draining.notified() => info!("Draining in-flight requests..."),
    }

    match tokio::time::timeout(DRAIN_TIMEOUT, &mut server).await {
        Ok(res) => flatten(res),
        Err(_) => {
            warn!("Graceful shutdown did not complete in {DRAIN_TIMEOUT:?}, forcing close");
            server.abort();
            Ok(())
        }
    }
}

fn flatten(res: Result<std::io::Result<()>, tokio::task::JoinError>) -> std::io::Result<()> {
    res.map_err(std::io::Error::other)?
}
