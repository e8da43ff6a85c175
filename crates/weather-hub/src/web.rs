use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method, Uri};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::error::ListenerStartError;
use crate::ingest::{self, VendorFormat};
use crate::state::SharedState;

const ACK_BODY: &str = "<head></head><body>Successful data submission</body>\n";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Everything except the status API is treated as a vendor push.
///
/// The body limit is enforced by the extractor, so an oversized push reaches
/// the handler as a rejection and is still acknowledged.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .fallback(vendor_push)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

async fn vendor_push(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let path = uri.path();

    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!(%method, path, status = %e.status(), "push body rejected, ignoring: {e}");
            return ([(header::CONTENT_TYPE, "text/html")], ACK_BODY);
        }
    };

    match VendorFormat::from_path(path) {
        Some(format) => {
            // Some stations POST with an empty body and the fields in the query.
            let raw = if method == Method::POST && !body.is_empty() {
                String::from_utf8_lossy(&body).into_owned()
            } else {
                uri.query().unwrap_or_default().to_string()
            };

            let pairs = ingest::parse_payload(format, &raw);
            let mut st = state.write().await;
            ingest::ingest(&mut st, format, &pairs);
        }
        None => warn!(%method, path, "push from unrecognized vendor path, ignoring"),
    }

    ([(header::CONTENT_TYPE, "text/html")], ACK_BODY)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Run the ingestion listener until `stop` turns true (or its sender is
/// dropped). In-flight requests are allowed to finish.
pub async fn serve(
    state: SharedState,
    port: u16,
    mut stop: watch::Receiver<bool>,
) -> Result<(), ListenerStartError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ListenerStartError::Bind { port, source })?;

    info!(%addr, "ingestion listener started");

    let shutdown = async move {
        while !*stop.borrow_and_update() {
            if stop.changed().await.is_err() {
                break;
            }
        }
    };

    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("ingestion listener failed: {e}");
    }

    info!("ingestion listener stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
