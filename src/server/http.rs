//! Health endpoints
//!
//! Small hyper http1 server exposing liveness, readiness, and version
//! probes. Liveness is unconditional; readiness checks that the ledger
//! store answers a header read.

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::state::AppState;
use crate::types::Result;

/// Health response body
#[derive(Serialize)]
struct HealthResponse {
    healthy: bool,
    status: &'static str,
    version: &'static str,
    uptime: u64,
    node_id: String,
    timestamp: String,
    /// Whether the ledger store answered (readiness only)
    #[serde(skip_serializing_if = "Option::is_none")]
    ledger: Option<bool>,
}

#[derive(Serialize)]
struct VersionResponse {
    version: &'static str,
    service: &'static str,
}

fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Full<Bytes>> {
    let body = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"serialization failed"}"#.to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .expect("static response builds")
}

fn health_body(state: &AppState, ledger: Option<bool>) -> HealthResponse {
    HealthResponse {
        healthy: true,
        status: "online",
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.uptime_secs(),
        node_id: state.args.node_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ledger,
    }
}

/// Liveness probe (/health, /healthz): 200 whenever the process runs
fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &health_body(state, None))
}

/// Readiness probe (/ready, /readyz): 200 only when the ledger answers
async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let ledger_ok = state.store.read_header().await.is_ok();
    let status = if ledger_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &health_body(state, Some(ledger_ok)))
}

fn version_info() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &VersionResponse {
            version: env!("CARGO_PKG_VERSION"),
            service: "turnstile",
        },
    )
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/" | "/health" | "/healthz") => health_check(&state),
        (&Method::GET, "/ready" | "/readyz") => readiness_check(&state).await,
        (&Method::GET, "/version") => version_info(),
        _ => json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "error": "not found" }),
        ),
    };
    Ok(response)
}

/// Serve health probes until the process exits
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    info!("Health server listening on {}", state.args.listen);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}
