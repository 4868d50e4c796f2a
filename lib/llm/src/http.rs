// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface expected by the hosting platform.
//!
//! - `GET /ping`: 200 once the worker is READY, 503 before; body is the phase.
//! - `POST /invocations`: see [`crate::protocols`].

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::handler::{RequestError, ServerState};

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            RequestError::Malformed(_) => StatusCode::BAD_REQUEST,
            RequestError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            RequestError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("{self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/invocations", post(invocations_handler))
        .with_state(state)
}

async fn ping_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let phase = state.phase();
    let status = if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, phase.to_string())
}

async fn invocations_handler(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> Result<Response, RequestError> {
    let span = tracing::info_span!("invocation", request_id = %uuid::Uuid::new_v4());
    let response = state.invoke(&body).instrument(span).await?;
    Ok(Json(response).into_response())
}

/// Serve on an already bound listener until `cancel_token` fires.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "HTTP server listening");

    let observer = cancel_token.child_token();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(observer.cancelled_owned())
        .await
        .inspect_err(|_| cancel_token.cancel())?;
    Ok(())
}

/// Bind the listener for `host:port`. Callers bind before startup so a taken
/// port fails fast.
pub async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let address = format!("{host}:{port}");
    TcpListener::bind(&address).await.map_err(|e| {
        tracing::error!("Failed to bind to address {address}: {e}");
        anyhow::anyhow!("failed to bind to {address}: {e}")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tempfile::TempDir;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use crate::coordinator::WorkerPhase;
    use crate::engine::EngineBuilder;
    use crate::engine::tests::{spec, write_model};

    async fn ready_state() -> (Arc<ServerState>, TempDir) {
        let dir = TempDir::new().unwrap();
        write_model(dir.path());
        let handle = EngineBuilder::from_name("echo")
            .unwrap()
            .build(spec(dir.path()))
            .await
            .unwrap();
        (Arc::new(ServerState::ready(handle)), dir)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn invocation(body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/invocations")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping_reports_phase() {
        let (tx, rx) = watch::channel(WorkerPhase::Fetching);
        let app = router(Arc::new(ServerState::new(rx)));

        let ping = || Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let (status, body) = call(app.clone(), ping()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "FETCHING");

        tx.send_replace(WorkerPhase::Constructing);
        let (_, body) = call(app, ping()).await;
        assert_eq!(body, "CONSTRUCTING");

        let (state, _dir) = ready_state().await;
        let (status, body) = call(router(state), ping()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn test_invocations() {
        let (state, _dir) = ready_state().await;
        let app = router(state);

        let (status, body) = call(app.clone(), invocation("")).await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "{}"));

        let (status, body) = call(
            app.clone(),
            invocation(r#"{"input": ["hello world", "shard"], "padding": true}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"generated_text":["hello world","shard"]}"#);

        let (status, body) = call(
            app.clone(),
            invocation(r#"{"input": "hello world", "max_new_tokens": 1}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"generated_text":"hello"}"#);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (state, _dir) = ready_state().await;
        let app = router(state);

        let (status, body) = call(app.clone(), invocation("{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("error"), "{body}");

        let (status, _) = call(
            app.clone(),
            invocation(r#"{"input": "x", "min_length": 4, "max_length": 2}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = call(app, invocation(r#"{"input": "x", "temperature": -1}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_invocations_before_ready() {
        let (_tx, rx) = watch::channel(WorkerPhase::BarrierWait);
        let app = router(Arc::new(ServerState::new(rx)));

        let (status, body) = call(app, invocation(r#"{"input": "x"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("BARRIER_WAIT"), "{body}");
    }

    #[tokio::test]
    async fn test_bind_reports_taken_port() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(err.to_string().contains("failed to bind"), "{err}");
        assert!(err.to_string().contains(&port.to_string()), "{err}");
    }

    #[tokio::test]
    async fn test_serve_shuts_down_on_cancel() {
        let (state, _dir) = ready_state().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cancel = CancellationToken::new();

        let server = tokio::spawn(serve(listener, state, cancel.clone()));
        cancel.cancel();
        server.await.unwrap().unwrap();
    }
}
