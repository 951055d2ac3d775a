//! API routes for the prism server

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Multipart, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::job::JobRecord;
use crate::progress::JobObserver;
use crate::router::Lane;
use crate::tools::{ToolRegistry, ToolSpec};
use crate::worker::WorkerPool;

/// Application state
pub struct AppState {
    pub pool: WorkerPool,
    pub observer: JobObserver,
    pub registry: Arc<ToolRegistry>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Job creation response
#[derive(Serialize)]
pub struct InvokeResponse {
    pub status: String,
    pub job_id: String,
    pub lane: Lane,
}

/// JSON error body with a status code
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}

pub async fn root() -> impl IntoResponse {
    Json(json!({"message": "prism visual agent server"}))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Registered tools
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<ToolSpec>> {
    Json(state.registry.specs().to_vec())
}

/// Accept a multipart `prompt` + `image` and queue the job
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<InvokeResponse>, ApiError> {
    let mut prompt: Option<String> = None;
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("prompt") => {
                prompt = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("unreadable prompt: {}", e)))?,
                );
            }
            Some("image") => {
                image = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("unreadable image: {}", e)))?
                        .to_vec(),
                );
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    let prompt = prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing 'prompt' field"))?;
    let image = image
        .filter(|i| !i.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing 'image' field"))?;

    let ticket = state.pool.submit(&prompt, image).await.map_err(|e| {
        error!("Job submission failed: {:#}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "job submission failed")
    })?;

    Ok(Json(InvokeResponse {
        status: "processing".to_string(),
        job_id: ticket.job_id,
        lane: ticket.lane,
    }))
}

/// Current record for a job
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, ApiError> {
    let store = state.pool.orchestrator().store();
    match store.get(&job_id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no job with id {}", job_id),
        )),
        Err(e) => {
            error!("Job lookup failed: {}", e);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "job lookup failed"))
        }
    }
}

/// WebSocket observation channel for one job
pub async fn watch_job(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let observer = state.observer.clone();
    ws.on_upgrade(move |socket| stream_frames(socket, observer, job_id))
}

async fn stream_frames(socket: WebSocket, observer: JobObserver, job_id: String) {
    info!(job_id = %job_id, "Observer connected");
    let (mut sender, mut receiver) = socket.split();
    let mut frames = observer.watch(&job_id);

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let terminal = frame.is_terminal();
                if sender.send(Message::Text(frame.to_json().to_string())).await.is_err() {
                    break;
                }
                if terminal {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
            incoming = receiver.next() => {
                // the client only ever closes; anything else is ignored
                match incoming {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // the job itself keeps running
    info!(job_id = %job_id, "Observer disconnected");
}
