use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::{ApiError, AppState, SharedState, require_owner};
use crate::board::ProjectStore;
use crate::errors::BoardError;
use crate::events::PushEnvelope;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Who the connection belongs to and which project board it is watching.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushFilter {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
}

impl PushFilter {
    /// Whether a raw envelope from the push channel is meant for this
    /// connection. Unparseable envelopes are dropped.
    pub fn admits(&self, raw: &str) -> bool {
        serde_json::from_str::<PushEnvelope>(raw).is_ok_and(|envelope| {
            envelope
                .scope
                .reaches(self.user_id.as_deref(), self.project_id.as_deref())
        })
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(filter): Query<PushFilter>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_push(&state, &headers, &filter).await?;
    let rx = state.push.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx, filter)))
}

/// Naming a `user_id` requires the same identity in the `x-user-id` header;
/// anonymous connections only see broadcast envelopes. Watching a project
/// board requires the same access as reading it.
async fn authorize_push(
    state: &AppState,
    headers: &HeaderMap,
    filter: &PushFilter,
) -> Result<(), ApiError> {
    if let Some(user_id) = &filter.user_id {
        require_owner(headers, user_id)?;
    }

    if let Some(project_id) = &filter.project_id {
        let user_id = filter.user_id.clone().ok_or_else(|| {
            ApiError::Unauthorized("user_id is required to watch a project".into())
        })?;
        let project = ProjectStore::get_by_id(&state.db, project_id)
            .await?
            .ok_or_else(|| BoardError::ProjectNotFound {
                id: project_id.clone(),
            })?;
        if !project.has_access(&user_id) {
            return Err(BoardError::AccessDenied {
                user_id,
                project_id: project.id,
            }
            .into());
        }
    }
    Ok(())
}

async fn handle_socket(socket: WebSocket, rx: broadcast::Receiver<String>, filter: PushFilter) {
    tracing::debug!(
        user_id = ?filter.user_id,
        project_id = ?filter.project_id,
        "Push connection opened"
    );
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, &filter).await;
    tracing::debug!(user_id = ?filter.user_id, "Push connection closed");
}

/// Forward matching envelopes, answer the client, and keep the connection
/// alive with ping/pong. The loop exits if no Pong arrives within
/// [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
    filter: &PushFilter,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(raw) => {
                        if !filter.admits(&raw) {
                            continue;
                        }
                        if sender.send(Message::Text(raw.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Push connection lagging; envelopes dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
