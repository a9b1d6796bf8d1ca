//! WebSocket handler: authenticated event relay.
//!
//! DESIGN
//! ======
//! The session token is verified before the upgrade; a bad or missing token
//! gets an HTTP 401 and no state is created. After the upgrade the connection
//! is registered and enters a `select!` loop:
//! - Incoming text frames → parse into `Inbound` → dispatch to a service
//! - Events queued for this connection by room peers → write to the socket
//!
//! Inbound events are handled one at a time to completion, so events from one
//! connection reach every recipient in the order they were received. Services
//! do their own room fan-out under the room lock and hand back an `Outcome`
//! describing what, if anything, goes to the sender alone.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register → send `session:connected`
//! 2. Client sends events → dispatch → service returns Outcome or error
//! 3. Dispatch unicasts the reply, or an `error` event on failure
//! 4. Close → unsubscribe from rooms → presence announcements → cleanup

use std::collections::HashMap;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::EventError;
use crate::frame::{ErrorCode, Inbound, Outbound, parse_inbound};
use crate::services::auth::Identity;
use crate::services::board::{self, CardDraft};
use crate::services::registry::{self, Session};
use crate::services::{broadcast, ephemeral, message, presence};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// What the dispatch layer owes the sender once a service has finished.
/// Room-wide fan-out has already happened inside the service.
#[derive(Debug)]
enum Outcome {
    /// Unicast this event to the sender.
    Reply(Outbound),
    /// Nothing further for the sender.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .get("token")
        .map(String::as_str)
        .or_else(|| bearer_token(&headers));

    let identity = match registry::authenticate(&state, token).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, "ws: rejected unauthenticated connection");
            return (StatusCode::UNAUTHORIZED, Json(Outbound::error_from(&e, None))).into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.outbound_capacity);

    let mut session = match registry::connect(&state, &identity, tx).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, user_id = %identity.user_id, "ws: connection setup failed");
            let _ = send_event(&mut socket, &Outbound::error_from(&e, None)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    if send_event(&mut socket, &session.welcome()).await.is_ok() {
        info!(connection_id = %session.connection_id, user_id = %session.user_id(), "ws: client connected");

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Text(text) => process_inbound_text(&state, &mut session, text.as_str()).await,
                        Message::Binary(_) => {
                            let err = EventError::Validation("binary frames are not supported".into());
                            reply_error(&state, &session, &err, None).await;
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(event) = rx.recv() => {
                    if send_event(&mut socket, &event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    registry::disconnect(&state, &session).await;
}

// =============================================================================
// EVENT DISPATCH
// =============================================================================

/// Parse and process one inbound text frame.
///
/// Everything meant for the sender is queued on its outbound channel, so
/// tests can drive dispatch without a socket.
pub(crate) async fn process_inbound_text(state: &AppState, session: &mut Session, text: &str) {
    let inbound = match parse_inbound(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            reply_error(state, session, &e, None).await;
            return;
        }
    };

    let kind = inbound.kind();
    if !inbound.is_ephemeral() {
        info!(connection_id = %session.connection_id, event = kind, room_id = %inbound.room_id(), "ws: recv event");
    }

    match dispatch(state, session, inbound).await {
        Ok(Outcome::Reply(event)) => {
            broadcast::send_to_connection(state, session.connection_id, event).await;
        }
        Ok(Outcome::Done) => {}
        Err(e) => reply_error(state, session, &e, Some(kind)).await,
    }
}

async fn dispatch(state: &AppState, session: &mut Session, inbound: Inbound) -> Result<Outcome, EventError> {
    match inbound {
        Inbound::RoomJoin { room_id } => {
            presence::join_room(state, session, room_id).await?;
        }
        Inbound::RoomLeave { room_id } => presence::leave_room(state, session, room_id).await,
        Inbound::MessageSend { room_id, content, kind, metadata } => {
            message::send_message(state, session, room_id, content, kind, metadata).await?;
        }
        Inbound::MessageTyping { room_id, is_typing } => {
            ephemeral::set_typing(state, session, room_id, is_typing).await?;
        }
        Inbound::MessageRead { room_id } => message::mark_read(state, session, room_id).await?,
        Inbound::BoardLoad { room_id } => {
            let cards = board::load_snapshot(state, session, room_id).await?;
            return Ok(Outcome::Reply(Outbound::BoardState { room_id, cards }));
        }
        Inbound::CardCreate { room_id, kind, content, x, y, width, height } => {
            let draft = CardDraft { kind, content, x, y, width, height };
            board::create_card(state, session, room_id, draft).await?;
        }
        Inbound::CardMove { room_id, card_id, x, y } => {
            board::move_card(state, session, room_id, card_id, x, y).await?;
        }
        Inbound::CardResize { room_id, card_id, width, height } => {
            board::resize_card(state, session, room_id, card_id, width, height).await?;
        }
        Inbound::CardDelete { room_id, card_id } => {
            board::delete_card(state, session, room_id, card_id).await?;
        }
        Inbound::Cursor { room_id, x, y } => {
            ephemeral::update_cursor(state, session, room_id, x, y).await?;
        }
    }
    Ok(Outcome::Done)
}

async fn reply_error(state: &AppState, session: &Session, err: &EventError, event: Option<&str>) {
    let connection_id = session.connection_id;
    if matches!(err, EventError::Dependency(_)) {
        error!(%connection_id, event, error = %err, "ws: event failed");
    } else {
        warn!(%connection_id, event, code = err.error_code(), error = %err, "ws: event rejected");
    }
    broadcast::send_to_connection(state, connection_id, Outbound::error_from(err, event)).await;
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_event(socket: &mut WebSocket, event: &Outbound) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, kind = event.kind(), "ws: failed to serialize event");
            return Err(());
        }
    };
    if !matches!(event, Outbound::CursorUpdate { .. } | Outbound::UserTyping { .. }) {
        debug!(kind = event.kind(), "ws: send event");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
