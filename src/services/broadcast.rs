//! Broadcast router: room fan-out and unicast.
//!
//! DESIGN
//! ======
//! Delivery is a non-blocking `try_send` into each connection's bounded
//! outbound queue. A connection whose queue is full misses the event, with a
//! warning; the rest of the room is unaffected. A closed queue belongs to a
//! connection already on its disconnect path and is skipped quietly.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::frame::Outbound;
use crate::state::{AppState, RoomState};

/// Whether the originating connection receives its own event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every subscriber, sender included.
    Inclusive,
    /// Every subscriber except this connection.
    Exclusive(Uuid),
}

impl Delivery {
    fn skips(self, connection_id: Uuid) -> bool {
        matches!(self, Self::Exclusive(excluded) if excluded == connection_id)
    }
}

/// Fan an event out to a locked room. Returns the number of queues it reached.
pub fn deliver(room: &RoomState, event: &Outbound, delivery: Delivery) -> usize {
    let mut delivered = 0;
    for (connection_id, subscriber) in &room.subscribers {
        if delivery.skips(*connection_id) {
            continue;
        }
        if enqueue(&subscriber.tx, *connection_id, event.clone()) {
            delivered += 1;
        }
    }
    delivered
}

/// Fan an event out to a live room. Rooms with no live state reach nobody.
pub async fn broadcast_to_room(state: &AppState, room_id: Uuid, event: &Outbound, delivery: Delivery) -> usize {
    let Some(room) = state.existing_room(room_id).await else {
        return 0;
    };
    let room = room.lock().await;
    deliver(&room, event, delivery)
}

/// Unicast to one connection. Returns `false` if it is gone or its queue is full.
pub async fn send_to_connection(state: &AppState, connection_id: Uuid, event: Outbound) -> bool {
    let tx = {
        let registry = state.registry.read().await;
        let Some(connection) = registry.get(connection_id) else {
            debug!(%connection_id, kind = event.kind(), "unicast to unknown connection");
            return false;
        };
        connection.tx.clone()
    };
    enqueue(&tx, connection_id, event)
}

fn enqueue(tx: &tokio::sync::mpsc::Sender<Outbound>, connection_id: Uuid, event: Outbound) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            warn!(%connection_id, kind = event.kind(), "outbound queue full; event dropped");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
