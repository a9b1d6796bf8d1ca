use super::*;
use crate::services::ephemeral;
use crate::services::registry;
use crate::state::test_helpers::{assert_no_event, connect, drain, recv_event, seed_user, test_app_state};
use crate::store::MemoryStore;
use std::sync::Arc;

struct Room {
    state: AppState,
    store: Arc<MemoryStore>,
    room_id: Uuid,
    alice: Identity,
    bob: Identity,
}

fn room_with_alice_and_bob() -> Room {
    let (state, store, _) = test_app_state();
    let room_id = Uuid::new_v4();
    let alice = seed_user(&store, "Alice");
    let bob = seed_user(&store, "Bob");
    store.add_member(room_id, alice.user_id);
    store.add_member(room_id, bob.user_id);
    Room { state, store, room_id, alice, bob }
}

#[tokio::test]
async fn join_requires_membership() {
    let Room { state, store, room_id, .. } = room_with_alice_and_bob();
    let carol = seed_user(&store, "Carol");
    let (mut session, _rx) = connect(&state, &carol).await;

    let err = join_room(&state, &mut session, room_id).await.unwrap_err();
    assert!(matches!(err, EventError::NotMember(id) if id == room_id));
    assert!(session.rooms.is_empty());
}

#[tokio::test]
async fn rejoin_announces_once_and_repeat_join_is_a_no_op() {
    let Room { state, room_id, alice, bob, .. } = room_with_alice_and_bob();
    let (mut alice_session, mut alice_rx) = connect(&state, &alice).await;
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    leave_room(&state, &mut alice_session, room_id).await;
    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::UserLeft { room_id, user_id: alice.user_id, display_name: "Alice".into() }
    );
    assert!(!alice_session.rooms.contains(&room_id));

    let joined = join_room(&state, &mut alice_session, room_id).await.unwrap();
    assert_eq!(joined, Subscription::UserEntered);
    let expected = Outbound::UserJoined { room_id, user_id: alice.user_id, display_name: "Alice".into() };
    assert_eq!(recv_event(&mut bob_rx).await, expected);
    assert_eq!(recv_event(&mut alice_rx).await, expected);

    assert_eq!(join_room(&state, &mut alice_session, room_id).await.unwrap(), Subscription::Already);
    assert_no_event(&mut bob_rx).await;
    assert_no_event(&mut alice_rx).await;
}

#[tokio::test]
async fn leaving_a_room_not_joined_is_a_no_op() {
    let Room { state, room_id, alice, bob, .. } = room_with_alice_and_bob();
    let (mut alice_session, _alice_rx) = connect(&state, &alice).await;
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    leave_room(&state, &mut alice_session, room_id).await;
    drain(&mut bob_rx);
    leave_room(&state, &mut alice_session, room_id).await;
    leave_room(&state, &mut alice_session, Uuid::new_v4()).await;
    assert_no_event(&mut bob_rx).await;
}

#[tokio::test]
async fn user_left_waits_for_the_last_connection_in_the_room() {
    let Room { state, room_id, alice, bob, .. } = room_with_alice_and_bob();
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    let (mut phone, _phone_rx) = connect(&state, &alice).await;
    let (mut laptop, _laptop_rx) = connect(&state, &alice).await;
    drain(&mut bob_rx);

    leave_room(&state, &mut phone, room_id).await;
    assert_no_event(&mut bob_rx).await;

    leave_room(&state, &mut laptop, room_id).await;
    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::UserLeft { room_id, user_id: alice.user_id, display_name: "Alice".into() }
    );
}

#[tokio::test]
async fn leaving_clears_the_cursor_before_announcing() {
    let Room { state, room_id, alice, bob, .. } = room_with_alice_and_bob();
    let (mut alice_session, _alice_rx) = connect(&state, &alice).await;
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    ephemeral::update_cursor(&state, &alice_session, room_id, 4.0, 2.0).await.unwrap();
    assert_eq!(recv_event(&mut bob_rx).await.kind(), "board:cursor:update");

    leave_room(&state, &mut alice_session, room_id).await;
    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::CursorLeave { room_id, connection_id: alice_session.connection_id, user_id: alice.user_id }
    );
    assert_eq!(recv_event(&mut bob_rx).await.kind(), "user:left");
}

#[tokio::test]
async fn disconnect_drops_cursor_and_goes_offline() {
    let Room { state, room_id, alice, bob, .. } = room_with_alice_and_bob();
    let (alice_session, _alice_rx) = connect(&state, &alice).await;
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    ephemeral::update_cursor(&state, &alice_session, room_id, 1.0, 1.0).await.unwrap();
    drain(&mut bob_rx);

    registry::disconnect(&state, &alice_session).await;
    assert_eq!(recv_event(&mut bob_rx).await.kind(), "board:cursor:leave");
    assert_eq!(recv_event(&mut bob_rx).await.kind(), "presence:offline");
    assert_no_event(&mut bob_rx).await;
}

#[tokio::test]
async fn offline_is_announced_even_when_presence_cannot_be_persisted() {
    let Room { state, store, room_id, alice, bob } = room_with_alice_and_bob();
    let (alice_session, _alice_rx) = connect(&state, &alice).await;
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    store.set_failing(true);
    registry::disconnect(&state, &alice_session).await;

    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::PresenceOffline { room_id, user_id: alice.user_id, display_name: "Alice".into() }
    );
    assert_eq!(store.presence(alice.user_id), Some(PresenceStatus::Online));
}

#[test]
fn sorted_orders_room_ids() {
    let rooms: HashSet<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let ordered = sorted(&rooms);
    assert_eq!(ordered.len(), 5);
    assert!(ordered.windows(2).all(|pair| pair[0] < pair[1]));
}
