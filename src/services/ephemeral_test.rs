use super::*;
use crate::config::Config;
use crate::services::{presence, registry};
use crate::state::test_helpers::{
    assert_no_event, connect, drain, recv_event, seed_user, test_app_state, test_app_state_with,
};
use crate::store::MemoryStore;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Pair {
    state: AppState,
    room_id: Uuid,
    alice: Session,
    alice_rx: mpsc::Receiver<Outbound>,
    bob_rx: mpsc::Receiver<Outbound>,
}

async fn pair_in(state: AppState, store: Arc<MemoryStore>) -> Pair {
    let room_id = Uuid::new_v4();
    let alice = seed_user(&store, "Alice");
    let bob = seed_user(&store, "Bob");
    store.add_member(room_id, alice.user_id);
    store.add_member(room_id, bob.user_id);
    let (alice, mut alice_rx) = connect(&state, &alice).await;
    let (_bob, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);
    Pair { state, room_id, alice, alice_rx, bob_rx }
}

async fn pair() -> Pair {
    let (state, store, _) = test_app_state();
    pair_in(state, store).await
}

#[tokio::test]
async fn cursor_reaches_everyone_but_the_sender() {
    let mut p = pair().await;

    update_cursor(&p.state, &p.alice, p.room_id, 12.5, 40.0).await.unwrap();

    assert_eq!(
        recv_event(&mut p.bob_rx).await,
        Outbound::CursorUpdate {
            room_id: p.room_id,
            connection_id: p.alice.connection_id,
            user_id: p.alice.user_id(),
            display_name: "Alice".into(),
            x: 12.5,
            y: 40.0,
        }
    );
    assert_no_event(&mut p.alice_rx).await;

    let room = p.state.existing_room(p.room_id).await.unwrap();
    assert!(room.lock().await.cursors.contains(&p.alice.connection_id));
}

#[tokio::test]
async fn cursor_rejects_non_members_and_bad_coordinates() {
    let mut p = pair().await;

    let err = update_cursor(&p.state, &p.alice, Uuid::new_v4(), 1.0, 1.0).await.unwrap_err();
    assert!(matches!(err, EventError::NotMember(_)));
    let err = update_cursor(&p.state, &p.alice, p.room_id, f64::NAN, 1.0).await.unwrap_err();
    assert!(matches!(err, EventError::Validation(_)));
    assert_no_event(&mut p.bob_rx).await;
}

#[tokio::test]
async fn throttled_cursor_updates_are_dropped_silently() {
    let config = Config::from_lookup(|key| match key {
        "JWT_SECRET" => Some("test-secret".to_owned()),
        "CURSOR_MIN_INTERVAL_MS" => Some("60000".to_owned()),
        _ => None,
    })
    .unwrap();
    let (state, store, _) = test_app_state_with(&config);
    let mut p = pair_in(state, store).await;

    update_cursor(&p.state, &p.alice, p.room_id, 1.0, 1.0).await.unwrap();
    update_cursor(&p.state, &p.alice, p.room_id, 2.0, 2.0).await.unwrap();

    assert!(matches!(recv_event(&mut p.bob_rx).await, Outbound::CursorUpdate { x, .. } if x == 1.0));
    assert_no_event(&mut p.bob_rx).await;
}

#[tokio::test]
async fn throttle_is_kept_per_room() {
    let config = Config::from_lookup(|key| match key {
        "JWT_SECRET" => Some("test-secret".to_owned()),
        "CURSOR_MIN_INTERVAL_MS" => Some("60000".to_owned()),
        _ => None,
    })
    .unwrap();
    let (state, store, _) = test_app_state_with(&config);
    let (general, random) = (Uuid::new_v4(), Uuid::new_v4());
    let alice = seed_user(&store, "Alice");
    let bob = seed_user(&store, "Bob");
    for room in [general, random] {
        store.add_member(room, alice.user_id);
        store.add_member(room, bob.user_id);
    }
    let (alice, _alice_rx) = connect(&state, &alice).await;
    let (_bob, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    update_cursor(&state, &alice, general, 1.0, 1.0).await.unwrap();
    update_cursor(&state, &alice, random, 2.0, 2.0).await.unwrap();

    let rooms: Vec<Uuid> = drain(&mut bob_rx)
        .into_iter()
        .filter_map(|event| match event {
            Outbound::CursorUpdate { room_id, .. } => Some(room_id),
            _ => None,
        })
        .collect();
    assert_eq!(rooms, vec![general, random]);
}

#[tokio::test]
async fn cursor_after_leaving_is_dropped() {
    let mut p = pair().await;
    presence::leave_room(&p.state, &mut p.alice, p.room_id).await;
    assert_eq!(recv_event(&mut p.bob_rx).await.kind(), "user:left");

    update_cursor(&p.state, &p.alice, p.room_id, 5.0, 5.0).await.unwrap();
    assert_no_event(&mut p.bob_rx).await;
    let room = p.state.existing_room(p.room_id).await.unwrap();
    assert!(room.lock().await.cursors.is_empty());

    registry::disconnect(&p.state, &p.alice).await;
    assert_eq!(recv_event(&mut p.bob_rx).await.kind(), "presence:offline");
    assert_no_event(&mut p.bob_rx).await;
}

#[tokio::test]
async fn typing_reaches_everyone_but_the_sender() {
    let mut p = pair().await;

    set_typing(&p.state, &p.alice, p.room_id, true).await.unwrap();
    set_typing(&p.state, &p.alice, p.room_id, false).await.unwrap();

    let expected = |is_typing| Outbound::UserTyping {
        room_id: p.room_id,
        user_id: p.alice.user_id(),
        display_name: "Alice".into(),
        is_typing,
    };
    assert_eq!(recv_event(&mut p.bob_rx).await, expected(true));
    assert_eq!(recv_event(&mut p.bob_rx).await, expected(false));
    assert_no_event(&mut p.alice_rx).await;
}

#[tokio::test]
async fn typing_requires_membership() {
    let mut p = pair().await;

    let err = set_typing(&p.state, &p.alice, Uuid::new_v4(), true).await.unwrap_err();
    assert!(matches!(err, EventError::NotMember(_)));
    assert_no_event(&mut p.bob_rx).await;
}
