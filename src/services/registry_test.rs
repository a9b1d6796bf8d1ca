use super::*;
use crate::state::test_helpers::{
    StaticVerifier, assert_no_event, connect, drain, recv_event, seed_user, test_app_state, test_config,
};
use crate::store::{Card, MemoryStore, MessageRecord, NewMessage, PresenceStatus, Store, StoreError, UserProfile};
use std::sync::Arc;
use std::time::Duration;

fn connection(user_id: Uuid) -> Connection {
    let (tx, _rx) = mpsc::channel(1);
    Connection { user_id, display_name: "Ada".into(), tx }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[test]
fn first_connection_comes_online_and_last_goes_offline() {
    let mut registry = Registry::new();
    let user = Uuid::new_v4();
    let (phone, laptop) = (Uuid::new_v4(), Uuid::new_v4());

    assert!(registry.register(phone, connection(user)));
    assert!(!registry.register(laptop, connection(user)));
    assert_eq!(registry.user_connection_count(user), 2);
    assert_eq!(registry.connection_count(), 2);

    assert_eq!(registry.unregister(phone), Some(1));
    assert!(registry.is_online(user));
    assert_eq!(registry.unregister(laptop), Some(0));
    assert!(!registry.is_online(user));
    assert_eq!(registry.connection_count(), 0);
}

#[test]
fn unregistering_unknown_connection_is_none() {
    let mut registry = Registry::new();
    let id = Uuid::new_v4();
    registry.register(id, connection(Uuid::new_v4()));

    assert_eq!(registry.unregister(Uuid::new_v4()), None);
    assert_eq!(registry.unregister(id), Some(0));
    assert_eq!(registry.unregister(id), None);
}

// =============================================================================
// AUTHENTICATE
// =============================================================================

#[tokio::test]
async fn authenticate_requires_a_token() {
    let (state, _, _) = test_app_state();

    assert!(matches!(authenticate(&state, None).await, Err(AuthError::MissingToken)));
    assert!(matches!(authenticate(&state, Some("   ")).await, Err(AuthError::MissingToken)));
}

#[tokio::test]
async fn authenticate_defers_to_the_verifier() {
    let (state, store, verifier) = test_app_state();
    let alice = seed_user(&store, "Alice");
    verifier.insert("t-alice", alice.clone());

    assert_eq!(authenticate(&state, Some("t-alice")).await.unwrap(), alice);
    assert!(matches!(authenticate(&state, Some("t-mallory")).await, Err(AuthError::InvalidToken(_))));
}

// =============================================================================
// CONNECT / DISCONNECT
// =============================================================================

#[tokio::test]
async fn connect_subscribes_every_member_room() {
    let (state, store, _) = test_app_state();
    let alice = seed_user(&store, "Alice");
    let (general, random) = (Uuid::new_v4(), Uuid::new_v4());
    store.add_member(general, alice.user_id);
    store.add_member(random, alice.user_id);

    let (session, mut rx) = connect(&state, &alice).await;

    assert_eq!(session.rooms, HashSet::from([general, random]));
    assert_eq!(session.memberships, session.rooms);
    let mut expected = vec![general, random];
    expected.sort_unstable();
    assert_eq!(
        session.welcome(),
        Outbound::SessionConnected {
            connection_id: session.connection_id,
            user_id: alice.user_id,
            display_name: "Alice".into(),
            rooms: expected,
        }
    );

    // Coming online is announced to each member room, the user included.
    let kinds: Vec<&str> = drain(&mut rx).iter().map(Outbound::kind).collect();
    assert_eq!(kinds, vec!["presence:online", "presence:online"]);
    assert_eq!(store.presence(alice.user_id), Some(PresenceStatus::Online));
}

#[tokio::test]
async fn connect_failure_leaves_no_state() {
    let (state, store, _) = test_app_state();
    let alice = seed_user(&store, "Alice");
    store.add_member(Uuid::new_v4(), alice.user_id);
    store.set_failing(true);

    let (tx, _rx) = mpsc::channel(8);
    let err = super::connect(&state, &alice, tx).await.unwrap_err();

    assert!(matches!(err, EventError::Dependency(_)));
    assert_eq!(state.registry.read().await.connection_count(), 0);
    assert!(state.rooms.read().await.is_empty());
}

#[tokio::test]
async fn second_device_is_silent_and_last_disconnect_goes_offline() {
    let (state, store, _) = test_app_state();
    let room = Uuid::new_v4();
    let alice = seed_user(&store, "Alice");
    let bob = seed_user(&store, "Bob");
    store.add_member(room, alice.user_id);
    store.add_member(room, bob.user_id);

    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    let (phone, _phone_rx) = connect(&state, &alice).await;
    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::PresenceOnline { room_id: room, user_id: alice.user_id, display_name: "Alice".into() }
    );

    let (laptop, _laptop_rx) = connect(&state, &alice).await;
    assert_no_event(&mut bob_rx).await;

    disconnect(&state, &phone).await;
    assert_no_event(&mut bob_rx).await;
    assert!(state.registry.read().await.is_online(alice.user_id));

    disconnect(&state, &laptop).await;
    assert_eq!(
        recv_event(&mut bob_rx).await,
        Outbound::PresenceOffline { room_id: room, user_id: alice.user_id, display_name: "Alice".into() }
    );
    assert_no_event(&mut bob_rx).await;
    assert!(!state.registry.read().await.is_online(alice.user_id));
    assert_eq!(store.presence(alice.user_id), Some(PresenceStatus::Offline));
}

#[tokio::test]
async fn last_connection_out_evicts_the_room() {
    let (state, store, _) = test_app_state();
    let room = Uuid::new_v4();
    let alice = seed_user(&store, "Alice");
    store.add_member(room, alice.user_id);

    let (session, _rx) = connect(&state, &alice).await;
    assert!(state.existing_room(room).await.is_some());

    disconnect(&state, &session).await;
    assert!(state.existing_room(room).await.is_none());
    assert_eq!(state.registry.read().await.connection_count(), 0);
}

// =============================================================================
// CHURN
// =============================================================================

/// Memory store whose offline presence writes stall.
struct SlowOfflineStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait::async_trait]
impl Store for SlowOfflineStore {
    async fn room_memberships(&self, user_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        self.inner.room_memberships(user_id).await
    }

    async fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        self.inner.is_member(room_id, user_id).await
    }

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        self.inner.user_profile(user_id).await
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        self.inner.insert_message(message).await
    }

    async fn touch_room(&self, room_id: Uuid) -> Result<(), StoreError> {
        self.inner.touch_room(room_id).await
    }

    async fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.inner.mark_read(room_id, user_id).await
    }

    async fn list_cards(&self, room_id: Uuid) -> Result<Vec<Card>, StoreError> {
        self.inner.list_cards(room_id).await
    }

    async fn insert_card(&self, card: &Card) -> Result<(), StoreError> {
        self.inner.insert_card(card).await
    }

    async fn update_card_position(&self, room_id: Uuid, card_id: Uuid, x: f64, y: f64) -> Result<bool, StoreError> {
        self.inner.update_card_position(room_id, card_id, x, y).await
    }

    async fn update_card_size(
        &self,
        room_id: Uuid,
        card_id: Uuid,
        width: f64,
        height: f64,
    ) -> Result<bool, StoreError> {
        self.inner.update_card_size(room_id, card_id, width, height).await
    }

    async fn delete_card(&self, room_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        self.inner.delete_card(room_id, card_id).await
    }

    async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) -> Result<(), StoreError> {
        if status == PresenceStatus::Offline {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.set_presence(user_id, status).await
    }
}

fn kinds(events: &[Outbound]) -> Vec<&'static str> {
    events.iter().map(Outbound::kind).collect()
}

#[tokio::test]
async fn reconnect_during_offline_announcement_ends_online() {
    let memory = Arc::new(MemoryStore::new());
    let store = Arc::new(SlowOfflineStore { inner: memory.clone(), delay: Duration::from_millis(100) });
    let state = AppState::new(store, Arc::new(StaticVerifier::default()), &test_config());
    let room = Uuid::new_v4();
    let alice = seed_user(&memory, "Alice");
    let bob = seed_user(&memory, "Bob");
    memory.add_member(room, alice.user_id);
    memory.add_member(room, bob.user_id);

    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    let (first, _first_rx) = connect(&state, &alice).await;
    drain(&mut bob_rx);

    let leaving = {
        let state = state.clone();
        tokio::spawn(async move { disconnect(&state, &first).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (_second, _second_rx) = connect(&state, &alice).await;
    leaving.await.unwrap();

    assert_eq!(kinds(&drain(&mut bob_rx)), vec!["presence:offline", "presence:online"]);
    assert!(state.registry.read().await.is_online(alice.user_id));
    assert_eq!(memory.presence(alice.user_id), Some(PresenceStatus::Online));
    assert_eq!(state.presence_locks.tracked(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_device_churn_alternates_presence() {
    let (state, store, _) = test_app_state();
    let room = Uuid::new_v4();
    let alice = seed_user(&store, "Alice");
    let bob = seed_user(&store, "Bob");
    store.add_member(room, alice.user_id);
    store.add_member(room, bob.user_id);
    let (_bob_session, mut bob_rx) = connect(&state, &bob).await;
    drain(&mut bob_rx);

    let devices: Vec<_> = (0..8)
        .map(|i| {
            let state = state.clone();
            let alice = alice.clone();
            tokio::spawn(async move {
                for _ in 0..3 {
                    let (session, _rx) = connect(&state, &alice).await;
                    tokio::time::sleep(Duration::from_millis(i % 3)).await;
                    disconnect(&state, &session).await;
                }
            })
        })
        .collect();
    for device in devices {
        device.await.unwrap();
    }

    let seen = kinds(&drain(&mut bob_rx));
    assert!(!seen.is_empty());
    for (i, kind) in seen.iter().enumerate() {
        let expected = if i % 2 == 0 { "presence:online" } else { "presence:offline" };
        assert_eq!(*kind, expected, "presence events out of order: {seen:?}");
    }
    assert_eq!(seen.last(), Some(&"presence:offline"));
    assert!(!state.registry.read().await.is_online(alice.user_id));
    assert_eq!(store.presence(alice.user_id), Some(PresenceStatus::Offline));
    assert_eq!(state.presence_locks.tracked(), 0);
}
