#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chatsync_domain::{MessageId, MessageKind, Role, RoomId, UserId};
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::ClientConfig;
use crate::error::{SessionError, TransportError};
use crate::events::{ClientEvent, EventBus, RoomChange};
use crate::loopback::LoopbackBackend;
use crate::pagination::LoadOlder;
use crate::session::{RoomSessionState, SessionManager};
use crate::store::{SharedStore, StoreState};
use crate::transport::Credentials;

const ROOM: RoomId = RoomId(1);
const ME: Credentials = Credentials { user_id: UserId(1) };
const OTHER: UserId = UserId(2);

struct Harness {
	backend: LoopbackBackend,
	manager: SessionManager,
	store: SharedStore,
	events: broadcast::Receiver<ClientEvent>,
}

fn harness(config: ClientConfig) -> Harness {
	let backend = LoopbackBackend::new();
	backend.add_room(ROOM, "general");
	backend.add_member(ROOM, ME.user_id, "me", Role::Member);
	backend.add_member(ROOM, OTHER, "other", Role::Admin);

	let store = StoreState::shared();
	let bus = EventBus::new(64);
	let events = bus.subscribe();
	let manager = SessionManager::new(
		Arc::new(config),
		Arc::new(backend.clone()),
		Arc::new(backend.clone()),
		Arc::clone(&store),
		bus,
	);

	Harness {
		backend,
		manager,
		store,
		events,
	}
}

async fn wait_for(rx: &mut broadcast::Receiver<ClientEvent>, pred: impl Fn(&ClientEvent) -> bool) -> ClientEvent {
	timeout(Duration::from_secs(2), async {
		loop {
			match rx.recv().await {
				Ok(ev) if pred(&ev) => return ev,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(e) => panic!("event bus closed: {e}"),
			}
		}
	})
	.await
	.expect("timed out waiting for event")
}

fn ids(store: &SharedStore) -> Vec<u64> {
	store
		.lock()
		.room(ROOM)
		.map(|room| room.log.as_slice().iter().map(|m| m.id.get()).collect())
		.unwrap_or_default()
}

#[tokio::test]
async fn concurrent_opens_share_one_session() {
	let h = harness(ClientConfig::default());
	h.backend.set_connect_delay(Some(Duration::from_millis(30)));

	let opens = (0..5).map(|_| h.manager.open_room(ROOM, ME));
	let results = futures::future::join_all(opens).await;

	let first = results[0].clone().unwrap();
	for r in &results {
		assert_eq!(r.as_ref().unwrap(), &first);
	}
	assert_eq!(h.backend.connect_count(), 1);
	assert_eq!(h.backend.open_session_count(ROOM), 1);
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Ready);

	// Ready rooms resolve without reconnecting.
	h.manager.open_room(ROOM, ME).await.unwrap();
	assert_eq!(h.backend.connect_count(), 1);
}

#[tokio::test]
async fn connect_failure_leaves_room_absent() {
	let h = harness(ClientConfig::default());
	h.backend.set_fail_connect(true);

	let err = h.manager.open_room(ROOM, ME).await.unwrap_err();
	assert!(matches!(
		err,
		SessionError::Connection {
			source: TransportError::Connect(_),
			..
		}
	));
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Absent);

	h.backend.set_fail_connect(false);
	h.manager.open_room(ROOM, ME).await.unwrap();
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Ready);
}

#[tokio::test]
async fn fetch_failure_tears_down_partial_session() {
	let h = harness(ClientConfig::default());
	h.backend.set_fail_fetch(true);

	let err = h.manager.open_room(ROOM, ME).await.unwrap_err();
	assert!(matches!(err, SessionError::InitFetch { room_id: ROOM, .. }));
	assert_eq!(h.backend.open_session_count(ROOM), 0);
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Absent);
	assert!(!h.store.lock().contains(ROOM));
}

#[tokio::test]
async fn subscribe_failure_is_a_connection_error() {
	let h = harness(ClientConfig::default());
	h.backend.set_fail_subscribe(true);

	let err = h.manager.open_room(ROOM, ME).await.unwrap_err();
	assert!(matches!(
		err,
		SessionError::Connection {
			source: TransportError::Subscribe { .. },
			..
		}
	));
	assert_eq!(h.backend.open_session_count(ROOM), 0);
	assert_eq!(h.backend.fetch_count(), 0);
}

#[tokio::test]
async fn close_room_disconnects_and_discards_state() {
	let mut h = harness(ClientConfig::default());
	h.manager.open_room(ROOM, ME).await.unwrap();

	assert!(h.manager.close_room(ROOM).await);
	assert_eq!(h.backend.open_session_count(ROOM), 0);
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Closed);
	assert!(!h.store.lock().contains(ROOM));
	wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::RoomClosed { room_id: ROOM })).await;

	assert!(!h.manager.close_room(ROOM).await);
}

#[tokio::test]
async fn close_during_connect_discards_the_open() {
	let h = harness(ClientConfig::default());
	h.backend.set_connect_delay(Some(Duration::from_millis(50)));

	let opening = {
		let manager = h.manager.clone();
		tokio::spawn(async move { manager.open_room(ROOM, ME).await })
	};

	while h.manager.state(ROOM) != RoomSessionState::Connecting {
		tokio::time::sleep(Duration::from_millis(1)).await;
	}
	assert!(h.manager.close_room(ROOM).await);

	let err = opening.await.unwrap().unwrap_err();
	assert_eq!(
		err,
		SessionError::Connection {
			room_id: ROOM,
			source: TransportError::Closed
		}
	);
	assert_eq!(h.backend.open_session_count(ROOM), 0);
	assert_eq!(h.manager.state(ROOM), RoomSessionState::Closed);
	assert!(!h.store.lock().contains(ROOM));
}

#[tokio::test]
async fn live_frames_apply_in_delivery_order() {
	let mut h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 2);
	h.manager.open_room(ROOM, ME).await.unwrap();
	assert_eq!(ids(&h.store), vec![1, 2]);

	h.backend.post(ROOM, OTHER, "three");
	h.backend.post(ROOM, OTHER, "four");
	wait_for(&mut h.events, |ev| {
		matches!(
			ev,
			ClientEvent::RoomUpdated {
				change: RoomChange::MessageAdded(MessageId(4)),
				..
			}
		)
	})
	.await;

	assert_eq!(ids(&h.store), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn transport_loss_is_fatal_and_blocks_publishing() {
	let mut h = harness(ClientConfig::default());
	h.manager.open_room(ROOM, ME).await.unwrap();

	h.backend.drop_sessions(ROOM, "server restart");
	let ev = wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::SessionFatal { .. })).await;
	assert_eq!(
		ev,
		ClientEvent::SessionFatal {
			room_id: ROOM,
			reason: "server restart".to_string()
		}
	);

	let err = h
		.manager
		.send_message(ROOM, ME.user_id, "hello".to_string(), MessageKind::Text)
		.await
		.unwrap_err();
	assert!(matches!(err, SessionError::SessionFatal { room_id: ROOM, .. }));

	// No reconnect; the room stays registered until closed.
	assert_eq!(h.backend.connect_count(), 1);
	assert!(h.manager.close_room(ROOM).await);
}

#[tokio::test]
async fn older_pages_until_exhausted() {
	let mut h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 30);

	let snapshot = h.manager.open_room(ROOM, ME).await.unwrap();
	assert!(snapshot.has_more);
	assert_eq!(ids(&h.store), (11..=30).collect::<Vec<_>>());

	let outcome = h.manager.request_older(ROOM).await.unwrap();
	assert!(matches!(outcome, LoadOlder::Requested(page) if page.begin_id == MessageId(11)));

	let ev = wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::OlderPageApplied { .. })).await;
	assert_eq!(
		ev,
		ClientEvent::OlderPageApplied {
			room_id: ROOM,
			added: 10,
			has_more: false
		}
	);
	assert_eq!(ids(&h.store), (1..=30).collect::<Vec<_>>());

	assert_eq!(h.manager.request_older(ROOM).await.unwrap(), LoadOlder::Exhausted);
}

#[tokio::test]
async fn one_outstanding_request_per_room() {
	let mut h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 45);
	h.backend.set_hold_replies(true);
	h.manager.open_room(ROOM, ME).await.unwrap();

	assert!(matches!(h.manager.request_older(ROOM).await.unwrap(), LoadOlder::Requested(_)));
	assert_eq!(h.manager.request_older(ROOM).await.unwrap(), LoadOlder::AlreadyLoading);

	assert_eq!(h.backend.release_replies(), 1);
	let ev = wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::OlderPageApplied { .. })).await;
	assert_eq!(
		ev,
		ClientEvent::OlderPageApplied {
			room_id: ROOM,
			added: 20,
			has_more: true
		}
	);
}

#[tokio::test]
async fn unanswered_request_times_out_and_late_reply_is_dropped() {
	let config = ClientConfig {
		older_page_timeout: Some(Duration::from_millis(30)),
		..ClientConfig::default()
	};
	let mut h = harness(config);
	h.backend.seed_history(ROOM, OTHER, 30);
	h.backend.set_hold_replies(true);
	h.manager.open_room(ROOM, ME).await.unwrap();

	h.manager.request_older(ROOM).await.unwrap();
	let ev = wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::PaginationFailed { .. })).await;
	assert!(matches!(
		ev,
		ClientEvent::PaginationFailed {
			room_id: ROOM,
			error: SessionError::PaginationFetch { .. }
		}
	));

	{
		let store = h.store.lock();
		let room = store.room(ROOM).unwrap();
		assert!(!room.pagination.is_loading());
		assert!(room.pagination.has_more());
	}

	h.backend.release_replies();
	tokio::time::sleep(Duration::from_millis(50)).await;
	assert_eq!(ids(&h.store).len(), 20);
}

#[tokio::test]
async fn fatal_with_pending_page_fails_the_page_first() {
	let mut h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 30);
	h.backend.set_hold_replies(true);
	h.manager.open_room(ROOM, ME).await.unwrap();
	h.manager.request_older(ROOM).await.unwrap();

	h.backend.inject_error(ROOM, "broken pipe");

	let ev = wait_for(&mut h.events, |ev| {
		matches!(ev, ClientEvent::PaginationFailed { .. } | ClientEvent::SessionFatal { .. })
	})
	.await;
	assert!(matches!(ev, ClientEvent::PaginationFailed { room_id: ROOM, .. }));

	let ev = wait_for(&mut h.events, |ev| matches!(ev, ClientEvent::SessionFatal { .. })).await;
	assert_eq!(
		ev,
		ClientEvent::SessionFatal {
			room_id: ROOM,
			reason: "transport error: broken pipe".to_string()
		}
	);
}

#[tokio::test]
async fn operations_on_unopened_room_report_not_open() {
	let h = harness(ClientConfig::default());
	assert_eq!(
		h.manager.request_older(ROOM).await.unwrap_err(),
		SessionError::NotOpen { room_id: ROOM }
	);
	assert_eq!(
		h.manager
			.change_nickname(ROOM, ME.user_id, "new".to_string())
			.await
			.unwrap_err(),
		SessionError::NotOpen { room_id: ROOM }
	);
}

#[tokio::test]
async fn close_all_closes_every_room() {
	let h = harness(ClientConfig::default());
	h.backend.add_room(RoomId(2), "random");
	h.manager.open_room(ROOM, ME).await.unwrap();
	h.manager.open_room(RoomId(2), ME).await.unwrap();
	assert_eq!(h.manager.open_rooms(), vec![ROOM, RoomId(2)]);

	h.manager.close_all().await;

	assert!(h.manager.open_rooms().is_empty());
	assert_eq!(h.backend.open_session_count(ROOM), 0);
	assert_eq!(h.backend.open_session_count(RoomId(2)), 0);
	assert_eq!(h.manager.state(RoomId(2)), RoomSessionState::Closed);
	assert!(h.store.lock().room_ids().is_empty());
}

#[tokio::test]
async fn reopen_during_slow_close_keeps_the_new_state() {
	let mut h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 3);
	h.backend.set_disconnect_delay(Some(Duration::from_millis(100)));
	h.manager.open_room(ROOM, ME).await.unwrap();

	let closing = {
		let manager = h.manager.clone();
		tokio::spawn(async move { manager.close_room(ROOM).await })
	};
	while h.manager.state(ROOM) != RoomSessionState::Closed {
		tokio::time::sleep(Duration::from_millis(1)).await;
	}

	let snapshot = h.manager.open_room(ROOM, ME).await.unwrap();
	assert_eq!(snapshot.messages.len(), 3);
	assert!(closing.await.unwrap());

	assert_eq!(h.manager.state(ROOM), RoomSessionState::Ready);
	assert!(h.store.lock().contains(ROOM));
	assert_eq!(ids(&h.store), vec![1, 2, 3]);

	h.backend.post(ROOM, OTHER, "after reopen");
	wait_for(&mut h.events, |ev| {
		matches!(
			ev,
			ClientEvent::RoomUpdated {
				change: RoomChange::MessageAdded(MessageId(4)),
				..
			}
		)
	})
	.await;
	assert_eq!(ids(&h.store), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn reopen_during_slow_close_all_keeps_the_new_state() {
	let h = harness(ClientConfig::default());
	h.backend.seed_history(ROOM, OTHER, 2);
	h.backend.set_disconnect_delay(Some(Duration::from_millis(100)));
	h.manager.open_room(ROOM, ME).await.unwrap();

	let closing = {
		let manager = h.manager.clone();
		tokio::spawn(async move { manager.close_all().await })
	};
	while h.manager.state(ROOM) != RoomSessionState::Closed {
		tokio::time::sleep(Duration::from_millis(1)).await;
	}

	h.manager.open_room(ROOM, ME).await.unwrap();
	closing.await.unwrap();

	assert_eq!(h.manager.open_rooms(), vec![ROOM]);
	assert_eq!(ids(&h.store), vec![1, 2]);
}

#[tokio::test]
async fn close_cancels_the_page_timer() {
	let config = ClientConfig {
		older_page_timeout: Some(Duration::from_secs(5)),
		..ClientConfig::default()
	};
	let mut h = harness(config);
	h.backend.seed_history(ROOM, OTHER, 30);
	h.backend.set_hold_replies(true);
	let baseline = Arc::strong_count(&h.store);

	h.manager.open_room(ROOM, ME).await.unwrap();
	h.manager.request_older(ROOM).await.unwrap();
	assert!(Arc::strong_count(&h.store) > baseline);

	assert!(h.manager.close_room(ROOM).await);
	tokio::time::sleep(Duration::from_millis(20)).await;

	// Pump and timer are both gone; neither holds the store any more.
	assert_eq!(Arc::strong_count(&h.store), baseline);
	while let Ok(ev) = h.events.try_recv() {
		assert!(!matches!(ev, ClientEvent::PaginationFailed { .. }), "unexpected {ev:?}");
	}
}
