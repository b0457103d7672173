#![forbid(unsafe_code)]

use std::sync::Arc;

use chatsync_domain::{Message, MessageKind, Role, RoomId, RoomMember, RoomSummary, UserId};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::events::{ClientEvent, EventBus};
use crate::join::{JoinCoordinator, JoinOutcome};
use crate::pagination::LoadOlder;
use crate::session::{RoomSessionState, SessionManager};
use crate::store::{RoomSnapshot, SharedStore, StoreState};
use crate::transport::{Credentials, SnapshotFetcher, TransportConnector};

/// Entry point for a UI: owns the session manager, join coordinator and shared store.
///
/// Cheap to clone; clones share everything.
#[derive(Debug, Clone)]
pub struct ChatClient {
	credentials: Credentials,
	store: SharedStore,
	events: EventBus,
	sessions: SessionManager,
	joins: Arc<JoinCoordinator>,
}

impl ChatClient {
	pub fn new(
		config: ClientConfig,
		user_id: UserId,
		connector: Arc<dyn TransportConnector>,
		fetcher: Arc<dyn SnapshotFetcher>,
	) -> Self {
		let events = EventBus::new(config.event_channel_capacity);
		let store = StoreState::shared();
		let sessions = SessionManager::new(Arc::new(config), connector, fetcher, Arc::clone(&store), events.clone());

		Self {
			credentials: Credentials { user_id },
			store,
			events,
			sessions,
			joins: Arc::new(JoinCoordinator::new()),
		}
	}

	pub fn user_id(&self) -> UserId {
		self.credentials.user_id
	}

	/// Subscribe to change notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
		self.events.subscribe()
	}

	pub fn sessions(&self) -> &SessionManager {
		&self.sessions
	}

	/// Join a room and bring its session to ready.
	pub async fn join_and_connect(&self, room_id: RoomId) -> Result<JoinOutcome, SessionError> {
		let sessions = &self.sessions;
		let credentials = self.credentials;
		self.joins
			.join_with(room_id, || sessions.open_room(room_id, credentials))
			.await
	}

	/// Leave a room: drop it from the joined set and close its session.
	pub async fn leave_room(&self, room_id: RoomId) -> bool {
		let was_joined = self.joins.leave(room_id);
		let closed = self.sessions.close_room(room_id).await;
		if was_joined || closed {
			info!(room_id = %room_id, "left room");
		}
		was_joined || closed
	}

	/// Close every session and forget all joined rooms.
	pub async fn logout(&self) {
		self.sessions.close_all().await;
		self.joins.clear();
		info!("logged out");
	}

	/// Mark a room as the one on screen.
	pub fn activate_room(&self, room_id: RoomId) {
		let unread = {
			let mut store = self.store.lock();
			store.unread.on_activate(room_id).then(|| store.unread.unread_rooms())
		};
		if let Some(unread) = unread {
			self.events.emit(ClientEvent::UnreadChanged { unread });
		}
	}

	/// Request the next older page. The page lands asynchronously (`ClientEvent::OlderPageApplied`).
	pub async fn load_older_messages(&self, room_id: RoomId) -> Result<LoadOlder, SessionError> {
		self.sessions.request_older(room_id).await
	}

	/// Publish a message. Blank content is ignored and returns `false`; delete and update kinds are rejected.
	pub async fn send_message(&self, room_id: RoomId, content: &str, kind: MessageKind) -> Result<bool, SessionError> {
		if content.trim().is_empty() {
			debug!(room_id = %room_id, "send: blank content ignored");
			return Ok(false);
		}
		self.sessions
			.send_message(room_id, self.credentials.user_id, content.to_string(), kind)
			.await?;
		Ok(true)
	}

	/// Ask the server to change our nickname in a room. Empty or unchanged names are ignored.
	pub async fn change_nickname(&self, room_id: RoomId, nickname: &str) -> Result<bool, SessionError> {
		let nickname = nickname.trim();
		if nickname.is_empty() {
			return Ok(false);
		}

		let current = {
			let store = self.store.lock();
			let room = store.room(room_id).ok_or(SessionError::NotOpen { room_id })?;
			room.roster.get(self.credentials.user_id).map(|m| m.nickname.clone())
		};
		if current.as_deref() == Some(nickname) {
			debug!(room_id = %room_id, "nickname unchanged");
			return Ok(false);
		}

		self.sessions
			.change_nickname(room_id, self.credentials.user_id, nickname.to_string())
			.await?;
		Ok(true)
	}

	/// Messages of a room, ascending by id.
	pub fn messages(&self, room_id: RoomId) -> Vec<Message> {
		self.store
			.lock()
			.room(room_id)
			.map(|room| room.log.to_vec())
			.unwrap_or_default()
	}

	pub fn roster(&self, room_id: RoomId) -> Vec<RoomMember> {
		self.store
			.lock()
			.room(room_id)
			.map(|room| room.roster.members().to_vec())
			.unwrap_or_default()
	}

	pub fn unread_rooms(&self) -> Vec<RoomId> {
		self.store.lock().unread.unread_rooms()
	}

	pub fn active_room(&self) -> Option<RoomId> {
		self.store.lock().unread.active()
	}

	pub fn has_more(&self, room_id: RoomId) -> bool {
		self.store
			.lock()
			.room(room_id)
			.is_some_and(|room| room.pagination.has_more())
	}

	pub fn is_loading_older(&self, room_id: RoomId) -> bool {
		self.store
			.lock()
			.room(room_id)
			.is_some_and(|room| room.pagination.is_loading())
	}

	pub fn my_role(&self, room_id: RoomId) -> Option<Role> {
		self.store.lock().room(room_id).and_then(|room| room.my_role)
	}

	pub fn joined_rooms(&self) -> Vec<RoomSummary> {
		self.joins.joined_rooms()
	}

	pub fn room_state(&self, room_id: RoomId) -> RoomSessionState {
		self.sessions.state(room_id)
	}

	pub fn room_snapshot(&self, room_id: RoomId) -> Option<RoomSnapshot> {
		self.store.lock().snapshot(room_id)
	}
}
