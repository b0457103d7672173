#![forbid(unsafe_code)]

//! In-process backend implementing both collaborator traits.
//!
//! Each connected session gets its own inbound queue; frames fan out to every
//! session of the room subscribed to the topic. Older-page replies go only to
//! the requesting session. Used by the demo binary and tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatsync_domain::{
	ConnState, LinkPreview, Message, MessageId, MessageKind, Role, RoomId, RoomMember, RosterEvent, RosterEventType,
	UserId,
};
use chatsync_protocol::wire::{
	ChatMessageDto, ChatMessageListDto, ChatMessageRequest, ChatRoomUserDto, LinkPreviewDto, NickChangeRequest,
	OlderPageRequest, RoomInitDataDto, UserEventDto,
};
use chatsync_protocol::{REPLY_TOPIC, RoomTopic, destinations, encode_body_default};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{FetchError, TransportError};
use crate::transport::{
	ConnectRequest, RoomInitData, SnapshotFetcher, TransportConnector, TransportInbound, TransportLink, TransportSession,
};

#[derive(Debug, Default)]
struct LoopRoom {
	name: String,
	members: Vec<RoomMember>,
	/// Ascending by id.
	messages: Vec<Message>,
	next_id: u64,
}

impl LoopRoom {
	fn member_mut(&mut self, user_id: UserId) -> Option<&mut RoomMember> {
		self.members.iter_mut().find(|m| m.user_id == user_id)
	}

	fn nickname_of(&self, user_id: UserId) -> String {
		self.members
			.iter()
			.find(|m| m.user_id == user_id)
			.map(|m| m.nickname.clone())
			.unwrap_or_else(|| format!("user{user_id}"))
	}

	fn avatar_of(&self, user_id: UserId) -> Option<String> {
		self.members.iter().find(|m| m.user_id == user_id).and_then(|m| m.avatar.clone())
	}

	fn push_message(&mut self, author_id: UserId, content: String, kind: MessageKind) -> Message {
		self.next_id += 1;
		let message = Message {
			id: MessageId(self.next_id),
			author_id,
			author_name: self.nickname_of(author_id),
			author_avatar: self.avatar_of(author_id),
			content,
			kind,
			created_at: String::new(),
			link_preview: None,
		};
		self.messages.push(message.clone());
		message
	}
}

#[derive(Debug)]
struct LoopSession {
	room_id: RoomId,
	user_id: UserId,
	topics: HashSet<String>,
	tx: mpsc::UnboundedSender<TransportInbound>,
}

#[derive(Debug, Default)]
struct LoopState {
	rooms: HashMap<RoomId, LoopRoom>,
	sessions: HashMap<u64, LoopSession>,
	next_session: u64,

	connect_delay: Option<Duration>,
	disconnect_delay: Option<Duration>,
	fail_connect: bool,
	fail_fetch: bool,
	fail_subscribe: bool,
	hold_replies: bool,
	held_replies: Vec<(u64, Vec<u8>)>,
	/// Deliver replies to every session of the requesting user, as a user-scoped reply topic would.
	fan_out_replies: bool,

	connects: usize,
	fetches: usize,
	published: Vec<String>,
}

fn frame<T: Serialize>(value: &T) -> Option<Vec<u8>> {
	match encode_body_default(value) {
		Ok(body) => Some(body),
		Err(e) => {
			warn!(error = %e, "loopback: failed to encode frame");
			None
		}
	}
}

fn parse_body<T: DeserializeOwned>(destination: &str, body: &[u8]) -> Result<T, TransportError> {
	serde_json::from_slice(body).map_err(|e| TransportError::Publish {
		destination: destination.to_string(),
		reason: e.to_string(),
	})
}

impl LoopState {
	fn broadcast(&self, room_id: RoomId, topic: &str, body: &[u8]) {
		for session in self.sessions.values() {
			if session.room_id == room_id && session.topics.contains(topic) {
				let _ = session.tx.send(TransportInbound::Frame {
					topic: topic.to_string(),
					body: body.to_vec(),
				});
			}
		}
	}

	fn broadcast_message(&self, room_id: RoomId, message: &Message) {
		if let Some(body) = frame(&ChatMessageDto::from(message)) {
			self.broadcast(room_id, &RoomTopic::public(room_id), &body);
		}
	}

	fn broadcast_roster(&self, room_id: RoomId, event: &RosterEvent) {
		if let Some(body) = frame(&UserEventDto::from(event)) {
			self.broadcast(room_id, &RoomTopic::users(room_id), &body);
		}
	}

	fn send_reply(&self, session_id: u64, body: Vec<u8>) {
		match self.sessions.get(&session_id) {
			Some(session) if session.topics.contains(REPLY_TOPIC) => {
				let _ = session.tx.send(TransportInbound::Frame {
					topic: REPLY_TOPIC.to_string(),
					body,
				});
			}
			_ => debug!(session_id, "loopback: reply target gone"),
		}
	}

	fn deliver_reply(&self, session_id: u64, body: Vec<u8>) {
		if !self.fan_out_replies {
			self.send_reply(session_id, body);
			return;
		}
		let Some(user_id) = self.sessions.get(&session_id).map(|s| s.user_id) else {
			debug!(session_id, "loopback: reply target gone");
			return;
		};
		let mut targets: Vec<u64> = self
			.sessions
			.iter()
			.filter(|(_, s)| s.user_id == user_id)
			.map(|(id, _)| *id)
			.collect();
		targets.sort_unstable();
		for id in targets {
			self.send_reply(id, body.clone());
		}
	}

	fn room(&mut self, room_id: RoomId, destination: &str) -> Result<&mut LoopRoom, TransportError> {
		self.rooms.get_mut(&room_id).ok_or_else(|| TransportError::Publish {
			destination: destination.to_string(),
			reason: format!("unknown room {room_id}"),
		})
	}

	fn handle_publish(&mut self, session_id: u64, destination: &str, body: &[u8]) -> Result<(), TransportError> {
		let Some(session) = self.sessions.get(&session_id) else {
			return Err(TransportError::Closed);
		};
		let session_room = session.room_id;
		self.published.push(destination.to_string());

		match destination {
			destinations::SEND_MESSAGE => {
				let req: ChatMessageRequest = parse_body(destination, body)?;
				let message = self
					.room(req.room_id, destination)?
					.push_message(req.author_id, req.content, req.message_type);
				self.broadcast_message(req.room_id, &message);
			}

			destinations::REQUEST_OLDER_MESSAGES => {
				let req: OlderPageRequest = parse_body(destination, body)?;
				let room = self.room(req.room_id, destination)?;
				let messages: Vec<ChatMessageDto> = room
					.messages
					.iter()
					.rev()
					.filter(|m| m.id < req.begin_id)
					.take(req.row_count as usize)
					.map(ChatMessageDto::from)
					.collect();
				let reply = ChatMessageListDto {
					room_id: req.room_id,
					messages,
				};
				let Some(reply) = frame(&reply) else {
					return Ok(());
				};
				if self.hold_replies {
					self.held_replies.push((session_id, reply));
				} else {
					self.deliver_reply(session_id, reply);
				}
			}

			destinations::CHANGE_NICKNAME => {
				let req: NickChangeRequest = parse_body(destination, body)?;
				let room = self.room(req.room_id, destination)?;
				if let Some(member) = room.member_mut(req.user_id) {
					member.nickname = req.new_nickname.clone();
				}
				let mut event = RosterEvent::new(RosterEventType::NickChange, req.user_id);
				event.nickname = Some(req.new_nickname);
				self.broadcast_roster(req.room_id, &event);
			}

			other => {
				return Err(TransportError::Publish {
					destination: other.to_string(),
					reason: format!("no handler (session room {session_room})"),
				});
			}
		}

		Ok(())
	}

	/// Remove a session; flips the user to DISCONNECT and announces EXIT.
	fn drop_session(&mut self, session_id: u64) {
		let Some(session) = self.sessions.remove(&session_id) else {
			return;
		};

		let still_connected = self
			.sessions
			.values()
			.any(|s| s.room_id == session.room_id && s.user_id == session.user_id);
		if still_connected {
			return;
		}

		if let Some(member) = self
			.rooms
			.get_mut(&session.room_id)
			.and_then(|room| room.member_mut(session.user_id))
		{
			member.conn = ConnState::Disconnect;
		}
		self.broadcast_roster(session.room_id, &RosterEvent::new(RosterEventType::Exit, session.user_id));
	}
}

/// Shared handle to an in-memory chat backend.
#[derive(Debug, Clone, Default)]
pub struct LoopbackBackend {
	state: Arc<Mutex<LoopState>>,
}

impl LoopbackBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add_room(&self, room_id: RoomId, name: impl Into<String>) {
		self.state.lock().rooms.entry(room_id).or_default().name = name.into();
	}

	/// Register a member without connecting them.
	pub fn add_member(&self, room_id: RoomId, user_id: UserId, nickname: impl Into<String>, role: Role) {
		let mut st = self.state.lock();
		let room = st.rooms.entry(room_id).or_default();
		let member = RoomMember {
			user_id,
			nickname: nickname.into(),
			avatar: None,
			conn: ConnState::Disconnect,
			role,
		};
		match room.member_mut(user_id) {
			Some(existing) => *existing = member,
			None => room.members.push(member),
		}
	}

	pub fn set_avatar(&self, room_id: RoomId, user_id: UserId, avatar: Option<String>) {
		if let Some(member) = self
			.state
			.lock()
			.rooms
			.get_mut(&room_id)
			.and_then(|room| room.member_mut(user_id))
		{
			member.avatar = avatar;
		}
	}

	/// Append history without notifying sessions.
	pub fn seed_history(&self, room_id: RoomId, author_id: UserId, count: usize) {
		let mut st = self.state.lock();
		let room = st.rooms.entry(room_id).or_default();
		for n in 0..count {
			room.push_message(author_id, format!("history {}", n + 1), MessageKind::Text);
		}
	}

	/// Post a live text message and fan it out.
	pub fn post(&self, room_id: RoomId, author_id: UserId, content: impl Into<String>) -> MessageId {
		let mut st = self.state.lock();
		let message = st
			.rooms
			.entry(room_id)
			.or_default()
			.push_message(author_id, content.into(), MessageKind::Text);
		st.broadcast_message(room_id, &message);
		message.id
	}

	/// Deliver a message frame as-is, without recording it.
	pub fn push_message(&self, room_id: RoomId, message: &Message) {
		self.state.lock().broadcast_message(room_id, message);
	}

	pub fn push_preview(&self, room_id: RoomId, message_id: MessageId, preview: &LinkPreview) {
		let st = self.state.lock();
		if let Some(body) = frame(&LinkPreviewDto::from_preview(message_id, preview)) {
			st.broadcast(room_id, &RoomTopic::previews(room_id), &body);
		}
	}

	pub fn push_roster_event(&self, room_id: RoomId, event: &RosterEvent) {
		self.state.lock().broadcast_roster(room_id, event);
	}

	pub fn delete_message(&self, room_id: RoomId, message_id: MessageId) {
		let mut st = self.state.lock();
		let Some(room) = st.rooms.get_mut(&room_id) else {
			return;
		};
		room.messages.retain(|m| m.id != message_id);
		let author = UserId(0);
		let control = Message {
			id: message_id,
			author_id: author,
			author_name: String::new(),
			author_avatar: None,
			content: String::new(),
			kind: MessageKind::Delete,
			created_at: String::new(),
			link_preview: None,
		};
		st.broadcast_message(room_id, &control);
	}

	pub fn edit_message(&self, room_id: RoomId, message_id: MessageId, content: impl Into<String>) {
		let content = content.into();
		let mut st = self.state.lock();
		let Some(room) = st.rooms.get_mut(&room_id) else {
			return;
		};
		let Some(stored) = room.messages.iter_mut().find(|m| m.id == message_id) else {
			return;
		};
		stored.content = content.clone();
		let control = Message {
			kind: MessageKind::Update,
			content,
			..stored.clone()
		};
		st.broadcast_message(room_id, &control);
	}

	/// Deliver an arbitrary frame on every session of the room subscribed to `topic`.
	pub fn push_raw(&self, room_id: RoomId, topic: &str, body: &[u8]) {
		self.state.lock().broadcast(room_id, topic, body);
	}

	/// Simulate the server dropping every session of a room.
	pub fn drop_sessions(&self, room_id: RoomId, reason: &str) {
		self.fail_sessions(room_id, |_| TransportInbound::Disconnected {
			reason: reason.to_string(),
		});
	}

	pub fn inject_error(&self, room_id: RoomId, message: &str) {
		self.fail_sessions(room_id, |_| TransportInbound::Error {
			message: message.to_string(),
		});
	}

	fn fail_sessions(&self, room_id: RoomId, item: impl Fn(u64) -> TransportInbound) {
		let mut st = self.state.lock();
		let ids: Vec<u64> = st
			.sessions
			.iter()
			.filter(|(_, s)| s.room_id == room_id)
			.map(|(id, _)| *id)
			.collect();
		for id in ids {
			if let Some(session) = st.sessions.get(&id) {
				let _ = session.tx.send(item(id));
			}
			st.drop_session(id);
		}
	}

	pub fn set_connect_delay(&self, delay: Option<Duration>) {
		self.state.lock().connect_delay = delay;
	}

	/// Delay every session disconnect, modelling a slow transport close.
	pub fn set_disconnect_delay(&self, delay: Option<Duration>) {
		self.state.lock().disconnect_delay = delay;
	}

	/// Send older-page replies to all of the requesting user's sessions.
	pub fn set_fan_out_replies(&self, fan_out: bool) {
		self.state.lock().fan_out_replies = fan_out;
	}

	pub fn set_fail_connect(&self, fail: bool) {
		self.state.lock().fail_connect = fail;
	}

	pub fn set_fail_subscribe(&self, fail: bool) {
		self.state.lock().fail_subscribe = fail;
	}

	pub fn set_fail_fetch(&self, fail: bool) {
		self.state.lock().fail_fetch = fail;
	}

	/// Queue older-page replies instead of delivering them.
	pub fn set_hold_replies(&self, hold: bool) {
		self.state.lock().hold_replies = hold;
	}

	/// Deliver queued older-page replies.
	pub fn release_replies(&self) -> usize {
		let mut st = self.state.lock();
		let held = std::mem::take(&mut st.held_replies);
		let n = held.len();
		for (session_id, body) in held {
			st.deliver_reply(session_id, body);
		}
		n
	}

	pub fn connect_count(&self) -> usize {
		self.state.lock().connects
	}

	pub fn fetch_count(&self) -> usize {
		self.state.lock().fetches
	}

	pub fn open_session_count(&self, room_id: RoomId) -> usize {
		self.state.lock().sessions.values().filter(|s| s.room_id == room_id).count()
	}

	/// Destinations published to, in order.
	pub fn published(&self) -> Vec<String> {
		self.state.lock().published.clone()
	}

	pub fn member(&self, room_id: RoomId, user_id: UserId) -> Option<RoomMember> {
		let st = self.state.lock();
		st.rooms
			.get(&room_id)
			.and_then(|room| room.members.iter().find(|m| m.user_id == user_id).cloned())
	}

	pub fn message_count(&self, room_id: RoomId) -> usize {
		self.state.lock().rooms.get(&room_id).map(|r| r.messages.len()).unwrap_or(0)
	}
}

#[derive(Debug)]
struct LoopbackSession {
	id: u64,
	state: Arc<Mutex<LoopState>>,
}

#[async_trait]
impl TransportSession for LoopbackSession {
	async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
		let mut st = self.state.lock();
		let fail = st.fail_subscribe;
		match st.sessions.get_mut(&self.id) {
			Some(_) if fail => Err(TransportError::Subscribe {
				topic: topic.to_string(),
				reason: "rejected".to_string(),
			}),
			Some(session) => {
				session.topics.insert(topic.to_string());
				Ok(())
			}
			None => Err(TransportError::Subscribe {
				topic: topic.to_string(),
				reason: "session closed".to_string(),
			}),
		}
	}

	async fn publish(&self, destination: &str, body: Vec<u8>) -> Result<(), TransportError> {
		self.state.lock().handle_publish(self.id, destination, &body)
	}

	async fn disconnect(&self) {
		let delay = self.state.lock().disconnect_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		self.state.lock().drop_session(self.id);
	}
}

#[async_trait]
impl TransportConnector for LoopbackBackend {
	async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError> {
		let delay = self.state.lock().connect_delay;
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let mut st = self.state.lock();
		st.connects += 1;

		if st.fail_connect {
			return Err(TransportError::Connect("connection refused".to_string()));
		}

		let room_id = request.room_id;
		let user_id = request.user_id;
		let Some(room) = st.rooms.get_mut(&room_id) else {
			return Err(TransportError::Connect(format!("unknown room {room_id}")));
		};

		match room.member_mut(user_id) {
			Some(member) => member.conn = ConnState::Connect,
			None => room.members.push(RoomMember {
				user_id,
				nickname: format!("user{user_id}"),
				avatar: None,
				conn: ConnState::Connect,
				role: Role::Member,
			}),
		}
		let mut enter = RosterEvent::new(RosterEventType::Enter, user_id);
		if let Some(member) = room.member_mut(user_id) {
			enter.nickname = Some(member.nickname.clone());
			enter.role = Some(member.role);
			enter.avatar = member.avatar.clone();
		}
		st.broadcast_roster(room_id, &enter);

		st.next_session += 1;
		let id = st.next_session;
		let (tx, inbound) = mpsc::unbounded_channel();
		st.sessions.insert(
			id,
			LoopSession {
				room_id,
				user_id,
				topics: HashSet::new(),
				tx,
			},
		);
		debug!(session_id = id, url = %request.url, headers = ?request.headers(), "loopback: connected");

		Ok(TransportLink {
			session: Arc::new(LoopbackSession {
				id,
				state: Arc::clone(&self.state),
			}),
			inbound,
		})
	}
}

#[async_trait]
impl SnapshotFetcher for LoopbackBackend {
	async fn fetch_snapshot(&self, room_id: RoomId, line_count: u32) -> Result<RoomInitData, FetchError> {
		let body = {
			let mut st = self.state.lock();
			st.fetches += 1;
			if st.fail_fetch {
				return Err(FetchError::Request("service unavailable".to_string()));
			}
			let room = st.rooms.get(&room_id).ok_or(FetchError::NotFound(room_id))?;
			let dto = RoomInitDataDto {
				room_name: room.name.clone(),
				users: room.members.iter().map(ChatRoomUserDto::from).collect(),
				messages: room
					.messages
					.iter()
					.rev()
					.take(line_count as usize)
					.map(ChatMessageDto::from)
					.collect(),
			};
			serde_json::to_vec(&dto).map_err(|e| FetchError::Decode(e.to_string()))?
		};

		let dto: RoomInitDataDto = serde_json::from_slice(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
		Ok(RoomInitData::from(dto))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(room: u64, user: u64) -> ConnectRequest {
		ConnectRequest {
			url: "ws://localhost:8080/ws".to_string(),
			room_id: RoomId(room),
			user_id: UserId(user),
		}
	}

	#[tokio::test]
	async fn published_message_reaches_subscribed_sessions() {
		let backend = LoopbackBackend::new();
		backend.add_room(RoomId(1), "general");

		let TransportLink { session, mut inbound } = backend.connect(request(1, 7)).await.unwrap();
		session.subscribe(&RoomTopic::public(RoomId(1))).await.unwrap();

		let id = backend.post(RoomId(1), UserId(8), "hello");
		match inbound.recv().await.unwrap() {
			TransportInbound::Frame { topic, body } => {
				assert_eq!(topic, "/topic/1/public");
				let dto: ChatMessageDto = serde_json::from_slice(&body).unwrap();
				assert_eq!(dto.message_id, id);
				assert_eq!(dto.content, "hello");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn snapshot_is_newest_first_and_limited() {
		let backend = LoopbackBackend::new();
		backend.add_room(RoomId(1), "general");
		backend.seed_history(RoomId(1), UserId(2), 5);

		let data = backend.fetch_snapshot(RoomId(1), 3).await.unwrap();
		let ids: Vec<u64> = data.messages.iter().map(|m| m.id.get()).collect();
		assert_eq!(ids, vec![5, 4, 3]);
		assert_eq!(data.room_name, "general");
	}

	#[tokio::test]
	async fn unknown_room_is_rejected() {
		let backend = LoopbackBackend::new();
		assert!(matches!(backend.connect(request(9, 1)).await, Err(TransportError::Connect(_))));
		assert_eq!(backend.fetch_snapshot(RoomId(9), 20).await.unwrap_err(), FetchError::NotFound(RoomId(9)));
	}

	#[tokio::test]
	async fn disconnect_is_idempotent_and_announces_exit() {
		let backend = LoopbackBackend::new();
		backend.add_room(RoomId(1), "general");

		let watcher = backend.connect(request(1, 1)).await.unwrap();
		watcher.session.subscribe(&RoomTopic::users(RoomId(1))).await.unwrap();
		let mut watcher_rx = watcher.inbound;

		let leaver = backend.connect(request(1, 2)).await.unwrap();
		// ENTER for user 2
		assert!(matches!(watcher_rx.recv().await, Some(TransportInbound::Frame { .. })));

		leaver.session.disconnect().await;
		leaver.session.disconnect().await;

		match watcher_rx.recv().await.unwrap() {
			TransportInbound::Frame { body, .. } => {
				let dto: UserEventDto = serde_json::from_slice(&body).unwrap();
				assert_eq!(dto.event_type, RosterEventType::Exit);
				assert_eq!(dto.user_id, UserId(2));
			}
			other => panic!("unexpected {other:?}"),
		}
		assert!(watcher_rx.try_recv().is_err());
		assert_eq!(backend.open_session_count(RoomId(1)), 1);
		assert_eq!(backend.member(RoomId(1), UserId(2)).unwrap().conn, ConnState::Disconnect);
	}

	#[tokio::test]
	async fn fanned_out_reply_reaches_every_session_of_the_user() {
		let backend = LoopbackBackend::new();
		backend.add_room(RoomId(1), "general");
		backend.add_room(RoomId(2), "random");
		backend.seed_history(RoomId(1), UserId(2), 5);
		backend.set_fan_out_replies(true);

		let first = backend.connect(request(1, 1)).await.unwrap();
		let second = backend.connect(request(2, 1)).await.unwrap();
		let stranger = backend.connect(request(1, 3)).await.unwrap();
		for link in [&first, &second, &stranger] {
			link.session.subscribe(REPLY_TOPIC).await.unwrap();
		}
		let (mut first_rx, mut second_rx, mut stranger_rx) = (first.inbound, second.inbound, stranger.inbound);

		let req = OlderPageRequest {
			room_id: RoomId(1),
			begin_id: MessageId(4),
			row_count: 2,
		};
		first
			.session
			.publish(destinations::REQUEST_OLDER_MESSAGES, serde_json::to_vec(&req).unwrap())
			.await
			.unwrap();

		for rx in [&mut first_rx, &mut second_rx] {
			match rx.recv().await.unwrap() {
				TransportInbound::Frame { topic, body } => {
					assert_eq!(topic, REPLY_TOPIC);
					let dto: ChatMessageListDto = serde_json::from_slice(&body).unwrap();
					assert_eq!(dto.room_id, RoomId(1));
					assert_eq!(dto.messages.len(), 2);
				}
				other => panic!("unexpected {other:?}"),
			}
		}
		assert!(stranger_rx.try_recv().is_err());
	}
}
