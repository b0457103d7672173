#![forbid(unsafe_code)]

//! Room session registry: at most one live transport session per room.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chatsync_domain::{MessageKind, RoomId, UserId};
use chatsync_protocol::wire::{ChatMessageRequest, NickChangeRequest, OlderPageRequest};
use chatsync_protocol::{RoomTopic, decode_inbound, destinations, encode_body};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{SessionError, TransportError};
use crate::events::{ClientEvent, EventBus, RoomChange};
use crate::pagination::LoadOlder;
use crate::router::{ApplyContext, apply_inbound};
use crate::store::{RoomSnapshot, SharedStore};
use crate::transport::{
	ConnectRequest, Credentials, SnapshotFetcher, TransportConnector, TransportInbound, TransportLink, TransportSession,
};

/// Lifecycle state of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomSessionState {
	Absent,
	Connecting,
	Ready,
	Closed,
}

type OpenOutcome = Option<Result<RoomSnapshot, SessionError>>;

enum Slot {
	Connecting {
		generation: u64,
		outcome: watch::Receiver<OpenOutcome>,
	},
	Ready(ReadySession),
}

struct ReadySession {
	session: Arc<dyn TransportSession>,
	pump: JoinHandle<()>,
	/// Set by the pump once the transport is gone.
	lost: Arc<AtomicBool>,
	/// Set under the registry lock when the slot is removed; the pump stops applying once it sees it.
	retired: Arc<AtomicBool>,
	/// Expiry task for the outstanding older-page request, if any.
	page_timer: Option<JoinHandle<()>>,
}

impl ReadySession {
	/// Stop everything that could still write to the room's store partition.
	fn retire(&mut self) {
		self.retired.store(true, Ordering::Release);
		self.pump.abort();
		if let Some(timer) = self.page_timer.take() {
			timer.abort();
		}
	}
}

#[derive(Default)]
struct Registry {
	slots: HashMap<RoomId, Slot>,
	closed: HashSet<RoomId>,
	next_generation: u64,
}

impl Registry {
	fn is_connecting(&self, room_id: RoomId, generation: u64) -> bool {
		matches!(
			self.slots.get(&room_id),
			Some(Slot::Connecting { generation: g, .. }) if *g == generation
		)
	}
}

struct Shared {
	config: Arc<ClientConfig>,
	connector: Arc<dyn TransportConnector>,
	fetcher: Arc<dyn SnapshotFetcher>,
	store: SharedStore,
	events: EventBus,
	registry: Mutex<Registry>,
	next_page_seq: AtomicU64,
}

/// Owns the room-id to transport-session map and sequences open/close.
#[derive(Clone)]
pub struct SessionManager {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let reg = self.shared.registry.lock();
		f.debug_struct("SessionManager")
			.field("rooms", &reg.slots.len())
			.field("closed", &reg.closed.len())
			.finish_non_exhaustive()
	}
}

enum OpenEntry {
	Ready,
	Wait(watch::Receiver<OpenOutcome>),
	Open(watch::Sender<OpenOutcome>, u64),
}

fn closed_during_open(room_id: RoomId) -> SessionError {
	SessionError::Connection {
		room_id,
		source: TransportError::Closed,
	}
}

impl SessionManager {
	pub fn new(
		config: Arc<ClientConfig>,
		connector: Arc<dyn TransportConnector>,
		fetcher: Arc<dyn SnapshotFetcher>,
		store: SharedStore,
		events: EventBus,
	) -> Self {
		Self {
			shared: Arc::new(Shared {
				config,
				connector,
				fetcher,
				store,
				events,
				registry: Mutex::new(Registry::default()),
				next_page_seq: AtomicU64::new(1),
			}),
		}
	}

	/// Open a room, or join the open already running for it.
	///
	/// Ready rooms resolve immediately with their current state.
	pub async fn open_room(&self, room_id: RoomId, credentials: Credentials) -> Result<RoomSnapshot, SessionError> {
		let entry = {
			let mut reg = self.shared.registry.lock();
			match reg.slots.get(&room_id) {
				Some(Slot::Ready(_)) => OpenEntry::Ready,
				Some(Slot::Connecting { outcome, .. }) => OpenEntry::Wait(outcome.clone()),
				None => {
					reg.next_generation += 1;
					let generation = reg.next_generation;
					let (tx, rx) = watch::channel(None);
					reg.slots.insert(room_id, Slot::Connecting { generation, outcome: rx });
					reg.closed.remove(&room_id);
					OpenEntry::Open(tx, generation)
				}
			}
		};

		match entry {
			OpenEntry::Ready => self
				.shared
				.store
				.lock()
				.snapshot(room_id)
				.ok_or(SessionError::NotOpen { room_id }),
			OpenEntry::Wait(rx) => {
				debug!(room_id = %room_id, "open: waiting on in-flight open");
				wait_for_outcome(room_id, rx).await
			}
			OpenEntry::Open(tx, generation) => {
				let mut attempt = OpenAttempt {
					shared: &self.shared,
					room_id,
					generation,
					tx,
					session: None,
					done: false,
				};
				let result = attempt.run(credentials).await;
				attempt.finish(&result).await;
				result
			}
		}
	}

	/// Close a room: stop its pump, disconnect, discard its state. Idempotent.
	///
	/// The room's state is gone before the disconnect is awaited, so a re-open racing the
	/// disconnect starts from an empty partition and keeps what it seeds.
	pub async fn close_room(&self, room_id: RoomId) -> bool {
		let (slot, had_state) = {
			let mut reg = self.shared.registry.lock();
			let mut slot = reg.slots.remove(&room_id);
			if slot.is_some() {
				reg.closed.insert(room_id);
			}
			if let Some(Slot::Ready(ready)) = slot.as_mut() {
				ready.retire();
			}
			let had_state = self.shared.store.lock().remove_room(room_id);
			(slot, had_state)
		};

		let had_session = slot.is_some();
		match slot {
			Some(Slot::Ready(ready)) => ready.session.disconnect().await,
			Some(Slot::Connecting { .. }) => {
				debug!(room_id = %room_id, "close: discarding in-flight open");
			}
			None => {}
		}

		if had_session || had_state {
			info!(room_id = %room_id, "room session closed");
			self.shared.events.emit(ClientEvent::RoomClosed { room_id });
			true
		} else {
			false
		}
	}

	/// Close every session (logout).
	pub async fn close_all(&self) {
		let mut closed: BTreeSet<RoomId> = BTreeSet::new();
		let drained: Vec<(RoomId, Slot)> = {
			let mut reg = self.shared.registry.lock();
			let mut drained: Vec<_> = reg.slots.drain().collect();
			for (room_id, slot) in &mut drained {
				reg.closed.insert(*room_id);
				closed.insert(*room_id);
				if let Slot::Ready(ready) = slot {
					ready.retire();
				}
			}

			let mut store = self.shared.store.lock();
			closed.extend(store.room_ids());
			store.clear();
			drained
		};

		let disconnects = drained.into_iter().filter_map(|(_, slot)| match slot {
			Slot::Ready(ready) => Some(async move { ready.session.disconnect().await }),
			Slot::Connecting { .. } => None,
		});
		futures::future::join_all(disconnects).await;

		info!(rooms = closed.len(), "closed all room sessions");
		for room_id in closed {
			self.shared.events.emit(ClientEvent::RoomClosed { room_id });
		}
	}

	pub fn state(&self, room_id: RoomId) -> RoomSessionState {
		let reg = self.shared.registry.lock();
		match reg.slots.get(&room_id) {
			Some(Slot::Connecting { .. }) => RoomSessionState::Connecting,
			Some(Slot::Ready(_)) => RoomSessionState::Ready,
			None if reg.closed.contains(&room_id) => RoomSessionState::Closed,
			None => RoomSessionState::Absent,
		}
	}

	/// Ready rooms, ascending by id.
	pub fn open_rooms(&self) -> Vec<RoomId> {
		let reg = self.shared.registry.lock();
		let mut rooms: Vec<RoomId> = reg
			.slots
			.iter()
			.filter_map(|(id, slot)| matches!(slot, Slot::Ready(_)).then_some(*id))
			.collect();
		rooms.sort();
		rooms
	}

	fn ready_session(&self, room_id: RoomId) -> Result<Arc<dyn TransportSession>, SessionError> {
		let reg = self.shared.registry.lock();
		match reg.slots.get(&room_id) {
			Some(Slot::Ready(ready)) if ready.lost.load(Ordering::Acquire) => Err(SessionError::SessionFatal {
				room_id,
				reason: "transport lost".to_string(),
			}),
			Some(Slot::Ready(ready)) => Ok(Arc::clone(&ready.session)),
			_ => Err(SessionError::NotOpen { room_id }),
		}
	}

	async fn publish<T: Serialize>(&self, room_id: RoomId, destination: &str, body: &T) -> Result<(), SessionError> {
		let session = self.ready_session(room_id)?;
		let bytes = encode_body(body, self.shared.config.max_frame_bytes).map_err(|e| SessionError::Publish {
			room_id,
			source: TransportError::Publish {
				destination: destination.to_string(),
				reason: e.to_string(),
			},
		})?;

		session
			.publish(destination, bytes)
			.await
			.map_err(|source| SessionError::Publish { room_id, source })
	}

	/// Publish a new chat message. Control kinds are rejected before anything is sent.
	pub async fn send_message(
		&self,
		room_id: RoomId,
		author_id: UserId,
		content: String,
		message_type: MessageKind,
	) -> Result<(), SessionError> {
		if message_type.is_control() {
			return Err(SessionError::UnsupportedKind {
				room_id,
				kind: message_type,
			});
		}
		let body = ChatMessageRequest {
			room_id,
			author_id,
			content,
			message_type,
		};
		self.publish(room_id, destinations::SEND_MESSAGE, &body).await?;
		debug!(room_id = %room_id, "message published");
		Ok(())
	}

	/// Publish a nickname change. Local state changes only when the roster event comes back.
	pub async fn change_nickname(&self, room_id: RoomId, user_id: UserId, new_nickname: String) -> Result<(), SessionError> {
		let body = NickChangeRequest {
			room_id,
			user_id,
			new_nickname,
		};
		self.publish(room_id, destinations::CHANGE_NICKNAME, &body).await?;
		debug!(room_id = %room_id, "nickname change published");
		Ok(())
	}

	/// Ask for the page before the oldest loaded message. The reply arrives on the room's pump.
	pub async fn request_older(&self, room_id: RoomId) -> Result<LoadOlder, SessionError> {
		let session = self.ready_session(room_id)?;
		let seq = self.shared.next_page_seq.fetch_add(1, Ordering::Relaxed);
		let page_size = self.shared.config.page_size;

		let outcome = {
			let mut store = self.shared.store.lock();
			let room = store.room_mut(room_id).ok_or(SessionError::NotOpen { room_id })?;
			let oldest = room.log.oldest_id();
			room.pagination.begin(oldest, page_size, seq)
		};

		let LoadOlder::Requested(page) = outcome else {
			debug!(room_id = %room_id, outcome = ?outcome, "older page not requested");
			return Ok(outcome);
		};

		let request = OlderPageRequest {
			room_id,
			begin_id: page.begin_id,
			row_count: page.row_count,
		};

		let sent = match encode_body(&request, self.shared.config.max_frame_bytes) {
			Ok(bytes) => session
				.publish(destinations::REQUEST_OLDER_MESSAGES, bytes)
				.await
				.map_err(|e| e.to_string()),
			Err(e) => Err(e.to_string()),
		};

		if let Err(reason) = sent {
			if let Some(room) = self.shared.store.lock().room_mut(room_id) {
				room.pagination.fail(page.seq);
			}
			warn!(room_id = %room_id, error = %reason, "older page request failed");
			return Err(SessionError::PaginationFetch { room_id, reason });
		}

		debug!(room_id = %room_id, begin_id = %page.begin_id, rows = page.row_count, "older page requested");

		if let Some(timeout) = self.shared.config.older_page_timeout {
			let store = Arc::clone(&self.shared.store);
			let events = self.shared.events.clone();
			let timer = tokio::spawn(async move {
				tokio::time::sleep(timeout).await;
				let expired = store
					.lock()
					.room_mut(room_id)
					.map(|room| room.pagination.fail(page.seq))
					.unwrap_or(false);
				if expired {
					warn!(room_id = %room_id, timeout_ms = timeout.as_millis() as u64, "older page timed out");
					events.emit(ClientEvent::PaginationFailed {
						room_id,
						error: SessionError::PaginationFetch {
							room_id,
							reason: format!("no reply within {timeout:?}"),
						},
					});
				}
			});

			let mut reg = self.shared.registry.lock();
			match reg.slots.get_mut(&room_id) {
				Some(Slot::Ready(ready)) => {
					if let Some(previous) = ready.page_timer.replace(timer) {
						previous.abort();
					}
				}
				_ => timer.abort(),
			}
		}

		Ok(LoadOlder::Requested(page))
	}
}

async fn wait_for_outcome(
	room_id: RoomId,
	mut rx: watch::Receiver<OpenOutcome>,
) -> Result<RoomSnapshot, SessionError> {
	match rx.wait_for(Option::is_some).await {
		Ok(outcome) => {
			let outcome: OpenOutcome = (*outcome).clone();
			outcome.unwrap_or_else(|| Err(closed_during_open(room_id)))
		}
		Err(_) => Err(closed_during_open(room_id)),
	}
}

/// One `connecting -> ready` attempt. Dropping it unfinished rolls the slot back.
struct OpenAttempt<'a> {
	shared: &'a Arc<Shared>,
	room_id: RoomId,
	generation: u64,
	tx: watch::Sender<OpenOutcome>,
	/// Transport established by this attempt and not yet handed to the registry.
	session: Option<Arc<dyn TransportSession>>,
	done: bool,
}

impl OpenAttempt<'_> {
	async fn run(&mut self, credentials: Credentials) -> Result<RoomSnapshot, SessionError> {
		let shared = self.shared;
		let room_id = self.room_id;

		let request = ConnectRequest {
			url: shared.config.endpoint.socket_url(),
			room_id,
			user_id: credentials.user_id,
		};
		info!(room_id = %room_id, url = %request.url, "connecting room session");

		let TransportLink { session, inbound } = shared
			.connector
			.connect(request)
			.await
			.map_err(|source| SessionError::Connection { room_id, source })?;
		self.session = Some(Arc::clone(&session));

		for topic in RoomTopic::subscription_set(room_id) {
			session
				.subscribe(&topic)
				.await
				.map_err(|source| SessionError::Connection { room_id, source })?;
		}
		debug!(room_id = %room_id, "room topics subscribed");

		let data = shared
			.fetcher
			.fetch_snapshot(room_id, shared.config.initial_lines)
			.await
			.map_err(|source| SessionError::InitFetch { room_id, source })?;

		let snapshot = {
			let mut reg = shared.registry.lock();
			if !reg.is_connecting(room_id, self.generation) {
				return Err(closed_during_open(room_id));
			}

			let snapshot =
				shared
					.store
					.lock()
					.seed_room(room_id, data, credentials.user_id, shared.config.initial_lines);

			let lost = Arc::new(AtomicBool::new(false));
			let retired = Arc::new(AtomicBool::new(false));
			let pump = spawn_pump(PumpContext {
				room_id,
				store: Arc::clone(&shared.store),
				events: shared.events.clone(),
				apply: ApplyContext {
					me: credentials.user_id,
					max_messages_per_room: shared.config.max_messages_per_room,
				},
				max_frame_bytes: shared.config.max_frame_bytes,
				lost: Arc::clone(&lost),
				retired: Arc::clone(&retired),
			}, inbound);

			reg.slots.insert(
				room_id,
				Slot::Ready(ReadySession {
					session,
					pump,
					lost,
					retired,
					page_timer: None,
				}),
			);
			snapshot
		};
		self.session = None;

		info!(
			room_id = %room_id,
			room_name = %snapshot.room_name,
			messages = snapshot.messages.len(),
			members = snapshot.members.len(),
			"room session ready"
		);
		shared.events.emit(ClientEvent::RoomUpdated {
			room_id,
			change: RoomChange::Opened,
		});

		Ok(snapshot)
	}

	async fn finish(mut self, result: &Result<RoomSnapshot, SessionError>) {
		self.done = true;

		if let Err(err) = result {
			if let Some(session) = self.session.take() {
				session.disconnect().await;
			}
			let mut reg = self.shared.registry.lock();
			if reg.is_connecting(self.room_id, self.generation) {
				reg.slots.remove(&self.room_id);
			}
			warn!(room_id = %self.room_id, error = %err, "room open failed");
		}

		let _ = self.tx.send(Some(result.clone()));
	}
}

impl Drop for OpenAttempt<'_> {
	fn drop(&mut self) {
		if self.done {
			return;
		}

		{
			let mut reg = self.shared.registry.lock();
			if reg.is_connecting(self.room_id, self.generation) {
				reg.slots.remove(&self.room_id);
			}
		}

		if let Some(session) = self.session.take()
			&& let Ok(handle) = tokio::runtime::Handle::try_current()
		{
			handle.spawn(async move { session.disconnect().await });
		}

		debug!(room_id = %self.room_id, "open cancelled");
		let _ = self.tx.send(Some(Err(closed_during_open(self.room_id))));
	}
}

struct PumpContext {
	room_id: RoomId,
	store: SharedStore,
	events: EventBus,
	apply: ApplyContext,
	max_frame_bytes: usize,
	lost: Arc<AtomicBool>,
	retired: Arc<AtomicBool>,
}

fn spawn_pump(ctx: PumpContext, inbound: mpsc::UnboundedReceiver<TransportInbound>) -> JoinHandle<()> {
	tokio::spawn(run_pump(ctx, inbound))
}

/// Drain one room's inbound queue in delivery order until the transport goes away.
async fn run_pump(ctx: PumpContext, mut inbound: mpsc::UnboundedReceiver<TransportInbound>) {
	let room_id = ctx.room_id;

	let reason = loop {
		let Some(item) = inbound.recv().await else {
			break "inbound queue closed".to_string();
		};

		match item {
			TransportInbound::Frame { topic, body } => match decode_inbound(&topic, &body, ctx.max_frame_bytes) {
				Ok(payload) => {
					let events = {
						let mut store = ctx.store.lock();
						if ctx.retired.load(Ordering::Acquire) {
							debug!(room_id = %room_id, "pump retired; dropping frame");
							return;
						}
						apply_inbound(&mut store, room_id, payload, &ctx.apply)
					};
					ctx.events.emit_all(events);
				}
				Err(e) => {
					warn!(room_id = %room_id, topic = %topic, error = %e, "dropping undecodable frame");
				}
			},
			TransportInbound::Disconnected { reason } => break reason,
			TransportInbound::Error { message } => break format!("transport error: {message}"),
		}
	};

	if ctx.retired.load(Ordering::Acquire) {
		debug!(room_id = %room_id, reason = %reason, "pump stopped after close");
		return;
	}

	ctx.lost.store(true, Ordering::Release);
	warn!(room_id = %room_id, reason = %reason, "room session lost");

	let abandoned = ctx
		.store
		.lock()
		.room_mut(room_id)
		.and_then(|room| room.pagination.abandon());
	if abandoned.is_some() {
		ctx.events.emit(ClientEvent::PaginationFailed {
			room_id,
			error: SessionError::PaginationFetch {
				room_id,
				reason: reason.clone(),
			},
		});
	}

	ctx.events.emit(ClientEvent::SessionFatal { room_id, reason });
}
