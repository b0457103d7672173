#![forbid(unsafe_code)]

//! Per-room message and roster state shared between the pump tasks and readers.

use std::collections::HashMap;
use std::sync::Arc;

use chatsync_domain::{Message, Role, RoomId, RoomMember, UserId};
use parking_lot::Mutex;

use crate::pagination::PaginationCursor;
use crate::transport::RoomInitData;
use crate::unread::UnreadTracker;

pub mod messages;
pub mod roster;

pub use messages::{AppendOutcome, MessageLog};
pub use roster::Roster;

/// Store state behind one lock. Never held across an `.await`.
pub type SharedStore = Arc<Mutex<StoreState>>;

/// Everything held for one ready room.
#[derive(Debug, Clone)]
pub struct RoomState {
	pub name: String,
	pub log: MessageLog,
	pub roster: Roster,
	pub pagination: PaginationCursor,
	pub my_role: Option<Role>,
}

impl RoomState {
	pub fn snapshot(&self, room_id: RoomId) -> RoomSnapshot {
		RoomSnapshot {
			room_id,
			room_name: self.name.clone(),
			members: self.roster.members().to_vec(),
			messages: self.log.to_vec(),
			has_more: self.pagination.has_more(),
			my_role: self.my_role,
		}
	}
}

/// Read-side copy of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
	pub room_id: RoomId,
	pub room_name: String,
	pub members: Vec<RoomMember>,
	pub messages: Vec<Message>,
	pub has_more: bool,
	pub my_role: Option<Role>,
}

#[derive(Debug, Default)]
pub struct StoreState {
	rooms: HashMap<RoomId, RoomState>,
	pub unread: UnreadTracker,
}

impl StoreState {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn shared() -> SharedStore {
		Arc::new(Mutex::new(Self::new()))
	}

	/// Install a room from its initial snapshot, replacing any previous state.
	pub fn seed_room(&mut self, room_id: RoomId, data: RoomInitData, me: UserId, line_count: u32) -> RoomSnapshot {
		let initial_len = data.messages.len();

		let mut log = MessageLog::new();
		log.seed(data.messages);

		let mut roster = Roster::new();
		roster.seed(data.users);
		let my_role = roster.get(me).map(|m| m.role);

		let room = RoomState {
			name: data.room_name,
			log,
			roster,
			pagination: PaginationCursor::after_seed(initial_len, line_count),
			my_role,
		};
		let snapshot = room.snapshot(room_id);
		self.rooms.insert(room_id, room);
		snapshot
	}

	pub fn room(&self, room_id: RoomId) -> Option<&RoomState> {
		self.rooms.get(&room_id)
	}

	pub fn room_mut(&mut self, room_id: RoomId) -> Option<&mut RoomState> {
		self.rooms.get_mut(&room_id)
	}

	pub fn contains(&self, room_id: RoomId) -> bool {
		self.rooms.contains_key(&room_id)
	}

	/// Discard a room and its unread flag.
	pub fn remove_room(&mut self, room_id: RoomId) -> bool {
		self.unread.forget(room_id);
		self.rooms.remove(&room_id).is_some()
	}

	pub fn room_ids(&self) -> Vec<RoomId> {
		let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
		ids.sort();
		ids
	}

	pub fn clear(&mut self) {
		self.rooms.clear();
		self.unread.clear();
	}

	pub fn snapshot(&self, room_id: RoomId) -> Option<RoomSnapshot> {
		self.rooms.get(&room_id).map(|room| room.snapshot(room_id))
	}
}
