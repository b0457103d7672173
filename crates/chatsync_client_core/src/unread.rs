#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use chatsync_domain::RoomId;

/// Tracks the active room and rooms with unseen live messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnreadTracker {
	unread: BTreeSet<RoomId>,
	active: Option<RoomId>,
}

impl UnreadTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// A live message arrived. Returns whether the unread set grew.
	pub fn on_live_message(&mut self, room_id: RoomId) -> bool {
		if self.active == Some(room_id) {
			return false;
		}
		self.unread.insert(room_id)
	}

	/// The user switched to `room_id`. Returns whether the unread set shrank.
	pub fn on_activate(&mut self, room_id: RoomId) -> bool {
		self.active = Some(room_id);
		self.unread.remove(&room_id)
	}

	/// Drop everything known about a closed room.
	pub fn forget(&mut self, room_id: RoomId) -> bool {
		if self.active == Some(room_id) {
			self.active = None;
		}
		self.unread.remove(&room_id)
	}

	pub fn clear(&mut self) {
		self.unread.clear();
		self.active = None;
	}

	pub fn is_unread(&self, room_id: RoomId) -> bool {
		self.unread.contains(&room_id)
	}

	pub fn active(&self) -> Option<RoomId> {
		self.active
	}

	pub fn unread_rooms(&self) -> Vec<RoomId> {
		self.unread.iter().copied().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unread_follows_active_room() {
		let mut t = UnreadTracker::new();
		t.on_activate(RoomId(1));

		assert!(t.on_live_message(RoomId(2)));
		assert_eq!(t.unread_rooms(), vec![RoomId(2)]);

		assert!(!t.on_live_message(RoomId(1)));
		assert!(!t.is_unread(RoomId(1)));

		assert!(t.on_activate(RoomId(2)));
		assert!(t.unread_rooms().is_empty());
		assert_eq!(t.active(), Some(RoomId(2)));
	}

	#[test]
	fn no_active_room_marks_everything_unread() {
		let mut t = UnreadTracker::new();
		assert!(t.on_live_message(RoomId(3)));
		assert!(!t.on_live_message(RoomId(3)));
		assert_eq!(t.unread_rooms(), vec![RoomId(3)]);
	}

	#[test]
	fn forget_and_clear() {
		let mut t = UnreadTracker::new();
		t.on_activate(RoomId(1));
		t.on_live_message(RoomId(2));
		t.on_live_message(RoomId(3));

		assert!(t.forget(RoomId(2)));
		assert!(!t.forget(RoomId(1)));
		assert_eq!(t.active(), None);
		assert_eq!(t.unread_rooms(), vec![RoomId(3)]);

		t.clear();
		assert!(t.unread_rooms().is_empty());
	}
}
