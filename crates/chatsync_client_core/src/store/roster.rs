#![forbid(unsafe_code)]

use std::collections::HashSet;

use chatsync_domain::{ConnState, Role, RoomMember, RosterEvent, RosterEventType, UserId};
use tracing::debug;

/// Member list of one room, in server order. At most one entry per user id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
	members: Vec<RoomMember>,
}

impl Roster {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the roster. Duplicate user ids collapse to the first entry.
	pub fn seed(&mut self, members: impl IntoIterator<Item = RoomMember>) {
		let mut seen = HashSet::new();
		self.members = members.into_iter().filter(|m| seen.insert(m.user_id)).collect();
	}

	fn index_of(&self, user_id: UserId) -> Option<usize> {
		self.members.iter().position(|m| m.user_id == user_id)
	}

	/// Apply a roster event. Returns whether the roster changed.
	pub fn apply_event(&mut self, event: &RosterEvent) -> bool {
		let idx = self.index_of(event.user_id);

		match (&event.event_type, idx) {
			(RosterEventType::Enter | RosterEventType::RoomIn, None) => {
				self.members.push(RoomMember {
					user_id: event.user_id,
					nickname: event.nickname.clone().unwrap_or_default(),
					avatar: event.avatar.clone(),
					conn: ConnState::Connect,
					role: event.role.unwrap_or(Role::Member),
				});
				true
			}
			(RosterEventType::Enter | RosterEventType::RoomIn, Some(i)) => {
				let changed = self.members[i].conn != ConnState::Connect;
				self.members[i].conn = ConnState::Connect;
				changed
			}
			(RosterEventType::Exit, Some(i)) => {
				let changed = self.members[i].conn != ConnState::Disconnect;
				self.members[i].conn = ConnState::Disconnect;
				changed
			}
			(RosterEventType::RoomOut | RosterEventType::RoomDeleted, Some(i)) => {
				self.members.remove(i);
				true
			}
			(RosterEventType::NickChange, Some(i)) => match &event.nickname {
				Some(nickname) if *nickname != self.members[i].nickname => {
					self.members[i].nickname = nickname.clone();
					true
				}
				_ => false,
			},
			(RosterEventType::RoleChange, Some(i)) => match event.role {
				Some(role) if role != self.members[i].role => {
					self.members[i].role = role;
					true
				}
				_ => false,
			},
			(RosterEventType::Unknown(kind), _) => {
				debug!(event_type = %kind, user_id = %event.user_id, "ignoring unknown roster event");
				false
			}
			(_, None) => false,
		}
	}

	/// Refresh a member's avatar from a live message. Only a present, different reference counts.
	pub fn refresh_avatar(&mut self, user_id: UserId, avatar: Option<&str>) -> bool {
		let (Some(avatar), Some(i)) = (avatar, self.index_of(user_id)) else {
			return false;
		};
		if self.members[i].avatar.as_deref() == Some(avatar) {
			return false;
		}
		self.members[i].avatar = Some(avatar.to_string());
		true
	}

	pub fn get(&self, user_id: UserId) -> Option<&RoomMember> {
		self.index_of(user_id).map(|i| &self.members[i])
	}

	pub fn members(&self) -> &[RoomMember] {
		&self.members
	}

	pub fn len(&self) -> usize {
		self.members.len()
	}

	pub fn is_empty(&self) -> bool {
		self.members.is_empty()
	}
}
