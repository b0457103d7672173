#![forbid(unsafe_code)]

//! Applies decoded inbound payloads to store state. Pure: no I/O, no locking.

use chatsync_domain::{RoomId, UserId};
use chatsync_protocol::InboundPayload;
use tracing::{debug, warn};

use crate::events::{ClientEvent, RoomChange};
use crate::store::StoreState;

/// Settings the apply step needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyContext {
	/// The local user, for tracking our own role.
	pub me: UserId,
	pub max_messages_per_room: Option<usize>,
}

fn updated(room_id: RoomId, change: RoomChange) -> ClientEvent {
	ClientEvent::RoomUpdated { room_id, change }
}

/// Apply one payload received on `session_room`'s session. Returns the events to publish.
pub fn apply_inbound(
	state: &mut StoreState,
	session_room: RoomId,
	payload: InboundPayload,
	ctx: &ApplyContext,
) -> Vec<ClientEvent> {
	let room_id = payload.room_id();
	if room_id != session_room {
		warn!(
			session_room = %session_room,
			payload_room = %room_id,
			"dropping payload addressed to another room"
		);
		return Vec::new();
	}

	let Some(room) = state.room_mut(room_id) else {
		debug!(room_id = %room_id, "dropping payload for a room without state");
		return Vec::new();
	};

	let mut events = Vec::new();

	match payload {
		InboundPayload::Message { message, .. } => {
			let id = message.id;
			let author = message.author_id;
			let avatar = message.author_avatar.clone();

			if !room.log.append_live(message).is_new() {
				debug!(room_id = %room_id, message_id = %id, "duplicate live message");
				return events;
			}

			if let Some(max) = ctx.max_messages_per_room
				&& room.log.trim_to(max) > 0
			{
				room.pagination.reopen();
				if !room.log.contains(id) {
					debug!(room_id = %room_id, message_id = %id, "live message fell outside the window");
					return events;
				}
			}

			events.push(updated(room_id, RoomChange::MessageAdded(id)));

			if room.roster.refresh_avatar(author, avatar.as_deref()) {
				events.push(updated(room_id, RoomChange::Roster(author)));
			}

			if state.unread.on_live_message(room_id) {
				events.push(ClientEvent::UnreadChanged {
					unread: state.unread.unread_rooms(),
				});
			}
		}

		InboundPayload::MessageRemoved { message_id, .. } => {
			if room.log.remove_message(message_id) {
				events.push(updated(room_id, RoomChange::MessageRemoved(message_id)));
			}
		}

		InboundPayload::MessageEdited {
			message_id, content, ..
		} => {
			if room.log.edit_message(message_id, content) {
				events.push(updated(room_id, RoomChange::MessageEdited(message_id)));
			}
		}

		InboundPayload::Preview {
			message_id, preview, ..
		} => {
			if room.log.attach_preview(message_id, preview) {
				events.push(updated(room_id, RoomChange::PreviewAttached(message_id)));
			} else {
				debug!(room_id = %room_id, message_id = %message_id, "preview for unknown message");
			}
		}

		InboundPayload::Roster { event, .. } => {
			let user_id = event.user_id;
			let changed = room.roster.apply_event(&event);

			if user_id == ctx.me
				&& let Some(role) = event.role
				&& room.my_role != Some(role)
			{
				room.my_role = Some(role);
				debug!(room_id = %room_id, role = ?role, "own role changed");
			}

			if changed {
				events.push(updated(room_id, RoomChange::Roster(user_id)));
			}
		}

		InboundPayload::OlderPage { messages, .. } => {
			let raw_len = messages.len();
			let Some(page) = room.pagination.complete(raw_len) else {
				warn!(room_id = %room_id, len = raw_len, "dropping unsolicited older page");
				return events;
			};

			let added = room.log.prepend_older_page(messages);
			let has_more = room.pagination.has_more();
			debug!(
				room_id = %room_id,
				begin_id = %page.begin_id,
				raw_len,
				added,
				has_more,
				"older page applied"
			);

			events.push(ClientEvent::OlderPageApplied {
				room_id,
				added,
				has_more,
			});
		}
	}

	events
}

#[cfg(test)]
mod tests {
	use chatsync_domain::{
		ConnState, LinkPreview, Message, MessageId, MessageKind, Role, RoomMember, RosterEvent, RosterEventType,
	};

	use super::*;
	use crate::pagination::LoadOlder;
	use crate::transport::RoomInitData;

	const ROOM: RoomId = RoomId(1);
	const ME: UserId = UserId(10);

	fn ctx() -> ApplyContext {
		ApplyContext {
			me: ME,
			max_messages_per_room: None,
		}
	}

	fn msg(id: u64, author: u64) -> Message {
		Message {
			id: MessageId(id),
			author_id: UserId(author),
			author_name: format!("user{author}"),
			author_avatar: None,
			content: format!("m{id}"),
			kind: MessageKind::Text,
			created_at: String::new(),
			link_preview: None,
		}
	}

	fn seeded(ids: impl IntoIterator<Item = u64>, line_count: u32) -> StoreState {
		let mut state = StoreState::new();
		let mut messages: Vec<Message> = ids.into_iter().map(|id| msg(id, 2)).collect();
		messages.reverse();
		state.seed_room(
			ROOM,
			RoomInitData {
				room_name: "general".to_string(),
				users: vec![
					RoomMember {
						user_id: ME,
						nickname: "me".to_string(),
						avatar: None,
						conn: ConnState::Connect,
						role: Role::Member,
					},
					RoomMember {
						user_id: UserId(2),
						nickname: "two".to_string(),
						avatar: None,
						conn: ConnState::Connect,
						role: Role::Member,
					},
				],
				messages,
			},
			ME,
			line_count,
		);
		state
	}

	fn ids(state: &StoreState) -> Vec<u64> {
		state.room(ROOM).unwrap().log.as_slice().iter().map(|m| m.id.get()).collect()
	}

	#[test]
	fn live_message_for_inactive_room_marks_unread() {
		let mut state = seeded([1, 2], 20);
		state.unread.on_activate(RoomId(99));

		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: ROOM,
				message: msg(3, 2),
			},
			&ctx(),
		);

		assert_eq!(ids(&state), vec![1, 2, 3]);
		assert!(events.contains(&ClientEvent::UnreadChanged { unread: vec![ROOM] }));
	}

	#[test]
	fn duplicate_live_message_changes_nothing() {
		let mut state = seeded([1, 2], 20);
		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: ROOM,
				message: msg(2, 2),
			},
			&ctx(),
		);
		assert!(events.is_empty());
		assert!(!state.unread.is_unread(ROOM));
	}

	#[test]
	fn live_message_refreshes_author_avatar() {
		let mut state = seeded([1], 20);
		let mut m = msg(5, 2);
		m.author_avatar = Some("/img/two.png".to_string());

		let events = apply_inbound(&mut state, ROOM, InboundPayload::Message { room_id: ROOM, message: m }, &ctx());

		assert!(events.contains(&ClientEvent::RoomUpdated {
			room_id: ROOM,
			change: RoomChange::Roster(UserId(2))
		}));
		let avatar = state.room(ROOM).unwrap().roster.get(UserId(2)).unwrap().avatar.clone();
		assert_eq!(avatar.as_deref(), Some("/img/two.png"));
	}

	#[test]
	fn window_trims_oldest_on_live_append() {
		let mut state = seeded([1, 2, 3], 20);
		let ctx = ApplyContext {
			max_messages_per_room: Some(3),
			..ctx()
		};
		apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: ROOM,
				message: msg(4, 2),
			},
			&ctx,
		);
		assert_eq!(ids(&state), vec![2, 3, 4]);
	}

	#[test]
	fn window_trim_reopens_older_history() {
		let mut state = seeded([10, 11, 12], 3);
		let ctx = ApplyContext {
			max_messages_per_room: Some(5),
			..ctx()
		};

		let room = state.room_mut(ROOM).unwrap();
		let oldest = room.log.oldest_id();
		assert!(matches!(room.pagination.begin(oldest, 20, 1), LoadOlder::Requested(_)));
		apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::OlderPage {
				room_id: ROOM,
				messages: vec![msg(9, 2), msg(8, 2)],
			},
			&ctx,
		);
		assert!(!state.room(ROOM).unwrap().pagination.has_more());

		apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: ROOM,
				message: msg(13, 2),
			},
			&ctx,
		);

		assert_eq!(ids(&state), vec![9, 10, 11, 12, 13]);
		let room = state.room_mut(ROOM).unwrap();
		assert!(room.pagination.has_more());
		match room.pagination.begin(room.log.oldest_id(), 20, 2) {
			LoadOlder::Requested(page) => assert_eq!(page.begin_id, MessageId(9)),
			other => panic!("expected a request, got {other:?}"),
		}
	}

	#[test]
	fn late_message_below_a_full_window_is_not_announced() {
		let mut state = seeded([10, 11, 12, 13, 14], 20);
		state.unread.on_activate(RoomId(99));
		let ctx = ApplyContext {
			max_messages_per_room: Some(5),
			..ctx()
		};

		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: ROOM,
				message: msg(3, 2),
			},
			&ctx,
		);

		assert!(events.is_empty());
		assert_eq!(ids(&state), vec![10, 11, 12, 13, 14]);
		assert!(!state.unread.is_unread(ROOM));
	}

	#[test]
	fn older_page_for_another_room_leaves_both_requests_pending() {
		const OTHER_ROOM: RoomId = RoomId(2);
		let mut state = seeded(11..=30, 20);
		state.seed_room(
			OTHER_ROOM,
			RoomInitData {
				room_name: "random".to_string(),
				users: Vec::new(),
				messages: (11..=30).rev().map(|id| msg(id, 3)).collect(),
			},
			ME,
			20,
		);
		for room_id in [ROOM, OTHER_ROOM] {
			let room = state.room_mut(room_id).unwrap();
			let oldest = room.log.oldest_id();
			assert!(matches!(room.pagination.begin(oldest, 20, 1), LoadOlder::Requested(_)));
		}
		let page = || InboundPayload::OlderPage {
			room_id: OTHER_ROOM,
			messages: (1..=10).rev().map(|id| msg(id, 3)).collect(),
		};

		let events = apply_inbound(&mut state, ROOM, page(), &ctx());
		assert!(events.is_empty());
		assert_eq!(ids(&state), (11..=30).collect::<Vec<_>>());
		assert!(state.room(ROOM).unwrap().pagination.is_loading());
		assert!(state.room(OTHER_ROOM).unwrap().pagination.is_loading());

		let events = apply_inbound(&mut state, OTHER_ROOM, page(), &ctx());
		assert_eq!(
			events,
			vec![ClientEvent::OlderPageApplied {
				room_id: OTHER_ROOM,
				added: 10,
				has_more: false
			}]
		);
		assert_eq!(state.room(OTHER_ROOM).unwrap().log.len(), 30);
		assert!(state.room(ROOM).unwrap().pagination.is_loading());
	}

	#[test]
	fn payload_for_other_room_is_dropped() {
		let mut state = seeded([1], 20);
		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Message {
				room_id: RoomId(2),
				message: msg(9, 2),
			},
			&ctx(),
		);
		assert!(events.is_empty());
		assert_eq!(ids(&state), vec![1]);
	}

	#[test]
	fn preview_for_unknown_id_leaves_log_untouched() {
		let mut state = seeded([1, 2], 20);
		let before = state.room(ROOM).unwrap().log.clone();

		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::Preview {
				room_id: ROOM,
				message_id: MessageId(77),
				preview: LinkPreview {
					url: "https://example.com".to_string(),
					..LinkPreview::default()
				},
			},
			&ctx(),
		);

		assert!(events.is_empty());
		assert_eq!(state.room(ROOM).unwrap().log, before);
	}

	#[test]
	fn remove_and_edit_control_messages() {
		let mut state = seeded([1, 2, 3], 20);
		apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::MessageRemoved {
				room_id: ROOM,
				message_id: MessageId(2),
			},
			&ctx(),
		);
		apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::MessageEdited {
				room_id: ROOM,
				message_id: MessageId(3),
				content: "edited".to_string(),
			},
			&ctx(),
		);

		assert_eq!(ids(&state), vec![1, 3]);
		let content = state.room(ROOM).unwrap().log.get(MessageId(3)).unwrap().content.clone();
		assert_eq!(content, "edited");
	}

	#[test]
	fn own_role_change_updates_my_role() {
		let mut state = seeded([], 20);
		let mut ev = RosterEvent::new(RosterEventType::RoleChange, ME);
		ev.role = Some(Role::Admin);

		apply_inbound(&mut state, ROOM, InboundPayload::Roster { room_id: ROOM, event: ev }, &ctx());
		assert_eq!(state.room(ROOM).unwrap().my_role, Some(Role::Admin));
	}

	#[test]
	fn older_page_requires_outstanding_request() {
		let mut state = seeded(11..=30, 20);
		let page: Vec<Message> = (1..=10).rev().map(|id| msg(id, 2)).collect();

		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::OlderPage {
				room_id: ROOM,
				messages: page.clone(),
			},
			&ctx(),
		);
		assert!(events.is_empty());
		assert_eq!(state.room(ROOM).unwrap().log.len(), 20);

		let room = state.room_mut(ROOM).unwrap();
		let oldest = room.log.oldest_id();
		assert!(matches!(room.pagination.begin(oldest, 20, 1), LoadOlder::Requested(_)));

		let events = apply_inbound(
			&mut state,
			ROOM,
			InboundPayload::OlderPage {
				room_id: ROOM,
				messages: page,
			},
			&ctx(),
		);

		assert_eq!(
			events,
			vec![ClientEvent::OlderPageApplied {
				room_id: ROOM,
				added: 10,
				has_more: false
			}]
		);
		assert_eq!(ids(&state), (1..=30).collect::<Vec<_>>());
	}
}
