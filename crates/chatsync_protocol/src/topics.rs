#![forbid(unsafe_code)]

use chatsync_domain::RoomId;

/// Connect header carrying the authenticated user id.
pub const HEADER_USER_ID: &str = "user_id";

/// Connect header carrying the room the session is scoped to.
pub const HEADER_ROOM_ID: &str = "room_id";

/// Session-scoped private reply topic (older pages, personal notifications).
pub const REPLY_TOPIC: &str = "/user/topic/queue/reply";

/// Publish destinations understood by the server.
pub mod destinations {
	/// New chat message: `ChatMessageRequest`.
	pub const SEND_MESSAGE: &str = "/app/chat.sendMessage";
	/// Older page request: `OlderPageRequest`, answered on the reply topic.
	pub const REQUEST_OLDER_MESSAGES: &str = "/app/chat.getMessageList";
	/// Nickname change: `NickChangeRequest`.
	pub const CHANGE_NICKNAME: &str = "/app/chat.changeNick";
}

/// Which stream an inbound frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
	/// Live messages, edits and removals.
	Public(RoomId),
	/// Roster events.
	Users(RoomId),
	/// Link previews.
	Previews(RoomId),
	/// Private reply channel.
	Reply,
}

/// Topic helpers for room subscriptions.
pub struct RoomTopic;

impl RoomTopic {
	/// Prefix for room topics.
	pub const PREFIX: &'static str = "/topic/";

	/// `/topic/{roomId}/public`
	pub fn public(room: RoomId) -> String {
		format!("{}{}/public", Self::PREFIX, room)
	}

	/// `/topic/{roomId}/users`
	pub fn users(room: RoomId) -> String {
		format!("{}{}/users", Self::PREFIX, room)
	}

	/// `/topic/{roomId}/previews`
	pub fn previews(room: RoomId) -> String {
		format!("{}{}/previews", Self::PREFIX, room)
	}

	/// The full subscription set for one room session, reply topic first.
	pub fn subscription_set(room: RoomId) -> [String; 4] {
		[
			REPLY_TOPIC.to_string(),
			Self::public(room),
			Self::users(room),
			Self::previews(room),
		]
	}

	/// Classify a topic string. Returns `None` for topics this client never subscribes to.
	pub fn parse(topic: &str) -> Option<TopicKind> {
		let topic = topic.trim();
		if topic == REPLY_TOPIC {
			return Some(TopicKind::Reply);
		}

		let rest = topic.strip_prefix(Self::PREFIX)?;
		let (room_s, stream) = rest.split_once('/')?;
		let room: RoomId = room_s.parse().ok()?;

		match stream {
			"public" => Some(TopicKind::Public(room)),
			"users" => Some(TopicKind::Users(room)),
			"previews" => Some(TopicKind::Previews(room)),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn formats_room_topics() {
		let room = RoomId(5);
		assert_eq!(RoomTopic::public(room), "/topic/5/public");
		assert_eq!(RoomTopic::users(room), "/topic/5/users");
		assert_eq!(RoomTopic::previews(room), "/topic/5/previews");
	}

	#[test]
	fn parses_known_topics() {
		assert_eq!(RoomTopic::parse("/topic/5/public"), Some(TopicKind::Public(RoomId(5))));
		assert_eq!(RoomTopic::parse("/topic/12/users"), Some(TopicKind::Users(RoomId(12))));
		assert_eq!(RoomTopic::parse("/topic/12/previews"), Some(TopicKind::Previews(RoomId(12))));
		assert_eq!(RoomTopic::parse(REPLY_TOPIC), Some(TopicKind::Reply));
	}

	#[test]
	fn rejects_unknown_topics() {
		assert_eq!(RoomTopic::parse("/topic/abc/public"), None);
		assert_eq!(RoomTopic::parse("/topic/5/typing"), None);
		assert_eq!(RoomTopic::parse("/queue/other"), None);
	}

	#[test]
	fn subscription_set_covers_every_stream() {
		let set = RoomTopic::subscription_set(RoomId(9));
		let kinds: Vec<_> = set.iter().filter_map(|t| RoomTopic::parse(t)).collect();
		assert_eq!(kinds.len(), 4);
		assert!(kinds.contains(&TopicKind::Reply));
		assert!(kinds.contains(&TopicKind::Previews(RoomId(9))));
	}
}
