#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

fn parse_numeric_id(s: &str) -> Result<u64, ParseIdError> {
	let s = s.trim();
	if s.is_empty() {
		return Err(ParseIdError::Empty);
	}
	s.parse::<u64>()
		.map_err(|_| ParseIdError::InvalidFormat(format!("expected unsigned integer id, got {s:?}")))
}

macro_rules! numeric_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub u64);

		impl $name {
			pub const fn new(id: u64) -> Self {
				Self(id)
			}

			pub const fn get(self) -> u64 {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				parse_numeric_id(s).map(Self)
			}
		}

		impl From<u64> for $name {
			fn from(id: u64) -> Self {
				Self(id)
			}
		}
	};
}

numeric_id!(
	/// Server-assigned room identifier.
	RoomId
);

numeric_id!(
	/// Server-assigned user identifier.
	UserId
);

numeric_id!(
	/// Server-assigned message identifier.
	///
	/// Ids are unique and increase with creation order, so the id doubles as the
	/// pagination cursor and the only ordering key of a room log.
	MessageId
);

/// A room the user has joined, as shown in the tab strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
	pub id: RoomId,
	pub name: String,
}

impl RoomSummary {
	pub fn new(id: RoomId, name: impl Into<String>) -> Self {
		Self { id, name: name.into() }
	}
}

/// Message kind as carried on the wire.
///
/// `Delete` and `Update` are control kinds: they travel on the public message topic but
/// mutate an existing entry instead of adding one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
	Text,
	Image,
	Video,
	File,
	Delete,
	Update,
	Other(String),
}

impl MessageKind {
	pub fn as_str(&self) -> &str {
		match self {
			MessageKind::Text => "TEXT",
			MessageKind::Image => "IMAGE",
			MessageKind::Video => "VIDEO",
			MessageKind::File => "FILE",
			MessageKind::Delete => "DELETE",
			MessageKind::Update => "UPDATE",
			MessageKind::Other(s) => s.as_str(),
		}
	}

	/// True for kinds that edit or remove an existing message.
	pub fn is_control(&self) -> bool {
		matches!(self, MessageKind::Delete | MessageKind::Update)
	}
}

impl From<String> for MessageKind {
	fn from(s: String) -> Self {
		match s.trim().to_ascii_uppercase().as_str() {
			"TEXT" => MessageKind::Text,
			"IMAGE" => MessageKind::Image,
			"VIDEO" => MessageKind::Video,
			"FILE" => MessageKind::File,
			"DELETE" => MessageKind::Delete,
			"UPDATE" => MessageKind::Update,
			_ => MessageKind::Other(s),
		}
	}
}

impl From<MessageKind> for String {
	fn from(kind: MessageKind) -> Self {
		match kind {
			MessageKind::Other(s) => s,
			other => other.as_str().to_string(),
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Link metadata attached to a message after it was created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkPreview {
	pub url: String,
	pub title: Option<String>,
	pub description: Option<String>,
	pub image_url: Option<String>,
}

/// Uploaded file reference stored in a `FILE` message body as `displayName:storedFilename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
	pub display_name: String,
	pub stored_filename: String,
}

impl FileRef {
	pub fn parse(content: &str) -> Option<Self> {
		let (display_name, stored_filename) = content.split_once(':')?;
		if display_name.is_empty() || stored_filename.is_empty() {
			return None;
		}
		Some(Self {
			display_name: display_name.to_string(),
			stored_filename: stored_filename.to_string(),
		})
	}

	/// Lowercased extension of the display name, if any.
	pub fn extension(&self) -> Option<String> {
		self.display_name
			.rsplit_once('.')
			.map(|(_, ext)| ext.to_ascii_lowercase())
			.filter(|ext| !ext.is_empty())
	}
}

/// A chat message in a room log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub id: MessageId,
	pub author_id: UserId,
	pub author_name: String,
	pub author_avatar: Option<String>,
	pub content: String,
	pub kind: MessageKind,
	pub created_at: String,
	pub link_preview: Option<LinkPreview>,
}

impl Message {
	/// Parsed file reference for `FILE` messages.
	pub fn file_ref(&self) -> Option<FileRef> {
		match self.kind {
			MessageKind::File => FileRef::parse(&self.content),
			_ => None,
		}
	}
}

/// Live connection state of a room member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnState {
	Connect,
	Disconnect,
}

/// Role of a member inside one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
	Admin,
	Member,
}

/// Roster entry for one user in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
	pub user_id: UserId,
	pub nickname: String,
	pub avatar: Option<String>,
	pub conn: ConnState,
	pub role: Role,
}

/// Roster event kinds published on a room's user topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RosterEventType {
	Enter,
	RoomIn,
	Exit,
	RoomOut,
	RoomDeleted,
	NickChange,
	RoleChange,
	Unknown(String),
}

impl RosterEventType {
	pub fn as_str(&self) -> &str {
		match self {
			RosterEventType::Enter => "ENTER",
			RosterEventType::RoomIn => "ROOM_IN",
			RosterEventType::Exit => "EXIT",
			RosterEventType::RoomOut => "ROOM_OUT",
			RosterEventType::RoomDeleted => "ROOM_DELETED",
			RosterEventType::NickChange => "NICK_CHANGE",
			RosterEventType::RoleChange => "ROLE_CHANGE",
			RosterEventType::Unknown(s) => s.as_str(),
		}
	}
}

impl From<String> for RosterEventType {
	fn from(s: String) -> Self {
		match s.trim().to_ascii_uppercase().as_str() {
			"ENTER" => RosterEventType::Enter,
			"ROOM_IN" => RosterEventType::RoomIn,
			"EXIT" => RosterEventType::Exit,
			"ROOM_OUT" => RosterEventType::RoomOut,
			"ROOM_DELETED" => RosterEventType::RoomDeleted,
			"NICK_CHANGE" => RosterEventType::NickChange,
			"ROLE_CHANGE" => RosterEventType::RoleChange,
			_ => RosterEventType::Unknown(s),
		}
	}
}

impl From<RosterEventType> for String {
	fn from(t: RosterEventType) -> Self {
		match t {
			RosterEventType::Unknown(s) => s,
			other => other.as_str().to_string(),
		}
	}
}

impl fmt::Display for RosterEventType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Presence/nickname/role change for one user in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEvent {
	pub event_type: RosterEventType,
	pub user_id: UserId,
	pub nickname: Option<String>,
	pub role: Option<Role>,
	pub avatar: Option<String>,
}

impl RosterEvent {
	pub fn new(event_type: RosterEventType, user_id: UserId) -> Self {
		Self {
			event_type,
			user_id,
			nickname: None,
			role: None,
			avatar: None,
		}
	}
}
