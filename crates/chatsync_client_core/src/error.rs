#![forbid(unsafe_code)]

use chatsync_domain::{MessageKind, RoomId};
use thiserror::Error;

/// Errors reported by a transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	#[error("connect failed: {0}")]
	Connect(String),

	#[error("subscribe to {topic} failed: {reason}")]
	Subscribe {
		topic: String,
		reason: String,
	},

	#[error("publish to {destination} failed: {reason}")]
	Publish {
		destination: String,
		reason: String,
	},

	#[error("session closed")]
	Closed,
}

/// Errors reported by the initial snapshot fetcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
	#[error("room not found: {0}")]
	NotFound(RoomId),

	#[error("request failed: {0}")]
	Request(String),

	#[error("invalid snapshot body: {0}")]
	Decode(String),
}

/// Errors for room session operations.
///
/// Cloneable so that every caller awaiting the same in-flight open observes the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
	/// The transport could not be established or subscribed.
	#[error("room {room_id}: connection failed: {source}")]
	Connection {
		room_id: RoomId,
		source: TransportError,
	},

	/// The transport came up but the initial snapshot could not be fetched.
	#[error("room {room_id}: initial fetch failed: {source}")]
	InitFetch {
		room_id: RoomId,
		source: FetchError,
	},

	/// Another join for the same room is still running.
	#[error("room {room_id}: join already in progress")]
	JoinInProgress {
		room_id: RoomId,
	},

	/// An established session was lost.
	#[error("room {room_id}: session lost: {reason}")]
	SessionFatal {
		room_id: RoomId,
		reason: String,
	},

	/// An older-page request could not be issued or was never answered.
	#[error("room {room_id}: older page fetch failed: {reason}")]
	PaginationFetch {
		room_id: RoomId,
		reason: String,
	},

	/// The room has no ready session.
	#[error("room {room_id}: no ready session")]
	NotOpen {
		room_id: RoomId,
	},

	/// Delete and update kinds edit existing messages and are never sent as new ones.
	#[error("room {room_id}: cannot send a {} message", .kind.as_str())]
	UnsupportedKind {
		room_id: RoomId,
		kind: MessageKind,
	},

	/// Publishing a message or nickname change failed.
	#[error("room {room_id}: publish failed: {source}")]
	Publish {
		room_id: RoomId,
		source: TransportError,
	},
}

impl SessionError {
	pub fn room_id(&self) -> RoomId {
		match self {
			SessionError::Connection { room_id, .. }
			| SessionError::InitFetch { room_id, .. }
			| SessionError::JoinInProgress { room_id }
			| SessionError::SessionFatal { room_id, .. }
			| SessionError::PaginationFetch { room_id, .. }
			| SessionError::NotOpen { room_id }
			| SessionError::UnsupportedKind { room_id, .. }
			| SessionError::Publish { room_id, .. } => *room_id,
		}
	}
}
