#![forbid(unsafe_code)]

use chatsync_domain::{MessageId, RoomId, UserId};
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::SessionError;

/// What changed inside a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomChange {
	Opened,
	MessageAdded(MessageId),
	MessageRemoved(MessageId),
	MessageEdited(MessageId),
	PreviewAttached(MessageId),
	Roster(UserId),
}

/// Notifications for reactive readers. Current state is always read from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
	RoomUpdated {
		room_id: RoomId,
		change: RoomChange,
	},
	UnreadChanged {
		unread: Vec<RoomId>,
	},
	OlderPageApplied {
		room_id: RoomId,
		added: usize,
		has_more: bool,
	},
	/// An older-page request timed out or its session died before the reply.
	PaginationFailed {
		room_id: RoomId,
		error: SessionError,
	},
	/// The room's transport dropped or errored. No reconnect is attempted.
	SessionFatal {
		room_id: RoomId,
		reason: String,
	},
	RoomClosed {
		room_id: RoomId,
	},
}

/// Fan-out of `ClientEvent`s. Sending with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
	tx: broadcast::Sender<ClientEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _) = broadcast::channel(capacity.max(1));
		Self { tx }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
		self.tx.subscribe()
	}

	pub fn emit(&self, event: ClientEvent) {
		trace!(event = ?event, "client event");
		let _ = self.tx.send(event);
	}

	pub fn emit_all(&self, events: impl IntoIterator<Item = ClientEvent>) {
		for event in events {
			self.emit(event);
		}
	}
}
