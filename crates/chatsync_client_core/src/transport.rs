#![forbid(unsafe_code)]

//! Boundaries to the pub/sub transport and the snapshot endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chatsync_domain::{Message, RoomId, RoomMember, UserId};
use chatsync_protocol::wire::RoomInitDataDto;
use chatsync_protocol::{HEADER_ROOM_ID, HEADER_USER_ID};
use tokio::sync::mpsc;

use crate::error::{FetchError, TransportError};

/// Who is opening a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
	pub user_id: UserId,
}

/// Parameters for establishing one room session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
	/// Socket URL (`ws(s)://host:port/ws`).
	pub url: String,
	pub room_id: RoomId,
	pub user_id: UserId,
}

impl ConnectRequest {
	/// Connect headers sent with the session handshake.
	pub fn headers(&self) -> [(&'static str, String); 2] {
		[
			(HEADER_USER_ID, self.user_id.to_string()),
			(HEADER_ROOM_ID, self.room_id.to_string()),
		]
	}
}

/// Items delivered on a session's inbound queue, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportInbound {
	Frame {
		topic: String,
		body: Vec<u8>,
	},
	Disconnected {
		reason: String,
	},
	Error {
		message: String,
	},
}

/// One live pub/sub connection.
#[async_trait]
pub trait TransportSession: Send + Sync {
	async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

	async fn publish(&self, destination: &str, body: Vec<u8>) -> Result<(), TransportError>;

	/// Close the connection. Calling it more than once is harmless.
	async fn disconnect(&self);
}

/// An established session plus its inbound queue.
pub struct TransportLink {
	pub session: Arc<dyn TransportSession>,
	pub inbound: mpsc::UnboundedReceiver<TransportInbound>,
}

impl std::fmt::Debug for TransportLink {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportLink").finish_non_exhaustive()
	}
}

/// Opens transport sessions.
#[async_trait]
pub trait TransportConnector: Send + Sync {
	async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, TransportError>;
}

/// Initial room state. `messages` are most-recent-first, as served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomInitData {
	pub room_name: String,
	pub users: Vec<RoomMember>,
	pub messages: Vec<Message>,
}

impl From<RoomInitDataDto> for RoomInitData {
	fn from(dto: RoomInitDataDto) -> Self {
		Self {
			room_name: dto.room_name,
			users: dto.users.into_iter().map(RoomMember::from).collect(),
			messages: dto.messages.into_iter().map(Message::from).collect(),
		}
	}
}

/// Fetches the initial snapshot (`GET /room/{roomId}/init?lines=N`).
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
	async fn fetch_snapshot(&self, room_id: RoomId, line_count: u32) -> Result<RoomInitData, FetchError>;
}

/// Path of the snapshot endpoint relative to the REST base URL.
pub fn snapshot_path(room_id: RoomId, line_count: u32) -> String {
	format!("/room/{room_id}/init?lines={line_count}")
}
