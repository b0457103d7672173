#![forbid(unsafe_code)]

//! Multi-room realtime chat session engine.
//!
//! One transport session per joined room feeds a pump task that applies
//! decoded events to the shared store. Readers take snapshots through
//! [`ChatClient`] and follow changes through [`ClientEvent`]s.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod join;
pub mod loopback;
pub mod pagination;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;
pub mod unread;

#[cfg(test)]
mod session_tests;

pub use client::ChatClient;
pub use config::{ClientConfig, load_client_config, load_client_config_from_path};
pub use error::{FetchError, SessionError, TransportError};
pub use events::{ClientEvent, EventBus, RoomChange};
pub use join::{JoinCoordinator, JoinOutcome};
pub use loopback::LoopbackBackend;
pub use pagination::{LoadOlder, PaginationCursor, PendingPage};
pub use session::{RoomSessionState, SessionManager};
pub use store::{MessageLog, Roster, RoomSnapshot};
pub use transport::{
	ConnectRequest, Credentials, RoomInitData, SnapshotFetcher, TransportConnector, TransportInbound, TransportLink,
	TransportSession,
};
pub use unread::UnreadTracker;
