#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::future::Future;

use chatsync_domain::{RoomId, RoomSummary};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::store::RoomSnapshot;

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
	/// The room was already joined; nothing was done.
	AlreadyJoined,
	Joined(RoomSnapshot),
}

#[derive(Debug, Default)]
struct JoinState {
	/// Joined rooms in join order.
	joined: Vec<RoomSummary>,
	in_flight: HashSet<RoomId>,
}

/// Serializes "join room" requests: one in-flight join per room, losers fail fast.
#[derive(Debug, Default)]
pub struct JoinCoordinator {
	state: Mutex<JoinState>,
}

/// Releases the in-flight marker on every exit path, including cancellation.
struct InFlightGuard<'a> {
	coordinator: &'a JoinCoordinator,
	room_id: RoomId,
}

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.coordinator.state.lock().in_flight.remove(&self.room_id);
	}
}

impl JoinCoordinator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Join `room_id`, running `open` unless it is already joined or being joined.
	pub async fn join_with<F, Fut>(&self, room_id: RoomId, open: F) -> Result<JoinOutcome, SessionError>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<RoomSnapshot, SessionError>>,
	{
		let _guard = {
			let mut state = self.state.lock();
			if state.joined.iter().any(|r| r.id == room_id) {
				debug!(room_id = %room_id, "join: already joined");
				return Ok(JoinOutcome::AlreadyJoined);
			}
			if !state.in_flight.insert(room_id) {
				debug!(room_id = %room_id, "join: already in progress");
				return Err(SessionError::JoinInProgress { room_id });
			}
			InFlightGuard {
				coordinator: self,
				room_id,
			}
		};

		let snapshot = open().await?;

		{
			let mut state = self.state.lock();
			if !state.joined.iter().any(|r| r.id == room_id) {
				state.joined.push(RoomSummary::new(room_id, snapshot.room_name.clone()));
			}
		}

		info!(room_id = %room_id, room_name = %snapshot.room_name, "joined room");
		Ok(JoinOutcome::Joined(snapshot))
	}

	/// Remove a room from the joined set.
	pub fn leave(&self, room_id: RoomId) -> bool {
		let mut state = self.state.lock();
		let before = state.joined.len();
		state.joined.retain(|r| r.id != room_id);
		state.joined.len() != before
	}

	pub fn clear(&self) {
		self.state.lock().joined.clear();
	}

	pub fn is_joined(&self, room_id: RoomId) -> bool {
		self.state.lock().joined.iter().any(|r| r.id == room_id)
	}

	pub fn is_in_flight(&self, room_id: RoomId) -> bool {
		self.state.lock().in_flight.contains(&room_id)
	}

	pub fn joined_rooms(&self) -> Vec<RoomSummary> {
		self.state.lock().joined.clone()
	}
}
