#![forbid(unsafe_code)]

use chatsync_domain::MessageId;

/// An older-page request that has been published and not yet answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingPage {
	/// Unique per client; lets a timeout recognise its own request.
	pub seq: u64,
	/// Oldest id held when the request was made; the server returns ids below it.
	pub begin_id: MessageId,
	pub row_count: u32,
}

/// What `load_older_messages` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOlder {
	Requested(PendingPage),
	/// A request for this room is still outstanding.
	AlreadyLoading,
	/// The server has no older messages.
	Exhausted,
	/// No messages loaded yet, so there is no cursor to page from.
	NothingLoaded,
}

/// Backward pagination cursor of one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
	has_more: bool,
	pending: Option<PendingPage>,
}

impl PaginationCursor {
	/// Cursor after seeding: a full initial snapshot means there may be more.
	pub fn after_seed(initial_len: usize, line_count: u32) -> Self {
		Self {
			has_more: initial_len >= line_count as usize && initial_len > 0,
			pending: None,
		}
	}

	pub fn has_more(&self) -> bool {
		self.has_more
	}

	pub fn is_loading(&self) -> bool {
		self.pending.is_some()
	}

	pub fn pending(&self) -> Option<PendingPage> {
		self.pending
	}

	/// Start a request from `oldest`, unless one is outstanding or history is exhausted.
	pub fn begin(&mut self, oldest: Option<MessageId>, row_count: u32, seq: u64) -> LoadOlder {
		if self.pending.is_some() {
			return LoadOlder::AlreadyLoading;
		}
		if !self.has_more {
			return LoadOlder::Exhausted;
		}
		let Some(begin_id) = oldest else {
			return LoadOlder::NothingLoaded;
		};

		let page = PendingPage {
			seq,
			begin_id,
			row_count,
		};
		self.pending = Some(page);
		LoadOlder::Requested(page)
	}

	/// Record a reply of `raw_len` messages (before dedup).
	///
	/// Returns the request it answers, or `None` when nothing was outstanding.
	pub fn complete(&mut self, raw_len: usize) -> Option<PendingPage> {
		let page = self.pending.take()?;
		if raw_len < page.row_count as usize {
			self.has_more = false;
		}
		Some(page)
	}

	/// Abandon the outstanding request if it is `seq`. `has_more` is left alone.
	pub fn fail(&mut self, seq: u64) -> bool {
		match self.pending {
			Some(p) if p.seq == seq => {
				self.pending = None;
				true
			}
			_ => false,
		}
	}

	/// Loaded history was trimmed away; the server has older messages again.
	pub fn reopen(&mut self) {
		self.has_more = true;
	}

	/// Abandon whatever request is outstanding.
	pub fn abandon(&mut self) -> Option<PendingPage> {
		self.pending.take()
	}
}
