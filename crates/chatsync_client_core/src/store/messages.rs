#![forbid(unsafe_code)]

use chatsync_domain::{LinkPreview, Message, MessageId};

/// Result of applying a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
	/// Added at the tail.
	Appended,
	/// Arrived late; inserted at its ordered position.
	Inserted,
	/// Id already present; log unchanged.
	Duplicate,
}

impl AppendOutcome {
	pub fn is_new(self) -> bool {
		!matches!(self, AppendOutcome::Duplicate)
	}
}

/// Ordered message log of one room.
///
/// Entries are strictly ascending by id with no duplicates; the id is the only ordering key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
	entries: Vec<Message>,
}

impl MessageLog {
	pub fn new() -> Self {
		Self::default()
	}

	fn position(&self, id: MessageId) -> Result<usize, usize> {
		self.entries.binary_search_by_key(&id, |m| m.id)
	}

	/// Replace the log with `messages`, in any order.
	pub fn seed(&mut self, messages: impl IntoIterator<Item = Message>) {
		let mut entries: Vec<Message> = messages.into_iter().collect();
		entries.sort_by_key(|m| m.id);
		entries.dedup_by_key(|m| m.id);
		self.entries = entries;
	}

	pub fn append_live(&mut self, message: Message) -> AppendOutcome {
		match self.entries.last() {
			None => {
				self.entries.push(message);
				AppendOutcome::Appended
			}
			Some(last) if message.id > last.id => {
				self.entries.push(message);
				AppendOutcome::Appended
			}
			Some(_) => match self.position(message.id) {
				Ok(_) => AppendOutcome::Duplicate,
				Err(idx) => {
					self.entries.insert(idx, message);
					AppendOutcome::Inserted
				}
			},
		}
	}

	/// Merge an older page in any order. Returns how many messages were added.
	pub fn prepend_older_page(&mut self, older: impl IntoIterator<Item = Message>) -> usize {
		let mut fresh: Vec<Message> = older.into_iter().filter(|m| self.position(m.id).is_err()).collect();
		fresh.sort_by_key(|m| m.id);
		fresh.dedup_by_key(|m| m.id);

		let added = fresh.len();
		if added == 0 {
			return 0;
		}

		let head_is_older = match (fresh.last(), self.entries.first()) {
			(Some(newest_fresh), Some(oldest)) => newest_fresh.id < oldest.id,
			_ => true,
		};

		if head_is_older {
			fresh.append(&mut self.entries);
			self.entries = fresh;
		} else {
			self.entries.append(&mut fresh);
			self.entries.sort_by_key(|m| m.id);
		}

		added
	}

	/// Attach a link preview. Unknown id is a no-op.
	pub fn attach_preview(&mut self, id: MessageId, preview: LinkPreview) -> bool {
		match self.position(id) {
			Ok(idx) => {
				self.entries[idx].link_preview = Some(preview);
				true
			}
			Err(_) => false,
		}
	}

	pub fn remove_message(&mut self, id: MessageId) -> bool {
		match self.position(id) {
			Ok(idx) => {
				self.entries.remove(idx);
				true
			}
			Err(_) => false,
		}
	}

	pub fn edit_message(&mut self, id: MessageId, content: String) -> bool {
		match self.position(id) {
			Ok(idx) => {
				self.entries[idx].content = content;
				true
			}
			Err(_) => false,
		}
	}

	/// Drop the oldest entries beyond `max`. Returns how many were dropped.
	pub fn trim_to(&mut self, max: usize) -> usize {
		let excess = self.entries.len().saturating_sub(max);
		if excess > 0 {
			self.entries.drain(..excess);
		}
		excess
	}

	pub fn get(&self, id: MessageId) -> Option<&Message> {
		self.position(id).ok().map(|idx| &self.entries[idx])
	}

	pub fn contains(&self, id: MessageId) -> bool {
		self.position(id).is_ok()
	}

	pub fn oldest_id(&self) -> Option<MessageId> {
		self.entries.first().map(|m| m.id)
	}

	pub fn newest_id(&self) -> Option<MessageId> {
		self.entries.last().map(|m| m.id)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn as_slice(&self) -> &[Message] {
		&self.entries
	}

	pub fn to_vec(&self) -> Vec<Message> {
		self.entries.clone()
	}
}

#[cfg(test)]
pub(crate) fn test_message(id: u64) -> Message {
	use chatsync_domain::{MessageKind, UserId};

	Message {
		id: MessageId(id),
		author_id: UserId(1),
		author_name: "ana".to_string(),
		author_avatar: None,
		content: format!("message {id}"),
		kind: MessageKind::Text,
		created_at: String::new(),
		link_preview: None,
	}
}
