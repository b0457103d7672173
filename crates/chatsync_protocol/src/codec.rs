#![forbid(unsafe_code)]

use chatsync_domain::{LinkPreview, Message, MessageId, MessageKind, RoomId, RosterEvent};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::topics::{RoomTopic, TopicKind};
use crate::wire::{ChatMessageDto, ChatMessageListDto, LinkPreviewDto, UserEventDto};

/// Default maximum body size accepted from the socket.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024; // 2 MiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("frame on unknown topic: {0}")]
	UnknownTopic(String),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// A decoded inbound frame, tagged with the room it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
	/// A new message for the room log.
	Message {
		room_id: RoomId,
		message: Message,
	},
	/// A `DELETE` control message.
	MessageRemoved {
		room_id: RoomId,
		message_id: MessageId,
	},
	/// An `UPDATE` control message carrying replacement content.
	MessageEdited {
		room_id: RoomId,
		message_id: MessageId,
		content: String,
	},
	/// Presence, nickname or role change.
	Roster {
		room_id: RoomId,
		event: RosterEvent,
	},
	/// Link preview for an existing message.
	Preview {
		room_id: RoomId,
		message_id: MessageId,
		preview: LinkPreview,
	},
	/// Older page reply. Messages are most-recent-first, exactly as received.
	OlderPage {
		room_id: RoomId,
		messages: Vec<Message>,
	},
}

impl InboundPayload {
	pub fn room_id(&self) -> RoomId {
		match self {
			InboundPayload::Message { room_id, .. }
			| InboundPayload::MessageRemoved { room_id, .. }
			| InboundPayload::MessageEdited { room_id, .. }
			| InboundPayload::Roster { room_id, .. }
			| InboundPayload::Preview { room_id, .. }
			| InboundPayload::OlderPage { room_id, .. } => *room_id,
		}
	}
}

fn check_size(body: &[u8], max_frame_size: usize) -> Result<(), CodecError> {
	if body.len() > max_frame_size {
		return Err(CodecError::FrameTooLarge {
			len: body.len(),
			max: max_frame_size,
		});
	}
	Ok(())
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, CodecError> {
	Ok(serde_json::from_slice(body)?)
}

/// Decode a frame received on `topic`.
pub fn decode_inbound(topic: &str, body: &[u8], max_frame_size: usize) -> Result<InboundPayload, CodecError> {
	check_size(body, max_frame_size)?;

	let kind = RoomTopic::parse(topic).ok_or_else(|| CodecError::UnknownTopic(topic.to_string()))?;

	let payload = match kind {
		TopicKind::Public(room_id) => {
			let message: Message = parse::<ChatMessageDto>(body)?.into();
			match message.kind {
				MessageKind::Delete => InboundPayload::MessageRemoved {
					room_id,
					message_id: message.id,
				},
				MessageKind::Update => InboundPayload::MessageEdited {
					room_id,
					message_id: message.id,
					content: message.content,
				},
				_ => InboundPayload::Message { room_id, message },
			}
		}
		TopicKind::Users(room_id) => InboundPayload::Roster {
			room_id,
			event: parse::<UserEventDto>(body)?.into(),
		},
		TopicKind::Previews(room_id) => {
			let dto: LinkPreviewDto = parse(body)?;
			InboundPayload::Preview {
				room_id,
				message_id: dto.message_id,
				preview: dto.into_preview(),
			}
		}
		TopicKind::Reply => {
			let dto: ChatMessageListDto = parse(body)?;
			InboundPayload::OlderPage {
				room_id: dto.room_id,
				messages: dto.messages.into_iter().map(Message::from).collect(),
			}
		}
	};

	Ok(payload)
}

/// Decode using `DEFAULT_MAX_FRAME_SIZE`.
pub fn decode_inbound_default(topic: &str, body: &[u8]) -> Result<InboundPayload, CodecError> {
	decode_inbound(topic, body, DEFAULT_MAX_FRAME_SIZE)
}

/// Encode an outbound body as JSON.
pub fn encode_body<T: Serialize>(value: &T, max_frame_size: usize) -> Result<Vec<u8>, CodecError> {
	let out = serde_json::to_vec(value)?;
	check_size(&out, max_frame_size)?;
	Ok(out)
}

/// Encode a body using `DEFAULT_MAX_FRAME_SIZE`.
pub fn encode_body_default<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
	encode_body(value, DEFAULT_MAX_FRAME_SIZE)
}
