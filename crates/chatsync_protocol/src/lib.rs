#![forbid(unsafe_code)]

pub mod codec;
pub mod topics;
pub mod wire;

pub use codec::{
	CodecError, DEFAULT_MAX_FRAME_SIZE, InboundPayload, decode_inbound, decode_inbound_default, encode_body,
	encode_body_default,
};
pub use topics::{HEADER_ROOM_ID, HEADER_USER_ID, REPLY_TOPIC, RoomTopic, TopicKind, destinations};
