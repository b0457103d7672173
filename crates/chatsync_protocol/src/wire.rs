#![forbid(unsafe_code)]

//! JSON bodies exchanged with the server. Field names are camelCase on the wire.

use chatsync_domain::{
	ConnState, LinkPreview, Message, MessageId, MessageKind, Role, RoomId, RoomMember, RosterEvent, RosterEventType,
	UserId,
};
use serde::{Deserialize, Serialize};

/// Message as published on `/topic/{roomId}/public` and inside snapshots/pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageDto {
	pub message_id: MessageId,
	pub author_id: UserId,
	#[serde(default)]
	pub author_name: String,
	#[serde(default)]
	pub author_profile_image_url: Option<String>,
	#[serde(default)]
	pub content: String,
	pub message_type: MessageKind,
	#[serde(default)]
	pub created_at: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub link_preview: Option<LinkPreviewDto>,
}

impl From<ChatMessageDto> for Message {
	fn from(dto: ChatMessageDto) -> Self {
		Message {
			id: dto.message_id,
			author_id: dto.author_id,
			author_name: dto.author_name,
			author_avatar: dto.author_profile_image_url.filter(|s| !s.is_empty()),
			content: dto.content,
			kind: dto.message_type,
			created_at: dto.created_at,
			link_preview: dto.link_preview.map(|p| p.into_preview()),
		}
	}
}

impl From<&Message> for ChatMessageDto {
	fn from(m: &Message) -> Self {
		ChatMessageDto {
			message_id: m.id,
			author_id: m.author_id,
			author_name: m.author_name.clone(),
			author_profile_image_url: m.author_avatar.clone(),
			content: m.content.clone(),
			message_type: m.kind.clone(),
			created_at: m.created_at.clone(),
			link_preview: m.link_preview.as_ref().map(|p| LinkPreviewDto::from_preview(m.id, p)),
		}
	}
}

/// Preview pushed on `/topic/{roomId}/previews`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPreviewDto {
	pub message_id: MessageId,
	pub url: String,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub image_url: Option<String>,
}

impl LinkPreviewDto {
	pub fn into_preview(self) -> LinkPreview {
		LinkPreview {
			url: self.url,
			title: self.title,
			description: self.description,
			image_url: self.image_url,
		}
	}

	pub fn from_preview(message_id: MessageId, p: &LinkPreview) -> Self {
		Self {
			message_id,
			url: p.url.clone(),
			title: p.title.clone(),
			description: p.description.clone(),
			image_url: p.image_url.clone(),
		}
	}
}

/// Roster event published on `/topic/{roomId}/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventDto {
	pub event_type: RosterEventType,
	pub user_id: UserId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nickname: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role: Option<Role>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub profile_image_url: Option<String>,
}

impl From<UserEventDto> for RosterEvent {
	fn from(dto: UserEventDto) -> Self {
		RosterEvent {
			event_type: dto.event_type,
			user_id: dto.user_id,
			nickname: dto.nickname,
			role: dto.role,
			avatar: dto.profile_image_url.filter(|s| !s.is_empty()),
		}
	}
}

impl From<&RosterEvent> for UserEventDto {
	fn from(ev: &RosterEvent) -> Self {
		UserEventDto {
			event_type: ev.event_type.clone(),
			user_id: ev.user_id,
			nickname: ev.nickname.clone(),
			role: ev.role,
			profile_image_url: ev.avatar.clone(),
		}
	}
}

/// Roster entry inside a room snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomUserDto {
	pub user_id: UserId,
	#[serde(default)]
	pub nickname: String,
	#[serde(default)]
	pub role: Option<Role>,
	#[serde(default)]
	pub conn: Option<ConnState>,
	#[serde(default)]
	pub profile_image_url: Option<String>,
}

impl From<ChatRoomUserDto> for RoomMember {
	fn from(dto: ChatRoomUserDto) -> Self {
		RoomMember {
			user_id: dto.user_id,
			nickname: dto.nickname,
			avatar: dto.profile_image_url.filter(|s| !s.is_empty()),
			conn: dto.conn.unwrap_or(ConnState::Disconnect),
			role: dto.role.unwrap_or(Role::Member),
		}
	}
}

impl From<&RoomMember> for ChatRoomUserDto {
	fn from(m: &RoomMember) -> Self {
		ChatRoomUserDto {
			user_id: m.user_id,
			nickname: m.nickname.clone(),
			role: Some(m.role),
			conn: Some(m.conn),
			profile_image_url: m.avatar.clone(),
		}
	}
}

/// Initial snapshot returned by `GET /room/{roomId}/init?lines=N`.
///
/// `messages` are most-recent-first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInitDataDto {
	#[serde(default)]
	pub room_name: String,
	#[serde(default)]
	pub users: Vec<ChatRoomUserDto>,
	#[serde(default)]
	pub messages: Vec<ChatMessageDto>,
}

/// Older page reply delivered on the reply topic. `messages` are most-recent-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageListDto {
	pub room_id: RoomId,
	pub messages: Vec<ChatMessageDto>,
}

/// Body for `destinations::REQUEST_OLDER_MESSAGES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OlderPageRequest {
	pub room_id: RoomId,
	pub begin_id: MessageId,
	pub row_count: u32,
}

/// Body for `destinations::SEND_MESSAGE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
	pub room_id: RoomId,
	pub author_id: UserId,
	pub content: String,
	pub message_type: MessageKind,
}

/// Body for `destinations::CHANGE_NICKNAME`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NickChangeRequest {
	pub room_id: RoomId,
	pub user_id: UserId,
	pub new_nickname: String,
}
