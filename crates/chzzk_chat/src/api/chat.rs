#![forbid(unsafe_code)]

use anyhow::Context;
use chzzk_domain::{ChatChannelId, UserIdHash};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ChzzkClient;
use crate::SecretString;
use crate::credentials::{AccessGrant, CredentialResolver};
use crate::error::ChatError;
use crate::event::{ChatExtras, Profile};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAccessToken {
	pub access_token: SecretString,
	#[serde(default)]
	pub extra_token: Option<SecretString>,
	#[serde(default)]
	pub real_name_auth: bool,
}

/// Pins a chat message as the room notice.
#[derive(Debug, Clone, PartialEq)]
pub struct NoticeRequest {
	pub extras: ChatExtras,
	pub message: String,
	pub message_time: i64,
	pub message_user_id_hash: UserIdHash,
	pub streaming_channel_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NoticeBody<'a> {
	channel_id: &'a str,
	chat_type: &'static str,
	extras: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	message: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	message_time: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	message_user_id_hash: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	streaming_channel_id: Option<&'a str>,
}

impl ChzzkClient {
	pub async fn chat_access_token(&self, room: &ChatChannelId) -> anyhow::Result<Option<ChatAccessToken>> {
		let url = self.game_url(&format!(
			"/v1/chats/access-token?channelId={}&chatType=STREAMING",
			urlencoding::encode(room.as_str())
		));
		self.get_content(&url, "chat access token").await
	}

	pub async fn profile_card(&self, room: &ChatChannelId, user: &UserIdHash) -> anyhow::Result<Option<Profile>> {
		let url = self.game_url(&format!(
			"/v1/chats/{}/users/{}/profile-card?chatType=STREAMING",
			urlencoding::encode(room.as_str()),
			urlencoding::encode(user.as_str())
		));
		self.get_content(&url, "profile card").await
	}

	pub async fn set_notice(&self, room: &ChatChannelId, notice: &NoticeRequest) -> anyhow::Result<()> {
		let extras = serde_json::to_string(&notice.extras).context("encode notice extras")?;
		let body = NoticeBody {
			channel_id: room.as_str(),
			chat_type: "STREAMING",
			extras: Some(extras),
			message: Some(&notice.message),
			message_time: Some(notice.message_time),
			message_user_id_hash: Some(notice.message_user_id_hash.as_str()),
			streaming_channel_id: Some(&notice.streaming_channel_id),
		};
		self.send_notice(reqwest::Method::POST, &body, "set notice").await
	}

	pub async fn clear_notice(&self, room: &ChatChannelId) -> anyhow::Result<()> {
		let body = NoticeBody {
			channel_id: room.as_str(),
			chat_type: "STREAMING",
			extras: None,
			message: None,
			message_time: None,
			message_user_id_hash: None,
			streaming_channel_id: None,
		};
		self.send_notice(reqwest::Method::DELETE, &body, "clear notice").await
	}

	async fn send_notice(&self, method: reqwest::Method, body: &NoticeBody<'_>, label: &'static str) -> anyhow::Result<()> {
		let url = self.game_url("/v1/chats/notices");
		let req = self.request(method, &url).json(body);
		self.send_for_content::<serde_json::Value>(req, label).await?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl CredentialResolver for ChzzkClient {
	async fn resolve_access(&self, room: &ChatChannelId) -> Result<AccessGrant, ChatError> {
		// Identity decides SEND vs READ, so look it up before the token.
		let identity_hash = if self.has_auth() {
			self.user_status()
				.await
				.map_err(|err| ChatError::Credential(format!("{err:#}")))?
				.and_then(|status| status.identity_hash())
		} else {
			None
		};

		let token = self
			.chat_access_token(room)
			.await
			.map_err(|err| ChatError::Credential(format!("{err:#}")))?
			.ok_or_else(|| ChatError::Credential(format!("no access token issued for room {room}")))?;

		debug!(room = %room, authenticated = identity_hash.is_some(), "resolved chat access token");
		Ok(AccessGrant {
			access_token: token.access_token,
			identity_hash,
		})
	}
}
