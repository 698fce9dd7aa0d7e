#![forbid(unsafe_code)]

use std::time::Duration;

use chzzk_domain::{ChannelId, ChatChannelId, UserIdHash};

use crate::SecretString;
use crate::codec::default_chat_ws_url;
use crate::error::ChatError;

pub const DEFAULT_API_BASE_URL: &str = "https://api.chzzk.naver.com";
pub const DEFAULT_GAME_BASE_URL: &str = "https://comm-api.game.naver.com/nng_main";
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which chat room to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatTarget {
	/// A known room id. Never changes for the life of the session.
	Room(ChatChannelId),
	/// A broadcaster; the room is looked up on connect and optionally tracked.
	Broadcast(ChannelId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrls {
	pub api: String,
	pub game: String,
	/// Replaces the sharded chat endpoint entirely.
	pub chat_ws: Option<String>,
}

impl Default for BaseUrls {
	fn default() -> Self {
		Self {
			api: DEFAULT_API_BASE_URL.to_string(),
			game: DEFAULT_GAME_BASE_URL.to_string(),
			chat_ws: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChatSessionConfig {
	pub target: ChatTarget,
	/// Room-change polling period. Only valid for [`ChatTarget::Broadcast`].
	pub poll_interval: Option<Duration>,
	pub access_token: Option<SecretString>,
	pub identity_hash: Option<UserIdHash>,
	pub base_urls: BaseUrls,
	pub keepalive_interval: Duration,
	pub handshake_timeout: Duration,
}

impl ChatSessionConfig {
	fn new(target: ChatTarget) -> Self {
		Self {
			target,
			poll_interval: None,
			access_token: None,
			identity_hash: None,
			base_urls: BaseUrls::default(),
			keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
			handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
		}
	}

	pub fn for_room(room: ChatChannelId) -> Self {
		Self::new(ChatTarget::Room(room))
	}

	pub fn for_broadcast(channel: ChannelId) -> Self {
		Self::new(ChatTarget::Broadcast(channel))
	}

	pub fn with_poll_interval(mut self, interval: Duration) -> Self {
		self.poll_interval = Some(interval);
		self
	}

	/// Use a pre-obtained token instead of a credential service.
	pub fn with_access_token(mut self, token: SecretString, identity_hash: Option<UserIdHash>) -> Self {
		self.access_token = Some(token);
		self.identity_hash = identity_hash;
		self
	}

	pub fn with_base_urls(mut self, base_urls: BaseUrls) -> Self {
		self.base_urls = base_urls;
		self
	}

	pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
		self.keepalive_interval = interval;
		self
	}

	pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
		self.handshake_timeout = timeout;
		self
	}

	pub fn validate(&self) -> Result<(), ChatError> {
		if let Some(interval) = self.poll_interval {
			if !matches!(self.target, ChatTarget::Broadcast(_)) {
				return Err(ChatError::InvalidConfig(
					"poll interval requires a broadcast target".to_string(),
				));
			}
			if interval.is_zero() {
				return Err(ChatError::InvalidConfig("poll interval must be non-zero".to_string()));
			}
		}
		if self.keepalive_interval.is_zero() {
			return Err(ChatError::InvalidConfig("keepalive interval must be non-zero".to_string()));
		}
		if self.handshake_timeout.is_zero() {
			return Err(ChatError::InvalidConfig("handshake timeout must be non-zero".to_string()));
		}
		match &self.access_token {
			Some(token) if token.is_blank() => {
				return Err(ChatError::InvalidConfig("access token is blank".to_string()));
			}
			None if self.identity_hash.is_some() => {
				return Err(ChatError::InvalidConfig(
					"identity hash given without an access token".to_string(),
				));
			}
			_ => {}
		}
		Ok(())
	}

	pub fn chat_ws_url(&self, room: &ChatChannelId) -> String {
		self.base_urls
			.chat_ws
			.clone()
			.unwrap_or_else(|| default_chat_ws_url(room))
	}

	/// Whether teardown should forget credentials; supplied tokens are kept.
	pub(crate) fn owns_credentials(&self) -> bool {
		self.access_token.is_none()
	}
}
