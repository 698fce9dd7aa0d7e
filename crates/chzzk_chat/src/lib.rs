#![forbid(unsafe_code)]

pub mod api;
pub mod bus;
pub mod codec;
pub mod credentials;
pub mod error;
pub mod event;
pub mod metadata;
pub mod normalize;
pub mod session;

use std::fmt;

pub use api::ChzzkClient;
pub use bus::{EventBus, HandlerId};
pub use credentials::{AccessGrant, CredentialResolver};
pub use error::ChatError;
pub use event::{ChatEvent, EventKind, Profile, UserRole, topic};
pub use metadata::MetadataService;
pub use session::{
	BaseUrls, ChatSession, ChatSessionBuilder, ChatSessionConfig, ChatSocket, ChatTarget, SessionState, WsConnector,
};

pub use chzzk_domain::{ChannelId, ChatChannelId, ParseIdError, UserIdHash};

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}
