#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Length of a chat room identifier.
pub const CHAT_CHANNEL_ID_LEN: usize = 6;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "errors", derive(thiserror::Error))]
pub enum ParseIdError {
	#[cfg_attr(feature = "errors", error("empty value"))]
	Empty,
	#[cfg_attr(feature = "errors", error("invalid chat channel id: {0}"))]
	InvalidChatChannelId(String),
}

#[cfg(not(feature = "errors"))]
impl fmt::Display for ParseIdError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Empty => f.write_str("empty value"),
			Self::InvalidChatChannelId(id) => write!(f, "invalid chat channel id: {id}"),
		}
	}
}

/// Broadcaster channel identifier (the account, not the chat room).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ChannelId(String);

impl ChannelId {
	/// Create a non-empty `ChannelId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(trimmed.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelId::new(s.to_string())
	}
}

/// Chat room identifier.
///
/// Always six ASCII alphanumerics. A broadcast keeps one of these for its
/// lifetime, but a channel gets a new one whenever it goes live again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(transparent))]
pub struct ChatChannelId(String);

impl ChatChannelId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		let trimmed = id.trim();
		if trimmed.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if trimmed.len() != CHAT_CHANNEL_ID_LEN || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
			return Err(ParseIdError::InvalidChatChannelId(trimmed.to_string()));
		}
		Ok(Self(trimmed.to_string()))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for ChatChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChatChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChatChannelId::new(s.to_string())
	}
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ChatChannelId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		ChatChannelId::new(s).map_err(serde::de::Error::custom)
	}
}

/// Hashed user identifier as used by chat profiles and the handshake `uid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct UserIdHash(String);

impl UserIdHash {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for UserIdHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
