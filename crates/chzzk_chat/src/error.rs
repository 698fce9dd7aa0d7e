#![forbid(unsafe_code)]

use std::time::Duration;

use chzzk_domain::ChannelId;
use thiserror::Error;

/// Errors surfaced by [`crate::ChatSession`] and its collaborators.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
	#[error("already connected")]
	AlreadyConnected,

	#[error("not connected")]
	NotConnected,

	#[error("not authenticated: sending chat requires a user identity")]
	NotAuthenticated,

	/// Another connect/reconnect is still in flight.
	#[error("session transition in progress")]
	TransitionInProgress,

	#[error("channel {0} has no active chat room")]
	NoActiveRoom(ChannelId),

	#[error("credential error: {0}")]
	Credential(String),

	#[error("metadata lookup failed: {0}")]
	Metadata(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("handshake timed out after {0:?}")]
	HandshakeTimeout(Duration),

	#[error("invalid config: {0}")]
	InvalidConfig(String),
}

impl ChatError {
	/// Caller misuse; never worth retrying.
	pub fn is_state_error(&self) -> bool {
		matches!(
			self,
			Self::AlreadyConnected | Self::NotConnected | Self::NotAuthenticated | Self::TransitionInProgress
		)
	}
}
