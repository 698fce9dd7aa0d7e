#![forbid(unsafe_code)]

use chzzk_domain::{ChatChannelId, UserIdHash};

use crate::SecretString;
use crate::error::ChatError;

/// Result of a credential exchange for one chat room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
	pub access_token: SecretString,
	/// Present only for an authenticated user; gates `SEND` capability.
	pub identity_hash: Option<UserIdHash>,
}

impl AccessGrant {
	pub fn anonymous(access_token: SecretString) -> Self {
		Self {
			access_token,
			identity_hash: None,
		}
	}

	pub fn can_send(&self) -> bool {
		self.identity_hash.is_some()
	}
}

/// Exchanges a room id for a short-lived chat access token.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync + 'static {
	/// Fails with [`ChatError::Credential`] when the service returns no content
	/// or a non-success status.
	async fn resolve_access(&self, room: &ChatChannelId) -> Result<AccessGrant, ChatError>;
}
