#![forbid(unsafe_code)]

use chzzk_domain::{ChannelId, ChatChannelId};

use crate::error::ChatError;

/// Broadcast metadata the session needs to find and track its chat room.
#[async_trait::async_trait]
pub trait MetadataService: Send + Sync + 'static {
	/// Current chat room of the broadcast, or `None` when it has none.
	async fn chat_channel_id(&self, channel: &ChannelId) -> Result<Option<ChatChannelId>, ChatError>;
}
