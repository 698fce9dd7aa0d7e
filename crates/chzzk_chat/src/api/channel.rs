#![forbid(unsafe_code)]

use chzzk_domain::ChannelId;
use serde::Deserialize;

use super::ChzzkClient;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialChannel {
	pub channel_id: Option<String>,
	pub channel_name: Option<String>,
	pub channel_image_url: Option<String>,
	pub verified_mark: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Channel {
	#[serde(flatten)]
	pub partial: PartialChannel,
	pub channel_description: Option<String>,
	pub follower_count: u64,
	pub open_live: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Video {
	pub video_no: u64,
	pub video_id: Option<String>,
	pub video_title: Option<String>,
	pub video_type: Option<String>,
	pub publish_date: Option<String>,
	pub thumbnail_image_url: Option<String>,
	pub duration: u64,
	pub read_count: u64,
	pub publish_date_at: i64,
	pub category_type: Option<String>,
	pub video_category: Option<String>,
	pub video_category_value: Option<String>,
	pub channel: Option<PartialChannel>,
	pub vod_status: Option<String>,
	pub live_open_date: Option<String>,
}

impl ChzzkClient {
	/// `None` when the id does not belong to a channel.
	pub async fn channel(&self, channel: &ChannelId) -> anyhow::Result<Option<Channel>> {
		let url = self.api_url(&format!("/service/v1/channels/{}", urlencoding::encode(channel.as_str())));
		let content: Option<Channel> = self.get_content(&url, "channel").await?;
		Ok(content.filter(|c| c.partial.channel_id.as_deref().is_some_and(|id| !id.is_empty())))
	}

	pub async fn video(&self, video_no: u64) -> anyhow::Result<Option<Video>> {
		let url = self.api_url(&format!("/service/v1/videos/{video_no}"));
		self.get_content(&url, "video").await
	}
}
