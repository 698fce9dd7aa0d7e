#![forbid(unsafe_code)]

use anyhow::Context;
use chzzk_domain::{ChannelId, ChatChannelId};
use serde::Deserialize;
use serde_json::Value;

use super::ChzzkClient;
use super::channel::PartialChannel;
use crate::error::ChatError;
use crate::metadata::MetadataService;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LivePollingStatus {
	pub status: Option<String>,
	pub is_publishing: bool,
	pub playable_status: Option<String>,
	pub traffic_throttling: i64,
	pub call_period_milli_second: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveStatus {
	pub live_title: Option<String>,
	pub status: Option<String>,
	pub concurrent_user_count: u64,
	pub accumulate_count: u64,
	pub paid_promotion: bool,
	pub adult: bool,
	pub chat_channel_id: Option<String>,
	pub category_type: Option<String>,
	pub live_category: Option<String>,
	pub live_category_value: Option<String>,
	pub fault_status: Option<String>,
	#[serde(skip)]
	pub live_polling_status: Option<LivePollingStatus>,
}

impl LiveStatus {
	/// The room id, when the broadcast has a valid one.
	pub fn chat_channel_id(&self) -> Option<ChatChannelId> {
		self.chat_channel_id
			.as_deref()
			.and_then(|id| ChatChannelId::new(id).ok())
	}

	pub fn is_open(&self) -> bool {
		self.status.as_deref() == Some("OPEN")
	}
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveDetail {
	pub live_id: Option<u64>,
	pub live_title: Option<String>,
	pub status: Option<String>,
	pub live_image_url: Option<String>,
	pub default_thumbnail_image_url: Option<String>,
	pub concurrent_user_count: u64,
	pub accumulate_count: u64,
	pub open_date: Option<String>,
	pub close_date: Option<String>,
	pub adult: bool,
	pub chat_channel_id: Option<String>,
	pub category_type: Option<String>,
	pub live_category: Option<String>,
	pub live_category_value: Option<String>,
	pub chat_active: bool,
	pub chat_available_group: Option<String>,
	pub chat_available_condition: Option<String>,
	pub min_follower_minute: u64,
	pub paid_promotion: bool,
	pub channel: Option<PartialChannel>,
	#[serde(skip)]
	pub live_polling_status: Option<LivePollingStatus>,
	#[serde(skip)]
	pub live_playback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLiveStatus {
	#[serde(flatten)]
	status: LiveStatus,
	#[serde(default)]
	live_polling_status_json: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RawLiveDetail {
	#[serde(flatten)]
	detail: LiveDetail,
	#[serde(default)]
	live_polling_status_json: Option<String>,
	#[serde(default)]
	live_playback_json: Option<String>,
}

fn decode_embedded<T: serde::de::DeserializeOwned>(raw: Option<&str>, what: &str) -> anyhow::Result<Option<T>> {
	match raw.map(str::trim) {
		None | Some("") => Ok(None),
		Some(raw) => serde_json::from_str(raw).with_context(|| format!("decode {what}")),
	}
}

fn decode_live_status(raw: RawLiveStatus) -> anyhow::Result<LiveStatus> {
	let mut status = raw.status;
	status.live_polling_status = decode_embedded(raw.live_polling_status_json.as_deref(), "livePollingStatusJson")?;
	Ok(status)
}

pub(super) fn decode_live_detail(raw: RawLiveDetail) -> anyhow::Result<LiveDetail> {
	let mut detail = raw.detail;
	detail.live_polling_status = decode_embedded(raw.live_polling_status_json.as_deref(), "livePollingStatusJson")?;
	detail.live_playback = decode_embedded(raw.live_playback_json.as_deref(), "livePlaybackJson")?;
	Ok(detail)
}

impl ChzzkClient {
	pub async fn live_status(&self, channel: &ChannelId) -> anyhow::Result<Option<LiveStatus>> {
		let url = self.api_url(&format!(
			"/polling/v1/channels/{}/live-status",
			urlencoding::encode(channel.as_str())
		));
		let raw: Option<RawLiveStatus> = self.get_content(&url, "live status").await?;
		raw.map(decode_live_status).transpose()
	}

	pub async fn live_detail(&self, channel: &ChannelId) -> anyhow::Result<Option<LiveDetail>> {
		let url = self.api_url(&format!(
			"/service/v1/channels/{}/live-detail",
			urlencoding::encode(channel.as_str())
		));
		let raw: Option<RawLiveDetail> = self.get_content(&url, "live detail").await?;
		raw.map(decode_live_detail).transpose()
	}
}

#[async_trait::async_trait]
impl MetadataService for ChzzkClient {
	async fn chat_channel_id(&self, channel: &ChannelId) -> Result<Option<ChatChannelId>, ChatError> {
		let status = self
			.live_status(channel)
			.await
			.map_err(|err| ChatError::Metadata(format!("{err:#}")))?;
		Ok(status.and_then(|s| s.chat_channel_id()))
	}
}
