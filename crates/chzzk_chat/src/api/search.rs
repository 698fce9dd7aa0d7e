#![forbid(unsafe_code)]

use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ChzzkClient;
use super::channel::{Channel, PartialChannel, Video};
use super::live::{LiveDetail, RawLiveDetail, decode_live_detail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
	pub size: u32,
	pub offset: u32,
}

impl Default for SearchOptions {
	fn default() -> Self {
		Self { size: 13, offset: 0 }
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelSearchResult {
	pub size: u32,
	pub next_offset: u32,
	pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoSearchResult {
	pub size: u32,
	pub next_offset: u32,
	/// Each video carries the channel it was found under.
	pub videos: Vec<Video>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSearchResult {
	pub size: u32,
	pub next_offset: u32,
	pub lives: Vec<LiveDetail>,
}

/// `content` of every `/service/v1/search/{kind}` response.
#[derive(Debug, Deserialize)]
struct RawSearch<H> {
	#[serde(default)]
	size: u32,
	#[serde(default)]
	page: Option<RawPage>,
	#[serde(default = "Vec::new")]
	data: Vec<H>,
}

impl<H> RawSearch<H> {
	fn next_offset(&self) -> u32 {
		self.page
			.as_ref()
			.and_then(|p| p.next.as_ref())
			.map(|n| n.offset)
			.unwrap_or_default()
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPage {
	next: Option<RawOffset>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawOffset {
	offset: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawChannelHit {
	channel: Option<Channel>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawVideoHit {
	video: Option<Video>,
	channel: Option<PartialChannel>,
}

#[derive(Debug, Deserialize)]
struct RawLiveHit {
	#[serde(default)]
	live: Option<RawLiveDetail>,
	#[serde(default)]
	channel: Option<PartialChannel>,
}

impl From<RawSearch<RawChannelHit>> for ChannelSearchResult {
	fn from(raw: RawSearch<RawChannelHit>) -> Self {
		Self {
			size: raw.size,
			next_offset: raw.next_offset(),
			channels: raw.data.into_iter().filter_map(|hit| hit.channel).collect(),
		}
	}
}

impl From<RawSearch<RawVideoHit>> for VideoSearchResult {
	fn from(raw: RawSearch<RawVideoHit>) -> Self {
		let next_offset = raw.next_offset();
		let videos = raw
			.data
			.into_iter()
			.filter_map(|hit| {
				let mut video = hit.video?;
				if hit.channel.is_some() {
					video.channel = hit.channel;
				}
				Some(video)
			})
			.collect();
		Self {
			size: raw.size,
			next_offset,
			videos,
		}
	}
}

fn decode_live_search(raw: RawSearch<RawLiveHit>) -> anyhow::Result<LiveSearchResult> {
	let next_offset = raw.next_offset();
	let mut lives = Vec::with_capacity(raw.data.len());
	for hit in raw.data {
		let Some(live) = hit.live else {
			continue;
		};
		let mut live = decode_live_detail(live)?;
		if hit.channel.is_some() {
			live.channel = hit.channel;
		}
		lives.push(live);
	}
	Ok(LiveSearchResult {
		size: raw.size,
		next_offset,
		lives,
	})
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAutoComplete {
	data: Vec<String>,
}

impl ChzzkClient {
	async fn search<H: DeserializeOwned>(
		&self,
		kind: &str,
		keyword: &str,
		options: SearchOptions,
		label: &'static str,
	) -> anyhow::Result<Option<RawSearch<H>>> {
		let url = self.api_url(&format!(
			"/service/v1/search/{kind}?keyword={}&offset={}&size={}",
			urlencoding::encode(keyword),
			options.offset,
			options.size
		));
		self.get_content(&url, label).await
	}

	pub async fn search_channels(&self, keyword: &str, options: SearchOptions) -> anyhow::Result<ChannelSearchResult> {
		let raw: Option<RawSearch<RawChannelHit>> = self.search("channels", keyword, options, "search channels").await?;
		Ok(raw.map(ChannelSearchResult::from).unwrap_or_default())
	}

	pub async fn search_videos(&self, keyword: &str, options: SearchOptions) -> anyhow::Result<VideoSearchResult> {
		let raw: Option<RawSearch<RawVideoHit>> = self.search("videos", keyword, options, "search videos").await?;
		Ok(raw.map(VideoSearchResult::from).unwrap_or_default())
	}

	pub async fn search_lives(&self, keyword: &str, options: SearchOptions) -> anyhow::Result<LiveSearchResult> {
		let raw: Option<RawSearch<RawLiveHit>> = self.search("lives", keyword, options, "search lives").await?;
		match raw {
			Some(raw) => decode_live_search(raw),
			None => Ok(LiveSearchResult::default()),
		}
	}

	/// Keyword suggestions from the game service.
	pub async fn search_autocomplete(&self, keyword: &str, options: SearchOptions) -> anyhow::Result<Vec<String>> {
		let url = self.game_url(&format!(
			"/v2/search/lounges/auto-complete?keyword={}&offset={}&size={}",
			urlencoding::encode(keyword),
			options.offset,
			options.size
		));
		let raw: Option<RawAutoComplete> = self.get_content(&url, "search autocomplete").await?;
		Ok(raw.map(|r| r.data).unwrap_or_default())
	}
}
