#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use chzzk_chat::{BaseUrls, SecretString};
use chzzk_domain::{ChannelId, ChatChannelId};
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECENT_CHAT_COUNT: u32 = 50;

/// Default config path: `~/.chzzk/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".chzzk").join("config.toml"))
}

/// Load from TOML, then apply `CHZZK_*` env overrides.
pub fn load_tail_config_from_path(path: &Path) -> anyhow::Result<TailConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = TailConfig::from_file(file_cfg)?;
	apply_overrides(&mut cfg, |key| std::env::var(key).ok());
	Ok(cfg)
}

#[derive(Debug, Clone)]
pub struct TailConfig {
	pub nid_aut: Option<SecretString>,
	pub nid_ses: Option<SecretString>,
	pub access_token: Option<SecretString>,
	pub channel_id: Option<ChannelId>,
	pub chat_channel_id: Option<ChatChannelId>,
	pub poll_interval: Duration,
	/// Backfill size requested after every (re)connect; 0 disables it.
	pub recent_chat_count: u32,
	pub base_urls: BaseUrls,
	/// Prometheus exporter bind address (host:port).
	pub metrics_bind: Option<String>,
}

impl Default for TailConfig {
	fn default() -> Self {
		Self {
			nid_aut: None,
			nid_ses: None,
			access_token: None,
			channel_id: None,
			chat_channel_id: None,
			poll_interval: DEFAULT_POLL_INTERVAL,
			recent_chat_count: DEFAULT_RECENT_CHAT_COUNT,
			base_urls: BaseUrls::default(),
			metrics_bind: None,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	auth: FileAuthSettings,

	#[serde(default)]
	chat: FileChatSettings,

	#[serde(default)]
	endpoints: FileEndpointSettings,

	metrics_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileAuthSettings {
	nid_aut: Option<String>,
	nid_ses: Option<String>,
	access_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	channel_id: Option<String>,
	chat_channel_id: Option<String>,
	poll_interval_secs: Option<u64>,
	recent_chat_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileEndpointSettings {
	api_base_url: Option<String>,
	game_base_url: Option<String>,
	chat_ws_url: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl TailConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let defaults = Self::default();

		let channel_id = non_empty(file.chat.channel_id)
			.map(ChannelId::new)
			.transpose()
			.context("chat.channel_id")?;
		let chat_channel_id = non_empty(file.chat.chat_channel_id)
			.map(ChatChannelId::new)
			.transpose()
			.context("chat.chat_channel_id")?;

		let base_urls = BaseUrls {
			api: non_empty(file.endpoints.api_base_url).unwrap_or(defaults.base_urls.api),
			game: non_empty(file.endpoints.game_base_url).unwrap_or(defaults.base_urls.game),
			chat_ws: non_empty(file.endpoints.chat_ws_url),
		};

		Ok(Self {
			nid_aut: non_empty(file.auth.nid_aut).map(SecretString::new),
			nid_ses: non_empty(file.auth.nid_ses).map(SecretString::new),
			access_token: non_empty(file.auth.access_token).map(SecretString::new),
			channel_id,
			chat_channel_id,
			poll_interval: file
				.chat
				.poll_interval_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.poll_interval),
			recent_chat_count: file.chat.recent_chat_count.unwrap_or(defaults.recent_chat_count),
			base_urls,
			metrics_bind: non_empty(file.metrics_bind),
		})
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

/// Apply overrides from `lookup` (the process environment outside tests).
fn apply_overrides(cfg: &mut TailConfig, lookup: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| non_empty(lookup(key));

	if let Some(v) = var("CHZZK_NID_AUT") {
		cfg.nid_aut = Some(SecretString::new(v));
		info!("auth: nid_aut overridden by env");
	}

	if let Some(v) = var("CHZZK_NID_SES") {
		cfg.nid_ses = Some(SecretString::new(v));
		info!("auth: nid_ses overridden by env");
	}

	if let Some(v) = var("CHZZK_ACCESS_TOKEN") {
		cfg.access_token = Some(SecretString::new(v));
		info!("auth: access_token overridden by env");
	}

	if let Some(v) = var("CHZZK_CHANNEL_ID") {
		match ChannelId::new(v) {
			Ok(id) => {
				info!(channel = %id, "chat config: channel_id overridden by env");
				cfg.channel_id = Some(id);
			}
			Err(e) => warn!(error = %e, "ignoring invalid CHZZK_CHANNEL_ID"),
		}
	}

	if let Some(v) = var("CHZZK_CHAT_CHANNEL_ID") {
		match ChatChannelId::new(v) {
			Ok(id) => {
				info!(room = %id, "chat config: chat_channel_id overridden by env");
				cfg.chat_channel_id = Some(id);
			}
			Err(e) => warn!(error = %e, "ignoring invalid CHZZK_CHAT_CHANNEL_ID"),
		}
	}

	if let Some(v) = var("CHZZK_POLL_INTERVAL_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.poll_interval = Duration::from_secs(secs);
		info!(secs, "chat config: poll_interval overridden by env");
	}

	if let Some(v) = var("CHZZK_RECENT_CHAT_COUNT")
		&& let Ok(count) = v.parse::<u32>()
	{
		cfg.recent_chat_count = count;
		info!(count, "chat config: recent_chat_count overridden by env");
	}

	if let Some(v) = var("CHZZK_API_BASE_URL") {
		cfg.base_urls.api = v;
		info!("endpoints: api_base_url overridden by env");
	}

	if let Some(v) = var("CHZZK_GAME_BASE_URL") {
		cfg.base_urls.game = v;
		info!("endpoints: game_base_url overridden by env");
	}

	if let Some(v) = var("CHZZK_CHAT_WS_URL") {
		cfg.base_urls.chat_ws = Some(v);
		info!("endpoints: chat_ws_url overridden by env");
	}

	if let Some(v) = var("CHZZK_METRICS_BIND") {
		cfg.metrics_bind = Some(v);
		info!("metrics_bind overridden by env");
	}
}
