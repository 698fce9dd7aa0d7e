#![forbid(unsafe_code)]

//! REST endpoints used around the chat socket.

mod channel;
mod chat;
mod live;
mod search;
mod user;

use anyhow::{Context, anyhow};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

pub use channel::{Channel, PartialChannel, Video};
pub use chat::{ChatAccessToken, NoticeRequest};
pub use live::{LiveDetail, LivePollingStatus, LiveStatus};
pub use search::{ChannelSearchResult, LiveSearchResult, SearchOptions, VideoSearchResult};
pub use user::UserStatus;

use crate::SecretString;
use crate::session::BaseUrls;

const USER_AGENT: &str =
	"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Naver login cookies.
#[derive(Debug, Clone)]
pub struct NidAuth {
	pub nid_aut: SecretString,
	pub nid_ses: SecretString,
}

impl NidAuth {
	fn cookie(&self) -> String {
		format!("NID_AUT={}; NID_SES={}", self.nid_aut.expose(), self.nid_ses.expose())
	}
}

/// `{code, message, content}` wrapper every endpoint responds with.
#[derive(Debug, Deserialize)]
struct ContentEnvelope<T> {
	#[serde(default)]
	code: Option<i64>,
	#[serde(default)]
	message: Option<String>,
	content: Option<T>,
}

#[derive(Debug, Clone)]
pub struct ChzzkClient {
	base_urls: BaseUrls,
	auth: Option<NidAuth>,
	http: reqwest::Client,
}

impl ChzzkClient {
	pub fn new(base_urls: BaseUrls, auth: Option<NidAuth>) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.user_agent(USER_AGENT)
			.build()
			.context("build reqwest client")?;
		Ok(Self { base_urls, auth, http })
	}

	pub fn anonymous() -> anyhow::Result<Self> {
		Self::new(BaseUrls::default(), None)
	}

	/// Both cookies present and non-blank.
	pub fn has_auth(&self) -> bool {
		self.auth
			.as_ref()
			.is_some_and(|a| !a.nid_aut.is_blank() && !a.nid_ses.is_blank())
	}

	pub fn base_urls(&self) -> &BaseUrls {
		&self.base_urls
	}

	fn api_url(&self, path: &str) -> String {
		format!("{}{}", self.base_urls.api.trim_end_matches('/'), path)
	}

	fn game_url(&self, path: &str) -> String {
		format!("{}{}", self.base_urls.game.trim_end_matches('/'), path)
	}

	fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
		let req = self.http.request(method, url);
		match &self.auth {
			Some(auth) if self.has_auth() => req.header(reqwest::header::COOKIE, auth.cookie()),
			_ => req,
		}
	}

	/// Send and unwrap `content`. `Ok(None)` when the server answers without it.
	async fn send_for_content<T: DeserializeOwned>(
		&self,
		req: reqwest::RequestBuilder,
		label: &'static str,
	) -> anyhow::Result<Option<T>> {
		let resp = req.send().await.with_context(|| format!("chzzk {label} send"))?;
		let status = resp.status();
		if status == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(anyhow!("chzzk {label} failed: status={status} body={body}"));
		}

		let envelope: ContentEnvelope<T> = resp.json().await.with_context(|| format!("chzzk {label} decode"))?;
		if let Some(code) = envelope.code
			&& code != 200
		{
			return Err(anyhow!(
				"chzzk {label} failed: code={code} message={}",
				envelope.message.unwrap_or_default()
			));
		}
		Ok(envelope.content)
	}

	async fn get_content<T: DeserializeOwned>(&self, url: &str, label: &'static str) -> anyhow::Result<Option<T>> {
		self.send_for_content(self.request(reqwest::Method::GET, url), label).await
	}
}
