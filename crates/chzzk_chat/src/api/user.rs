#![forbid(unsafe_code)]

use chzzk_domain::UserIdHash;
use serde::Deserialize;

use super::ChzzkClient;

/// Logged-in user as reported by the game API.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStatus {
	pub has_profile: bool,
	pub logged_in: bool,
	pub nickname: Option<String>,
	pub profile_image_url: Option<String>,
	pub user_id_hash: Option<String>,
	pub verified_mark: bool,
	pub official_noti_agree: bool,
	pub official_noti_agree_update_date: Option<String>,
}

impl UserStatus {
	/// `None` for anonymous sessions, which report no hash.
	pub fn identity_hash(&self) -> Option<UserIdHash> {
		self.user_id_hash.as_deref().and_then(|h| UserIdHash::new(h).ok())
	}
}

impl ChzzkClient {
	pub async fn user_status(&self) -> anyhow::Result<Option<UserStatus>> {
		let url = self.game_url("/v1/user/getUserStatus");
		self.get_content(&url, "user status").await
	}
}
