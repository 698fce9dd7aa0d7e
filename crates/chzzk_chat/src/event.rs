#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use chzzk_domain::ChatChannelId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::codec::Envelope;

/// Treats an explicit `null` the same as a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: Default + Deserialize<'de>,
{
	Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum UserRole {
	#[default]
	CommonUser,
	StreamingChatManager,
	StreamingChannelManager,
	Streamer,
	Manager,
	Other(String),
}

impl UserRole {
	pub fn from_code(code: &str) -> Self {
		match code {
			"common_user" => Self::CommonUser,
			"streaming_chat_manager" => Self::StreamingChatManager,
			"streaming_channel_manager" => Self::StreamingChannelManager,
			"streamer" => Self::Streamer,
			"manager" => Self::Manager,
			other => Self::Other(other.to_string()),
		}
	}

	pub fn code(&self) -> &str {
		match self {
			Self::CommonUser => "common_user",
			Self::StreamingChatManager => "streaming_chat_manager",
			Self::StreamingChannelManager => "streaming_channel_manager",
			Self::Streamer => "streamer",
			Self::Manager => "manager",
			Self::Other(code) => code,
		}
	}

	/// Position in the capability order. Streamer and platform manager share the top.
	pub fn capability(&self) -> u8 {
		match self {
			Self::CommonUser | Self::Other(_) => 0,
			Self::StreamingChatManager => 1,
			Self::StreamingChannelManager => 2,
			Self::Streamer | Self::Manager => 3,
		}
	}

	pub fn is_moderator(&self) -> bool {
		self.capability() > 0
	}

	pub fn display_name(&self) -> &'static str {
		match self {
			Self::Streamer => "스트리머",
			Self::StreamingChatManager => "채팅 운영자",
			Self::StreamingChannelManager => "채널 관리자",
			Self::Manager => "운영자",
			Self::CommonUser => "일반 사용자",
			Self::Other(_) => "알 수 없음",
		}
	}
}

impl fmt::Display for UserRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.code())
	}
}

impl Serialize for UserRole {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.code())
	}
}

impl<'de> Deserialize<'de> for UserRole {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		Ok(Option::<String>::deserialize(deserializer)?
			.map(|code| Self::from_code(&code))
			.unwrap_or_default())
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityBadge {
	pub badge_no: i64,
	pub badge_id: String,
	pub image_url: Option<String>,
	pub title: Option<String>,
	pub description: Option<String>,
	#[serde(deserialize_with = "null_as_default")]
	pub activated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionProperty {
	#[serde(deserialize_with = "null_as_default")]
	pub accumulative_month: u32,
	#[serde(deserialize_with = "null_as_default")]
	pub tier: u32,
	pub badge: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FollowingProperty {
	pub follow_date: Option<String>,
}

/// Per-channel decorations attached to a chatter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingProperty {
	pub nickname_color: Option<Value>,
	pub real_time_donation_ranking: Option<Value>,
	pub subscription: Option<SubscriptionProperty>,
	pub following: Option<FollowingProperty>,
	#[serde(flatten)]
	pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
	#[serde(deserialize_with = "null_as_default")]
	pub user_id_hash: String,
	#[serde(deserialize_with = "null_as_default")]
	pub nickname: String,
	pub profile_image_url: Option<String>,
	#[serde(rename = "userRoleCode")]
	pub user_role: UserRole,
	pub badge: Option<Value>,
	pub title: Option<Value>,
	#[serde(deserialize_with = "null_as_default")]
	pub verified_mark: bool,
	#[serde(deserialize_with = "null_as_default")]
	pub activity_badges: Vec<ActivityBadge>,
	#[serde(deserialize_with = "null_as_default")]
	pub streaming_property: StreamingProperty,
}

impl Profile {
	pub fn is_moderator(&self) -> bool {
		self.user_role.is_moderator()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatExtras {
	pub chat_type: Option<String>,
	pub emojis: Option<Value>,
	pub os_type: Option<String>,
	pub streaming_channel_id: Option<String>,
	pub extra_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DonationType {
	Chat,
	Video,
	Mission,
	Other(String),
}

impl DonationType {
	pub fn from_code(code: &str) -> Self {
		match code {
			"CHAT" => Self::Chat,
			"VIDEO" => Self::Video,
			"MISSION" => Self::Mission,
			other => Self::Other(other.to_string()),
		}
	}

	pub fn code(&self) -> &str {
		match self {
			Self::Chat => "CHAT",
			Self::Video => "VIDEO",
			Self::Mission => "MISSION",
			Self::Other(code) => code,
		}
	}

	pub fn display_name(&self) -> &'static str {
		match self {
			Self::Chat => "채팅 후원",
			Self::Video => "영상 후원",
			Self::Mission => "미션 후원",
			Self::Other(_) => "알 수 없음",
		}
	}
}

impl Serialize for DonationType {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.code())
	}
}

impl<'de> Deserialize<'de> for DonationType {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let code = String::deserialize(deserializer)?;
		Ok(Self::from_code(&code))
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonationRank {
	pub user_id_hash: Option<String>,
	pub nick_name: Option<String>,
	#[serde(deserialize_with = "null_as_default")]
	pub verified_mark: bool,
	#[serde(deserialize_with = "null_as_default")]
	pub donation_amount: u64,
	#[serde(deserialize_with = "null_as_default")]
	pub ranking: u32,
}

/// The donor's own weekly rank, sent either in full or as the bare position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeeklyRank {
	Ranking(u32),
	Rank(DonationRank),
}

impl WeeklyRank {
	pub fn ranking(&self) -> u32 {
		match self {
			Self::Ranking(r) => *r,
			Self::Rank(rank) => rank.ranking,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonationExtras {
	#[serde(deserialize_with = "null_as_default")]
	pub is_anonymous: bool,
	pub pay_type: Option<String>,
	#[serde(deserialize_with = "null_as_default")]
	pub pay_amount: u64,
	pub donation_type: Option<DonationType>,
	#[serde(deserialize_with = "null_as_default")]
	pub weekly_rank_list: Vec<DonationRank>,
	pub donation_user_weekly_rank: Option<WeeklyRank>,
	pub chat_type: Option<String>,
	pub emojis: Option<Value>,
	pub os_type: Option<String>,
	pub streaming_channel_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionExtras {
	#[serde(deserialize_with = "null_as_default")]
	pub month: u32,
	pub tier_name: Option<String>,
	pub tier_no: Option<u32>,
	pub nickname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMessageParams {
	pub register_chat_profile: Option<Profile>,
	pub target_chat_profile: Option<Profile>,
	#[serde(flatten)]
	pub rest: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SystemMessageExtras {
	pub description: Option<String>,
	pub style_type: Option<i64>,
	#[serde(deserialize_with = "null_as_default")]
	pub visible_roles: Vec<UserRole>,
	pub params: Option<SystemMessageParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NoticeExtras {
	pub register_profile: Option<Profile>,
}

/// Common shape of every content-bearing event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload<E> {
	/// `None` for system-originated messages.
	pub profile: Option<Profile>,
	pub extras: Option<E>,
	pub message: String,
	pub hidden: bool,
	/// Milliseconds since the Unix epoch.
	pub time: i64,
	pub is_recent: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub member_count: Option<u64>,
	/// Sender's user id hash as the frame carries it (`uid` live, `userId` in backfill).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
}

impl<E> ChatPayload<E> {
	pub fn sent_at(&self) -> Option<DateTime<Utc>> {
		DateTime::from_timestamp_millis(self.time)
	}
}

pub type ChatMessage = ChatPayload<ChatExtras>;
pub type Donation = ChatPayload<DonationExtras>;
pub type Subscription = ChatPayload<SubscriptionExtras>;
pub type SystemMessage = ChatPayload<SystemMessageExtras>;
pub type Notice = ChatPayload<NoticeExtras>;

/// A message removed by moderation after delivery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Blind {
	#[serde(deserialize_with = "null_as_default")]
	pub message_time: i64,
	pub blind_type: Option<String>,
	pub blind_user_id: Option<String>,
	pub service_id: Option<String>,
	pub message: Option<String>,
	pub user_id: Option<String>,
	pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lifecycle {
	pub room: ChatChannelId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
	Chat(ChatMessage),
	Donation(Donation),
	Subscription(Subscription),
	SystemMessage(SystemMessage),
	/// `None` means the pinned notice was cleared.
	Notice(Option<Notice>),
	Blind(Blind),
	Connect(Lifecycle),
	Reconnect(Lifecycle),
	Disconnect(Lifecycle),
	Raw(Envelope),
}

impl ChatEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			Self::Chat(_) => EventKind::Chat,
			Self::Donation(_) => EventKind::Donation,
			Self::Subscription(_) => EventKind::Subscription,
			Self::SystemMessage(_) => EventKind::SystemMessage,
			Self::Notice(_) => EventKind::Notice,
			Self::Blind(_) => EventKind::Blind,
			Self::Connect(_) => EventKind::Connect,
			Self::Reconnect(_) => EventKind::Reconnect,
			Self::Disconnect(_) => EventKind::Disconnect,
			Self::Raw(_) => EventKind::Raw,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
	Chat,
	Donation,
	Subscription,
	SystemMessage,
	Notice,
	Blind,
	Connect,
	Reconnect,
	Disconnect,
	Raw,
}

impl EventKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Chat => "chat",
			Self::Donation => "donation",
			Self::Subscription => "subscription",
			Self::SystemMessage => "systemMessage",
			Self::Notice => "notice",
			Self::Blind => "blind",
			Self::Connect => "connect",
			Self::Reconnect => "reconnect",
			Self::Disconnect => "disconnect",
			Self::Raw => "raw",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Compile-time event names for [`crate::EventBus::on`].
pub mod topic {
	use super::{ChatEvent, EventKind};

	pub trait Topic: 'static {
		type Payload: 'static;
		const KIND: EventKind;

		fn payload(event: &ChatEvent) -> Option<&Self::Payload>;
	}

	macro_rules! topics {
		($($name:ident => $variant:ident($payload:ty)),* $(,)?) => {
			$(
				#[derive(Debug, Clone, Copy)]
				pub struct $name;

				impl Topic for $name {
					type Payload = $payload;
					const KIND: EventKind = EventKind::$variant;

					fn payload(event: &ChatEvent) -> Option<&Self::Payload> {
						match event {
							ChatEvent::$variant(p) => Some(p),
							_ => None,
						}
					}
				}
			)*
		};
	}

	topics! {
		Chat => Chat(super::ChatMessage),
		Donation => Donation(super::Donation),
		Subscription => Subscription(super::Subscription),
		SystemMessage => SystemMessage(super::SystemMessage),
		Notice => Notice(Option<super::Notice>),
		Blind => Blind(super::Blind),
		Connect => Connect(super::Lifecycle),
		Reconnect => Reconnect(super::Lifecycle),
		Disconnect => Disconnect(super::Lifecycle),
		Raw => Raw(crate::codec::Envelope),
	}
}
