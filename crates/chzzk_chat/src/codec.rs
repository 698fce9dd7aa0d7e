#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use chzzk_domain::{ChatChannelId, UserIdHash};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const SERVICE_ID: &str = "game";
pub const PROTOCOL_VERSION: &str = "2";
pub const DEVICE_TYPE: u32 = 2001;

/// Status value marking a message withheld by moderation.
pub const HIDDEN_STATUS: &str = "HIDDEN";

const CHAT_SHARD_COUNT: u32 = 9;

const TID_CONNECT: u32 = 1;
const TID_RECENT_CHAT: u32 = 2;
const TID_SEND_CHAT: u32 = 3;

/// Protocol command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatCmd {
	Ping,
	Pong,
	Connect,
	Connected,
	RequestRecentChat,
	RecentChat,
	Event,
	Chat,
	Donation,
	Notice,
	Blind,
	SendChat,
}

impl ChatCmd {
	pub const fn code(self) -> i64 {
		match self {
			Self::Ping => 0,
			Self::Pong => 10000,
			Self::Connect => 100,
			Self::Connected => 10100,
			Self::RequestRecentChat => 5101,
			Self::RecentChat => 15101,
			Self::Event => 93006,
			Self::Chat => 93101,
			Self::Donation => 93102,
			Self::Notice => 94010,
			Self::Blind => 94008,
			Self::SendChat => 3101,
		}
	}

	/// `None` for codes this client does not understand.
	pub fn from_code(code: i64) -> Option<Self> {
		Some(match code {
			0 => Self::Ping,
			10000 => Self::Pong,
			100 => Self::Connect,
			10100 => Self::Connected,
			5101 => Self::RequestRecentChat,
			15101 => Self::RecentChat,
			93006 => Self::Event,
			93101 => Self::Chat,
			93102 => Self::Donation,
			94010 => Self::Notice,
			94008 => Self::Blind,
			3101 => Self::SendChat,
			_ => return None,
		})
	}

	/// Commands whose body is a list of chat-like entries.
	pub fn carries_batch(self) -> bool {
		matches!(self, Self::RecentChat | Self::Event | Self::Chat | Self::Donation)
	}
}

/// Per-entry message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatType {
	Text,
	Image,
	Sticker,
	Video,
	Rich,
	Donation,
	Subscription,
	SystemMessage,
}

impl ChatType {
	pub const fn code(self) -> i64 {
		match self {
			Self::Text => 1,
			Self::Image => 2,
			Self::Sticker => 3,
			Self::Video => 4,
			Self::Rich => 5,
			Self::Donation => 10,
			Self::Subscription => 11,
			Self::SystemMessage => 30,
		}
	}

	pub fn from_code(code: i64) -> Option<Self> {
		Some(match code {
			1 => Self::Text,
			2 => Self::Image,
			3 => Self::Sticker,
			4 => Self::Video,
			5 => Self::Rich,
			10 => Self::Donation,
			11 => Self::Subscription,
			30 => Self::SystemMessage,
			_ => return None,
		})
	}
}

/// The wire unit exchanged in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bdy: Option<Value>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub retry: Option<bool>,

	pub cmd: i64,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sid: Option<String>,

	#[serde(
		default,
		deserialize_with = "de_lenient_u32",
		skip_serializing_if = "Option::is_none"
	)]
	pub tid: Option<u32>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cid: Option<String>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub svcid: Option<String>,

	#[serde(
		default,
		deserialize_with = "de_lenient_string",
		skip_serializing_if = "Option::is_none"
	)]
	pub ver: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthCapability {
	Send,
	Read,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectBody<'a> {
	acc_tkn: &'a str,
	auth: AuthCapability,
	dev_type: u32,
	uid: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecentChatBody {
	recent_message_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendChatBody<'a> {
	extras: String,
	msg: &'a str,
	msg_time: i64,
	msg_type_code: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendChatExtras<'a> {
	chat_type: &'static str,
	emojis: Value,
	os_type: &'static str,
	streaming_channel_id: &'a str,
}

impl Envelope {
	fn bare(cmd: ChatCmd) -> Self {
		Self {
			bdy: None,
			retry: None,
			cmd: cmd.code(),
			sid: None,
			tid: None,
			cid: None,
			svcid: None,
			ver: Some(PROTOCOL_VERSION.to_string()),
		}
	}

	fn for_room(cmd: ChatCmd, room: &ChatChannelId, tid: u32) -> Self {
		Self {
			tid: Some(tid),
			cid: Some(room.as_str().to_string()),
			svcid: Some(SERVICE_ID.to_string()),
			..Self::bare(cmd)
		}
	}

	/// Handshake frame. `SEND` capability iff a user identity is present.
	pub fn connect(room: &ChatChannelId, access_token: &str, uid: Option<&UserIdHash>) -> anyhow::Result<Self> {
		let auth = if uid.is_some() {
			AuthCapability::Send
		} else {
			AuthCapability::Read
		};
		let body = ConnectBody {
			acc_tkn: access_token,
			auth,
			dev_type: DEVICE_TYPE,
			uid: uid.map(UserIdHash::as_str),
		};
		let mut env = Self::for_room(ChatCmd::Connect, room, TID_CONNECT);
		env.bdy = Some(serde_json::to_value(body).context("encode connect body")?);
		Ok(env)
	}

	pub fn ping() -> Self {
		Self::bare(ChatCmd::Ping)
	}

	pub fn pong() -> Self {
		Self::bare(ChatCmd::Pong)
	}

	pub fn request_recent_chat(room: &ChatChannelId, sid: &str, count: u32) -> anyhow::Result<Self> {
		let mut env = Self::for_room(ChatCmd::RequestRecentChat, room, TID_RECENT_CHAT);
		env.sid = Some(sid.to_string());
		env.bdy = Some(
			serde_json::to_value(RecentChatBody {
				recent_message_count: count,
			})
			.context("encode recent chat body")?,
		);
		Ok(env)
	}

	/// Outbound `TEXT` message stamped with the caller-provided send time (ms).
	pub fn send_chat(
		room: &ChatChannelId,
		sid: &str,
		message: &str,
		emojis: &BTreeMap<String, String>,
		msg_time: i64,
	) -> anyhow::Result<Self> {
		let emojis = if emojis.is_empty() {
			Value::String(String::new())
		} else {
			serde_json::to_value(emojis).context("encode emojis")?
		};
		let extras = SendChatExtras {
			chat_type: "STREAMING",
			emojis,
			os_type: "PC",
			streaming_channel_id: room.as_str(),
		};
		let body = SendChatBody {
			extras: serde_json::to_string(&extras).context("encode send chat extras")?,
			msg: message,
			msg_time,
			msg_type_code: ChatType::Text.code(),
		};

		let mut env = Self::for_room(ChatCmd::SendChat, room, TID_SEND_CHAT);
		env.sid = Some(sid.to_string());
		env.retry = Some(false);
		env.bdy = Some(serde_json::to_value(body).context("encode send chat body")?);
		Ok(env)
	}

	pub fn encode(&self) -> anyhow::Result<String> {
		serde_json::to_string(self).context("encode envelope")
	}

	pub fn decode(raw: &str) -> anyhow::Result<Self> {
		serde_json::from_str(raw).context("decode envelope")
	}

	pub fn command(&self) -> Option<ChatCmd> {
		ChatCmd::from_code(self.cmd)
	}
}

/// Inbound frame reduced to what the session acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
	Ping,
	Pong,
	Connected {
		sid: String,
	},
	Batch {
		is_recent: bool,
		notice: Option<Value>,
		entries: Vec<Value>,
	},
	Notice(Value),
	Blind(Value),
}

/// Classify a decoded envelope. `Ok(None)` means the frame is not for us:
/// unknown codes and outbound-only commands echoed back.
pub fn classify(env: &Envelope) -> anyhow::Result<Option<Inbound>> {
	let Some(cmd) = env.command() else {
		return Ok(None);
	};

	let inbound = match cmd {
		ChatCmd::Ping => Inbound::Ping,
		ChatCmd::Pong => Inbound::Pong,
		ChatCmd::Connected => {
			let sid = env
				.bdy
				.as_ref()
				.and_then(|b| b.get("sid"))
				.and_then(Value::as_str)
				.filter(|s| !s.is_empty())
				.ok_or_else(|| anyhow!("CONNECTED frame without bdy.sid"))?;
			Inbound::Connected { sid: sid.to_string() }
		}
		ChatCmd::RecentChat | ChatCmd::Event | ChatCmd::Chat | ChatCmd::Donation => {
			let (entries, notice) = split_batch_body(env.bdy.as_ref())?;
			Inbound::Batch {
				is_recent: cmd == ChatCmd::RecentChat,
				notice,
				entries,
			}
		}
		ChatCmd::Notice => Inbound::Notice(env.bdy.clone().unwrap_or(Value::Object(Map::new()))),
		ChatCmd::Blind => Inbound::Blind(env.bdy.clone().unwrap_or(Value::Object(Map::new()))),
		ChatCmd::Connect | ChatCmd::RequestRecentChat | ChatCmd::SendChat => return Ok(None),
	};

	Ok(Some(inbound))
}

/// `bdy` is either the entry array itself or `{messageList, notice?}`.
fn split_batch_body(body: Option<&Value>) -> anyhow::Result<(Vec<Value>, Option<Value>)> {
	match body {
		None | Some(Value::Null) => Ok((Vec::new(), None)),
		Some(Value::Array(entries)) => Ok((entries.clone(), None)),
		Some(Value::Object(obj)) => {
			let entries = match obj.get("messageList") {
				None | Some(Value::Null) => Vec::new(),
				Some(Value::Array(list)) => list.clone(),
				Some(other) => return Err(anyhow!("messageList is not an array: {other}")),
			};
			let notice = obj.get("notice").filter(|n| !n.is_null()).cloned();
			Ok((entries, notice))
		}
		Some(other) => Err(anyhow!("unexpected batch body: {other}")),
	}
}

/// Candidate field names for one logical entry field, in priority order.
#[derive(Debug)]
pub struct FieldMap {
	pub message: &'static [&'static str],
	pub message_type: &'static [&'static str],
	pub status: &'static [&'static str],
	pub time: &'static [&'static str],
	pub member_count: &'static [&'static str],
	pub user_id: &'static [&'static str],
}

/// Live frames use the short names, backfill frames the long ones.
pub static FIELD_MAP_V2: FieldMap = FieldMap {
	message: &["msg", "content"],
	message_type: &["msgTypeCode", "messageTypeCode"],
	status: &["msgStatusType", "messageStatusType"],
	time: &["msgTime", "messageTime", "createTime"],
	member_count: &["mbrCnt", "memberCount"],
	user_id: &["uid", "userId"],
};

static FIELD_MAPS: &[(&str, &FieldMap)] = &[("2", &FIELD_MAP_V2)];

impl FieldMap {
	/// Unknown or missing versions fall back to the current protocol.
	pub fn for_version(ver: Option<&str>) -> &'static FieldMap {
		ver.and_then(|v| FIELD_MAPS.iter().find(|(known, _)| *known == v))
			.map(|(_, map)| *map)
			.unwrap_or(&FIELD_MAP_V2)
	}

	/// First candidate present with a non-null value.
	pub fn pick<'a>(entry: &'a Map<String, Value>, candidates: &[&str]) -> Option<&'a Value> {
		candidates
			.iter()
			.filter_map(|name| entry.get(*name))
			.find(|v| !v.is_null())
	}
}

/// Shard number (1-based) a room is served from.
pub fn shard_index(room: &ChatChannelId) -> u32 {
	let sum: u32 = room.as_str().chars().map(|c| c as u32).sum();
	sum % CHAT_SHARD_COUNT + 1
}

pub fn default_chat_ws_url(room: &ChatChannelId) -> String {
	format!("wss://kr-ss{}.chat.naver.com/chat", shard_index(room))
}

fn de_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Option::<Value>::deserialize(deserializer)? {
		Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
		Some(Value::String(s)) => s.trim().parse().ok(),
		_ => None,
	})
}

fn de_lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(match Option::<Value>::deserialize(deserializer)? {
		Some(Value::String(s)) => Some(s),
		Some(Value::Number(n)) => Some(n.to_string()),
		_ => None,
	})
}
