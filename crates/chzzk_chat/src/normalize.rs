#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::codec::{ChatType, FieldMap, HIDDEN_STATUS};
use crate::event::{
	Blind, ChatEvent, ChatExtras, ChatPayload, DonationExtras, Notice, NoticeExtras, Profile, SubscriptionExtras,
	SystemMessageExtras,
};

/// Decode a field the server double-encodes as a JSON string.
///
/// Missing, `null`, empty and `"null"` all read as absent. Already-decoded
/// objects pass through so backfill and live frames share one path.
pub fn parse_json_string_field(obj: &Map<String, Value>, field: &str) -> anyhow::Result<Option<Value>> {
	match obj.get(field) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(raw)) => {
			let raw = raw.trim();
			if raw.is_empty() {
				return Ok(None);
			}
			let value: Value = serde_json::from_str(raw).with_context(|| format!("decode {field}"))?;
			Ok((!value.is_null()).then_some(value))
		}
		Some(other) => Ok(Some(other.clone())),
	}
}

fn decode_as<T: DeserializeOwned>(value: Option<Value>, what: &str) -> anyhow::Result<Option<T>> {
	value
		.map(|v| serde_json::from_value(v).with_context(|| format!("decode {what}")))
		.transpose()
}

fn as_i64(value: &Value) -> Option<i64> {
	match value {
		Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

/// Parse `registerChatProfileJson`/`targetChatProfileJson` into structured
/// profiles. Only applies when both are present; the string fields are removed.
pub fn promote_system_profiles(extras: &mut Value) -> anyhow::Result<()> {
	let Some(params) = extras.get_mut("params").and_then(Value::as_object_mut) else {
		return Ok(());
	};
	if !(params.contains_key("registerChatProfileJson") && params.contains_key("targetChatProfileJson")) {
		return Ok(());
	}

	let register = parse_json_string_field(params, "registerChatProfileJson")?;
	let target = parse_json_string_field(params, "targetChatProfileJson")?;
	params.remove("registerChatProfileJson");
	params.remove("targetChatProfileJson");
	params.insert("registerChatProfile".to_string(), register.unwrap_or(Value::Null));
	params.insert("targetChatProfile".to_string(), target.unwrap_or(Value::Null));
	Ok(())
}

struct EntryFields {
	profile: Option<Profile>,
	extras: Option<Value>,
	message: String,
	hidden: bool,
	time: i64,
	member_count: Option<u64>,
	user_id: Option<String>,
}

impl EntryFields {
	fn read(obj: &Map<String, Value>, map: &FieldMap) -> anyhow::Result<Self> {
		let profile = decode_as(parse_json_string_field(obj, "profile")?, "profile")?;
		let extras = parse_json_string_field(obj, "extras")?;
		let message = FieldMap::pick(obj, map.message)
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_string();
		let hidden = FieldMap::pick(obj, map.status).and_then(Value::as_str) == Some(HIDDEN_STATUS);
		let time = FieldMap::pick(obj, map.time).and_then(as_i64).unwrap_or_default();
		let member_count = FieldMap::pick(obj, map.member_count)
			.and_then(as_i64)
			.and_then(|n| u64::try_from(n).ok());
		let user_id = FieldMap::pick(obj, map.user_id)
			.and_then(Value::as_str)
			.map(str::to_string);

		Ok(Self {
			profile,
			extras,
			message,
			hidden,
			time,
			member_count,
			user_id,
		})
	}

	fn into_payload<E: DeserializeOwned>(self, is_recent: bool, what: &str) -> anyhow::Result<ChatPayload<E>> {
		Ok(ChatPayload {
			profile: self.profile,
			extras: decode_as(self.extras, what)?,
			message: self.message,
			hidden: self.hidden,
			time: self.time,
			is_recent,
			member_count: self.member_count,
			user_id: self.user_id,
		})
	}
}

/// Normalize one batch entry. `Ok(None)` for message types this client does not know.
pub fn normalize_entry(entry: &Value, is_recent: bool, map: &FieldMap) -> anyhow::Result<Option<ChatEvent>> {
	let obj = entry.as_object().ok_or_else(|| anyhow!("batch entry is not an object"))?;

	let type_code = FieldMap::pick(obj, map.message_type)
		.and_then(as_i64)
		.unwrap_or(ChatType::Text.code());
	let Some(chat_type) = ChatType::from_code(type_code) else {
		debug!(type_code, "ignoring unknown message type");
		return Ok(None);
	};

	let mut fields = EntryFields::read(obj, map)?;

	let event = match chat_type {
		ChatType::Text | ChatType::Image | ChatType::Sticker | ChatType::Video | ChatType::Rich => {
			ChatEvent::Chat(fields.into_payload::<ChatExtras>(is_recent, "chat extras")?)
		}
		ChatType::Donation => ChatEvent::Donation(fields.into_payload::<DonationExtras>(is_recent, "donation extras")?),
		ChatType::Subscription => {
			ChatEvent::Subscription(fields.into_payload::<SubscriptionExtras>(is_recent, "subscription extras")?)
		}
		ChatType::SystemMessage => {
			if let Some(extras) = fields.extras.as_mut() {
				promote_system_profiles(extras)?;
			}
			ChatEvent::SystemMessage(fields.into_payload::<SystemMessageExtras>(is_recent, "system message extras")?)
		}
	};

	Ok(Some(event))
}

/// Normalize every entry in order. Entries that fail are logged and dropped.
pub fn normalize_batch(entries: &[Value], is_recent: bool, map: &FieldMap) -> Vec<ChatEvent> {
	let mut events = Vec::with_capacity(entries.len());
	for (index, entry) in entries.iter().enumerate() {
		match normalize_entry(entry, is_recent, map) {
			Ok(Some(event)) => events.push(event),
			Ok(None) => {
				metrics::counter!("chzzk_chat_frames_ignored_total").increment(1);
			}
			Err(err) => {
				metrics::counter!("chzzk_chat_frames_malformed_total").increment(1);
				warn!(index, error = ?err, "dropping malformed chat entry");
			}
		}
	}
	events
}

/// `Ok(None)` when the body is empty, which clears the pinned notice.
pub fn normalize_notice(body: &Value, is_recent: bool, map: &FieldMap) -> anyhow::Result<Option<Notice>> {
	let obj = match body {
		Value::Null => return Ok(None),
		Value::Object(obj) if obj.is_empty() => return Ok(None),
		Value::Object(obj) => obj,
		other => return Err(anyhow!("unexpected notice body: {other}")),
	};

	let mut fields = EntryFields::read(obj, map)?;
	if let Some(extras) = fields.extras.as_mut()
		&& let Some(raw) = extras.get("registerProfile").and_then(Value::as_str)
	{
		let decoded: Value = serde_json::from_str(raw).context("decode notice registerProfile")?;
		extras["registerProfile"] = decoded;
	}

	fields.into_payload::<NoticeExtras>(is_recent, "notice extras").map(Some)
}

pub fn normalize_blind(body: &Value) -> anyhow::Result<Blind> {
	serde_json::from_value(body.clone()).context("decode blind body")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::codec::FIELD_MAP_V2;
	use crate::event::UserRole;

	fn profile_json(hash: &str) -> String {
		json!({
			"userIdHash": hash,
			"nickname": format!("nick-{hash}"),
			"userRoleCode": "common_user",
			"verifiedMark": false,
			"activityBadges": [],
		})
		.to_string()
	}

	#[test]
	fn recent_backfill_entry_becomes_chat() {
		let entry = json!({
			"msg": "hi",
			"profile": profile_json("u1"),
			"msgTypeCode": 1,
			"createTime": 1000,
		});
		let Some(ChatEvent::Chat(chat)) = normalize_entry(&entry, true, &FIELD_MAP_V2).unwrap() else {
			panic!("expected chat");
		};
		assert_eq!(chat.message, "hi");
		assert!(chat.is_recent);
		assert_eq!(chat.time, 1000);
		assert!(chat.extras.is_none());
		assert!(chat.member_count.is_none());
		assert!(chat.user_id.is_none());
		assert_eq!(chat.profile.unwrap().user_id_hash, "u1");
	}

	#[test]
	fn live_and_backfill_field_names_agree() {
		let live = json!({
			"msg": "a", "msgTypeCode": 1, "msgTime": 5, "mbrCnt": 12, "msgStatusType": "HIDDEN", "uid": "u1",
			"profile": profile_json("u1"), "extras": "{\"osType\":\"PC\"}",
		});
		let backfill = json!({
			"content": "a", "messageTypeCode": 1, "messageTime": 5, "memberCount": 12,
			"messageStatusType": "HIDDEN", "userId": "u1", "profile": profile_json("u1"),
			"extras": "{\"osType\":\"PC\"}",
		});
		let a = normalize_entry(&live, false, &FIELD_MAP_V2).unwrap();
		let b = normalize_entry(&backfill, false, &FIELD_MAP_V2).unwrap();
		assert_eq!(a, b);
		let Some(ChatEvent::Chat(chat)) = a else {
			panic!("expected chat");
		};
		assert!(chat.hidden);
		assert_eq!(chat.member_count, Some(12));
		assert_eq!(chat.user_id.as_deref(), Some("u1"));
		assert_eq!(chat.extras.unwrap().os_type.as_deref(), Some("PC"));
	}

	#[test]
	fn system_message_promotes_profiles() {
		let extras = json!({
			"description": "{registerNickname} fixed {targetNickname}",
			"styleType": 1,
			"visibleRoles": ["streamer", "streaming_chat_manager"],
			"params": {
				"registerNickname": "mod",
				"targetNickname": "viewer",
				"registerChatProfileJson": profile_json("m1"),
				"targetChatProfileJson": profile_json("v1"),
			}
		});
		let entry = json!({
			"msg": "",
			"msgTypeCode": 30,
			"msgTime": 7,
			"profile": null,
			"extras": extras.to_string(),
		});

		let Some(ChatEvent::SystemMessage(msg)) = normalize_entry(&entry, false, &FIELD_MAP_V2).unwrap() else {
			panic!("expected system message");
		};
		assert!(msg.profile.is_none());
		let extras = msg.extras.unwrap();
		assert_eq!(extras.visible_roles, vec![UserRole::Streamer, UserRole::StreamingChatManager]);
		let params = extras.params.unwrap();
		assert_eq!(params.register_chat_profile.unwrap().user_id_hash, "m1");
		assert_eq!(params.target_chat_profile.unwrap().user_id_hash, "v1");
		assert!(!params.rest.contains_key("registerChatProfileJson"));
		assert!(!params.rest.contains_key("targetChatProfileJson"));
		assert_eq!(params.rest.get("registerNickname"), Some(&json!("mod")));
	}

	#[test]
	fn promotion_needs_both_profiles() {
		let mut extras = json!({"params": {"registerChatProfileJson": profile_json("m1")}});
		promote_system_profiles(&mut extras).unwrap();
		assert!(extras["params"].get("registerChatProfileJson").is_some());
		assert!(extras["params"].get("registerChatProfile").is_none());
	}

	#[test]
	fn batch_keeps_order_and_drops_bad_entries() {
		let entries = vec![
			json!({"msg": "one", "msgTypeCode": 1, "profile": profile_json("a")}),
			json!({"msg": "broken", "msgTypeCode": 1, "profile": "{not json"}),
			json!({"msg": "future", "msgTypeCode": 77}),
			json!({"msg": "two", "msgTypeCode": 10, "extras": "{\"payAmount\":1000,\"payType\":\"CURRENCY\"}"}),
		];
		let events = normalize_batch(&entries, false, &FIELD_MAP_V2);
		assert_eq!(events.len(), 2);
		assert!(matches!(&events[0], ChatEvent::Chat(c) if c.message == "one"));
		assert!(matches!(&events[1], ChatEvent::Donation(d) if d.extras.as_ref().unwrap().pay_amount == 1000));
	}

	#[test]
	fn subscription_entry() {
		let entry = json!({
			"msg": "3 months!",
			"msgTypeCode": 11,
			"profile": profile_json("s1"),
			"extras": "{\"month\":3,\"tierName\":\"Tier 1\",\"tierNo\":1}",
		});
		let Some(ChatEvent::Subscription(sub)) = normalize_entry(&entry, false, &FIELD_MAP_V2).unwrap() else {
			panic!("expected subscription");
		};
		let extras = sub.extras.unwrap();
		assert_eq!(extras.month, 3);
		assert_eq!(extras.tier_no, Some(1));
	}

	#[test]
	fn empty_notice_clears() {
		assert_eq!(normalize_notice(&json!({}), false, &FIELD_MAP_V2).unwrap(), None);
		assert_eq!(normalize_notice(&Value::Null, false, &FIELD_MAP_V2).unwrap(), None);

		let body = json!({
			"message": "ignored",
			"content": "pinned",
			"messageTime": 9,
			"extras": json!({"registerProfile": profile_json("m1")}).to_string(),
		});
		let notice = normalize_notice(&body, false, &FIELD_MAP_V2).unwrap().unwrap();
		assert_eq!(notice.message, "pinned");
		assert_eq!(notice.extras.unwrap().register_profile.unwrap().user_id_hash, "m1");
	}

	#[test]
	fn blind_body() {
		let blind = normalize_blind(&json!({
			"messageTime": 11,
			"blindType": "CBOTBLIND",
			"blindUserId": null,
			"userId": "u1",
			"channelId": "abc123",
		}))
		.unwrap();
		assert_eq!(blind.message_time, 11);
		assert_eq!(blind.blind_type.as_deref(), Some("CBOTBLIND"));
		assert_eq!(blind.user_id.as_deref(), Some("u1"));
	}
}
