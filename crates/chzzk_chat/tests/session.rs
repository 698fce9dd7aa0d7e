#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chzzk_chat::session::BoxFuture;
use chzzk_chat::{
	AccessGrant, ChannelId, ChatChannelId, ChatError, ChatEvent, ChatSession, ChatSessionConfig, ChatSocket,
	CredentialResolver, MetadataService, SecretString, SessionState, UserIdHash, WsConnector,
};
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

/// Server half of one in-memory chat socket.
struct FakeServer {
	url: Url,
	to_client: fmpsc::UnboundedSender<anyhow::Result<String>>,
	from_client: fmpsc::UnboundedReceiver<String>,
}

impl FakeServer {
	async fn recv_json(&mut self) -> Value {
		let frame = timeout(WAIT, self.from_client.next())
			.await
			.expect("timed out waiting for client frame")
			.expect("client closed the socket");
		serde_json::from_str(&frame).expect("client sent invalid json")
	}

	/// `true` when the client sends nothing for a short while.
	async fn stays_quiet(&mut self) -> bool {
		timeout(QUIET, self.from_client.next()).await.is_err()
	}

	async fn closed_by_client(&mut self) -> bool {
		matches!(timeout(WAIT, self.from_client.next()).await, Ok(None))
	}

	fn send(&self, frame: Value) {
		let _ = self.to_client.unbounded_send(Ok(frame.to_string()));
	}

	async fn accept_handshake(&mut self, sid: &str) -> Value {
		let connect = self.recv_json().await;
		assert_eq!(connect["cmd"], 100);
		self.send(json!({"cmd": 10100, "tid": 1, "ver": "2", "bdy": {"sid": sid}}));
		connect
	}
}

fn fake_connector() -> (WsConnector, mpsc::UnboundedReceiver<FakeServer>) {
	let (servers_tx, servers_rx) = mpsc::unbounded_channel();
	let connector: WsConnector = Arc::new(move |url: Url| {
		let servers_tx = servers_tx.clone();
		Box::pin(async move {
			let (to_client, client_rx) = fmpsc::unbounded();
			let (client_tx, from_client) = fmpsc::unbounded();
			servers_tx
				.send(FakeServer {
					url,
					to_client,
					from_client,
				})
				.map_err(|_| anyhow::anyhow!("test dropped the server receiver"))?;
			Ok(ChatSocket {
				sink: Box::pin(client_tx.sink_map_err(anyhow::Error::from)),
				stream: Box::pin(client_rx),
			})
		}) as BoxFuture<'static, anyhow::Result<ChatSocket>>
	});
	(connector, servers_rx)
}

struct FakeCredentials {
	identity: Option<UserIdHash>,
	fail: bool,
	calls: AtomicUsize,
}

impl FakeCredentials {
	fn new(identity: Option<&str>) -> Arc<Self> {
		Arc::new(Self {
			identity: identity.map(|h| UserIdHash::new(h).unwrap()),
			fail: false,
			calls: AtomicUsize::new(0),
		})
	}

	fn failing() -> Arc<Self> {
		Arc::new(Self {
			identity: None,
			fail: true,
			calls: AtomicUsize::new(0),
		})
	}
}

#[async_trait::async_trait]
impl CredentialResolver for FakeCredentials {
	async fn resolve_access(&self, room: &ChatChannelId) -> Result<AccessGrant, ChatError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if self.fail {
			return Err(ChatError::Credential("no content".to_string()));
		}
		Ok(AccessGrant {
			access_token: SecretString::new(format!("tok-{room}")),
			identity_hash: self.identity.clone(),
		})
	}
}

struct FakeMetadata {
	room: Mutex<Option<ChatChannelId>>,
}

impl FakeMetadata {
	fn new(room: Option<&str>) -> Arc<Self> {
		Arc::new(Self {
			room: Mutex::new(room.map(room_id)),
		})
	}

	fn set(&self, room: Option<&str>) {
		*self.room.lock() = room.map(room_id);
	}
}

#[async_trait::async_trait]
impl MetadataService for FakeMetadata {
	async fn chat_channel_id(&self, _channel: &ChannelId) -> Result<Option<ChatChannelId>, ChatError> {
		Ok(self.room.lock().clone())
	}
}

fn room_id(id: &str) -> ChatChannelId {
	ChatChannelId::new(id).unwrap()
}

fn broadcast() -> ChannelId {
	ChannelId::new("dec8d4e1c2b5bd0d4e4e4a4a2e4c1b3a").unwrap()
}

fn room_session(identity: Option<&str>) -> (ChatSession, mpsc::UnboundedReceiver<FakeServer>) {
	let (connector, servers) = fake_connector();
	let session = ChatSession::builder(ChatSessionConfig::for_room(room_id("abc123")))
		.credentials(FakeCredentials::new(identity))
		.connector(connector)
		.build()
		.unwrap();
	(session, servers)
}

async fn next_server(servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> FakeServer {
	timeout(WAIT, servers.recv())
		.await
		.expect("timed out waiting for a connection")
		.expect("connector dropped")
}

/// Run `connect()` against a fake server that answers the handshake.
async fn connect(session: &ChatSession, servers: &mut mpsc::UnboundedReceiver<FakeServer>) -> (FakeServer, Value) {
	let task = tokio::spawn({
		let session = session.clone();
		async move { session.connect().await }
	});
	let mut server = next_server(servers).await;
	let handshake = server.accept_handshake("sid-1").await;
	task.await.unwrap().unwrap();
	(server, handshake)
}

/// Next event that is not a raw envelope.
async fn next_event(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> ChatEvent {
	loop {
		let event = timeout(WAIT, events.recv())
			.await
			.expect("timed out waiting for event")
			.expect("event stream closed");
		if !matches!(event, ChatEvent::Raw(_)) {
			return event;
		}
	}
}

async fn no_more_events(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> bool {
	loop {
		match timeout(QUIET, events.recv()).await {
			Err(_) => return true,
			Ok(Some(ChatEvent::Raw(_))) => continue,
			Ok(_) => return false,
		}
	}
}

fn profile(hash: &str) -> String {
	json!({"userIdHash": hash, "nickname": hash, "userRoleCode": "common_user"}).to_string()
}

#[tokio::test]
async fn anonymous_handshake_is_read_only() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();

	let (server, handshake) = connect(&session, &mut servers).await;

	assert_eq!(server.url.as_str(), "wss://kr-ss4.chat.naver.com/chat");
	assert_eq!(handshake["cid"], "abc123");
	assert_eq!(handshake["tid"], 1);
	assert_eq!(handshake["svcid"], "game");
	assert_eq!(handshake["ver"], "2");
	assert_eq!(handshake["bdy"]["accTkn"], "tok-abc123");
	assert_eq!(handshake["bdy"]["auth"], "READ");
	assert_eq!(handshake["bdy"]["devType"], 2001);
	assert!(handshake["bdy"]["uid"].is_null());

	assert!(session.is_connected());
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(l) if l.room.as_str() == "abc123"));
}

#[tokio::test]
async fn authenticated_handshake_can_send() {
	let (session, mut servers) = room_session(Some("u1"));
	let (_server, handshake) = connect(&session, &mut servers).await;
	assert_eq!(handshake["bdy"]["auth"], "SEND");
	assert_eq!(handshake["bdy"]["uid"], "u1");
}

#[tokio::test]
async fn second_connect_is_rejected_without_handshake() {
	let (session, mut servers) = room_session(None);
	let (mut server, _) = connect(&session, &mut servers).await;

	assert_eq!(session.connect().await, Err(ChatError::AlreadyConnected));
	assert!(servers.try_recv().is_err());
	assert!(server.stays_quiet().await);
	assert!(session.is_connected());
}

#[tokio::test]
async fn server_ping_gets_exactly_one_pong() {
	let (session, mut servers) = room_session(None);
	let (mut server, _) = connect(&session, &mut servers).await;

	server.send(json!({"cmd": 0, "ver": "2"}));
	assert_eq!(server.recv_json().await, json!({"cmd": 10000, "ver": "2"}));
	assert!(server.stays_quiet().await);
}

#[tokio::test]
async fn idle_socket_sends_keepalive_ping() {
	let (connector, mut servers) = fake_connector();
	let config = ChatSessionConfig::for_room(room_id("abc123")).with_keepalive_interval(Duration::from_millis(50));
	let session = ChatSession::builder(config)
		.credentials(FakeCredentials::new(None))
		.connector(connector)
		.build()
		.unwrap();
	let (mut server, _) = connect(&session, &mut servers).await;

	assert_eq!(server.recv_json().await, json!({"cmd": 0, "ver": "2"}));
	// Answering with PONG does not rearm the idle timer, so another ping follows.
	server.send(json!({"cmd": 10000, "ver": "2"}));
	assert_eq!(server.recv_json().await["cmd"], 0);
}

#[tokio::test]
async fn steady_traffic_suppresses_keepalive_ping() {
	let (connector, mut servers) = fake_connector();
	let config = ChatSessionConfig::for_room(room_id("abc123")).with_keepalive_interval(Duration::from_millis(200));
	let session = ChatSession::builder(config)
		.credentials(FakeCredentials::new(None))
		.connector(connector)
		.build()
		.unwrap();
	let (mut server, _) = connect(&session, &mut servers).await;

	for i in 0..5 {
		server.send(json!({"cmd": 93101, "bdy": [{"msg": format!("m{i}"), "msgTypeCode": 1}]}));
		assert!(
			timeout(Duration::from_millis(100), server.from_client.next()).await.is_err(),
			"client pinged while chat was flowing"
		);
	}

	// Once the room goes idle the ping follows.
	assert_eq!(server.recv_json().await, json!({"cmd": 0, "ver": "2"}));
}

#[tokio::test]
async fn mixed_batch_keeps_entry_order() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	server.send(json!({
		"cmd": 93101,
		"ver": "2",
		"bdy": [
			{"msg": "hello", "msgTypeCode": 1, "msgTime": 10, "profile": profile("a")},
			{"msg": "take my money", "msgTypeCode": 10, "msgTime": 11, "profile": profile("b"),
			 "extras": "{\"payAmount\":1000,\"isAnonymous\":false}"}
		]
	}));

	match next_event(&mut events).await {
		ChatEvent::Chat(chat) => {
			assert_eq!(chat.message, "hello");
			assert!(!chat.is_recent);
		}
		other => panic!("expected chat, got {other:?}"),
	}
	match next_event(&mut events).await {
		ChatEvent::Donation(donation) => assert_eq!(donation.extras.unwrap().pay_amount, 1000),
		other => panic!("expected donation, got {other:?}"),
	}
	assert!(no_more_events(&mut events).await);
}

#[tokio::test]
async fn recent_chat_backfill_is_tagged() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (mut server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	session.request_recent_chat(50).unwrap();
	let request = server.recv_json().await;
	assert_eq!(request["cmd"], 5101);
	assert_eq!(request["tid"], 2);
	assert_eq!(request["sid"], "sid-1");
	assert_eq!(request["bdy"]["recentMessageCount"], 50);

	server.send(json!({
		"cmd": 15101,
		"bdy": {
			"notice": {"content": "pinned", "messageTime": 1},
			"messageList": [{"msg": "hi", "profile": profile("a"), "msgTypeCode": 1, "createTime": 1000}]
		}
	}));

	assert!(matches!(next_event(&mut events).await, ChatEvent::Notice(Some(n)) if n.message == "pinned"));
	match next_event(&mut events).await {
		ChatEvent::Chat(chat) => {
			assert_eq!(chat.message, "hi");
			assert!(chat.is_recent);
			assert_eq!(chat.time, 1000);
		}
		other => panic!("expected chat, got {other:?}"),
	}
}

#[tokio::test]
async fn notice_and_blind_commands_are_published() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	server.send(json!({
		"cmd": 94010,
		"bdy": {
			"content": "read the rules",
			"messageTime": 42,
			"extras": json!({"registerProfile": {"userIdHash": "m1", "nickname": "mod", "userRoleCode": "streaming_chat_manager"}}).to_string(),
		}
	}));
	match next_event(&mut events).await {
		ChatEvent::Notice(Some(notice)) => {
			assert_eq!(notice.message, "read the rules");
			assert_eq!(notice.time, 42);
			assert!(!notice.is_recent);
			let registrant = notice.extras.unwrap().register_profile.unwrap();
			assert_eq!(registrant.user_id_hash, "m1");
		}
		other => panic!("expected notice, got {other:?}"),
	}

	server.send(json!({"cmd": 94010, "bdy": {}}));
	assert_eq!(next_event(&mut events).await, ChatEvent::Notice(None));

	server.send(json!({
		"cmd": 94008,
		"bdy": {"messageTime": 7, "blindType": "CBOTBLIND", "blindUserId": "m1", "userId": "u1", "channelId": "abc123"}
	}));
	match next_event(&mut events).await {
		ChatEvent::Blind(blind) => {
			assert_eq!(blind.message_time, 7);
			assert_eq!(blind.blind_type.as_deref(), Some("CBOTBLIND"));
			assert_eq!(blind.user_id.as_deref(), Some("u1"));
		}
		other => panic!("expected blind, got {other:?}"),
	}
	assert!(no_more_events(&mut events).await);
}

#[tokio::test]
async fn send_chat_requires_identity() {
	let (session, mut servers) = room_session(None);
	let (mut server, _) = connect(&session, &mut servers).await;

	assert_eq!(session.send_chat("hi", &BTreeMap::new()), Err(ChatError::NotAuthenticated));
	assert!(server.stays_quiet().await);
}

#[tokio::test]
async fn send_chat_with_identity() {
	let (session, mut servers) = room_session(Some("u1"));
	let (mut server, _) = connect(&session, &mut servers).await;

	session.send_chat("hi there", &BTreeMap::new()).unwrap();
	let frame = server.recv_json().await;
	assert_eq!(frame["cmd"], 3101);
	assert_eq!(frame["tid"], 3);
	assert_eq!(frame["sid"], "sid-1");
	assert_eq!(frame["retry"], false);
	assert_eq!(frame["bdy"]["msg"], "hi there");
	assert_eq!(frame["bdy"]["msgTypeCode"], 1);
	assert!(frame["bdy"]["msgTime"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn outbound_calls_need_a_connection() {
	let (session, _servers) = room_session(Some("u1"));
	assert_eq!(session.request_recent_chat(10), Err(ChatError::NotConnected));
	assert_eq!(session.send_chat("hi", &BTreeMap::new()), Err(ChatError::NotConnected));
	assert_eq!(session.disconnect().await, Err(ChatError::NotConnected));
	assert_eq!(session.reconnect().await, Err(ChatError::NotConnected));
}

#[tokio::test]
async fn disconnect_then_disconnect_again() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (mut server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	session.disconnect().await.unwrap();
	assert_eq!(session.state(), SessionState::Disconnected);
	assert!(server.closed_by_client().await);
	assert!(matches!(next_event(&mut events).await, ChatEvent::Disconnect(l) if l.room.as_str() == "abc123"));

	assert_eq!(session.disconnect().await, Err(ChatError::NotConnected));
	assert!(no_more_events(&mut events).await);
	assert_eq!(session.chat_channel_id(), Some(room_id("abc123")));
}

#[tokio::test]
async fn server_close_ends_session() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	drop(server);
	assert!(matches!(next_event(&mut events).await, ChatEvent::Disconnect(_)));
	assert_eq!(session.state(), SessionState::Disconnected);

	// The session can be reused afterwards.
	let (_server, _) = connect(&session, &mut servers).await;
	assert!(session.is_connected());
}

#[tokio::test]
async fn disconnect_during_handshake_is_rejected() {
	let (session, mut servers) = room_session(None);
	let task = tokio::spawn({
		let session = session.clone();
		async move { session.connect().await }
	});
	let mut server = next_server(&mut servers).await;

	assert_eq!(session.state(), SessionState::Connecting);
	assert_eq!(session.disconnect().await, Err(ChatError::TransitionInProgress));
	assert_eq!(session.connect().await, Err(ChatError::AlreadyConnected));

	server.accept_handshake("sid-1").await;
	task.await.unwrap().unwrap();
	assert!(session.is_connected());
}

#[tokio::test]
async fn handshake_timeout_leaves_session_disconnected() {
	let (connector, mut servers) = fake_connector();
	let config = ChatSessionConfig::for_room(room_id("abc123")).with_handshake_timeout(Duration::from_millis(100));
	let session = ChatSession::builder(config)
		.credentials(FakeCredentials::new(None))
		.connector(connector)
		.build()
		.unwrap();

	let result = session.connect().await;
	assert_eq!(result, Err(ChatError::HandshakeTimeout(Duration::from_millis(100))));
	assert_eq!(session.state(), SessionState::Disconnected);
	assert_eq!(session.chat_channel_id(), None);

	let mut server = next_server(&mut servers).await;
	assert_eq!(server.recv_json().await["cmd"], 100);
	assert!(server.closed_by_client().await);
}

#[tokio::test]
async fn credential_failure_surfaces_from_connect() {
	let (connector, mut servers) = fake_connector();
	let credentials = FakeCredentials::failing();
	let session = ChatSession::builder(ChatSessionConfig::for_room(room_id("abc123")))
		.credentials(credentials.clone())
		.connector(connector)
		.build()
		.unwrap();

	assert!(matches!(session.connect().await, Err(ChatError::Credential(_))));
	assert_eq!(credentials.calls.load(Ordering::SeqCst), 1);
	assert_eq!(session.state(), SessionState::Disconnected);
	assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn supplied_token_skips_credential_service() {
	let (connector, mut servers) = fake_connector();
	let config = ChatSessionConfig::for_room(room_id("abc123"))
		.with_access_token(SecretString::new("given"), Some(UserIdHash::new("u9").unwrap()));
	let session = ChatSession::builder(config).connector(connector).build().unwrap();

	let (_server, handshake) = connect(&session, &mut servers).await;
	assert_eq!(handshake["bdy"]["accTkn"], "given");
	assert_eq!(handshake["bdy"]["auth"], "SEND");
}

#[tokio::test]
async fn broadcast_without_live_room_fails() {
	let (connector, mut servers) = fake_connector();
	let session = ChatSession::builder(ChatSessionConfig::for_broadcast(broadcast()))
		.credentials(FakeCredentials::new(None))
		.metadata(FakeMetadata::new(None))
		.connector(connector)
		.build()
		.unwrap();

	assert_eq!(session.connect().await, Err(ChatError::NoActiveRoom(broadcast())));
	assert_eq!(session.state(), SessionState::Disconnected);
	assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn poller_reconnects_when_room_changes() {
	let (connector, mut servers) = fake_connector();
	let metadata = FakeMetadata::new(Some("abc123"));
	let config = ChatSessionConfig::for_broadcast(broadcast()).with_poll_interval(Duration::from_millis(50));
	let session = ChatSession::builder(config)
		.credentials(FakeCredentials::new(None))
		.metadata(metadata.clone())
		.connector(connector)
		.build()
		.unwrap();
	let mut events = session.events();

	let (mut old_server, handshake) = connect(&session, &mut servers).await;
	assert_eq!(handshake["cid"], "abc123");
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	metadata.set(Some("xyz789"));
	let mut new_server = next_server(&mut servers).await;
	let handshake = new_server.accept_handshake("sid-2").await;
	assert_eq!(handshake["cid"], "xyz789");
	assert_eq!(handshake["bdy"]["accTkn"], "tok-xyz789");
	assert!(old_server.closed_by_client().await);

	assert!(matches!(next_event(&mut events).await, ChatEvent::Reconnect(l) if l.room.as_str() == "xyz789"));
	assert!(no_more_events(&mut events).await);
	assert_eq!(session.chat_channel_id(), Some(room_id("xyz789")));
	assert!(session.is_connected());
	assert!(servers.try_recv().is_err());
}

#[tokio::test]
async fn replaced_socket_frames_are_ignored() {
	let (session, mut servers) = room_session(None);
	let mut events = session.events();
	let (old_server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	let task = tokio::spawn({
		let session = session.clone();
		async move { session.reconnect().await }
	});
	let mut new_server = next_server(&mut servers).await;
	old_server.send(json!({"cmd": 93101, "bdy": [{"msg": "stale", "msgTypeCode": 1}]}));
	new_server.accept_handshake("sid-2").await;
	task.await.unwrap().unwrap();

	assert!(matches!(next_event(&mut events).await, ChatEvent::Reconnect(_)));
	new_server.send(json!({"cmd": 93101, "bdy": [{"msg": "fresh", "msgTypeCode": 1}]}));
	assert!(matches!(next_event(&mut events).await, ChatEvent::Chat(c) if c.message == "fresh"));

	drop(old_server);
	assert!(no_more_events(&mut events).await);
	assert!(session.is_connected());
}

#[tokio::test]
async fn failed_reconnect_disconnects() {
	let (connector, mut servers) = fake_connector();
	let metadata = FakeMetadata::new(Some("abc123"));
	let session = ChatSession::builder(ChatSessionConfig::for_broadcast(broadcast()))
		.credentials(FakeCredentials::new(None))
		.metadata(metadata.clone())
		.connector(connector)
		.build()
		.unwrap();
	let mut events = session.events();
	let (_server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	metadata.set(None);
	assert_eq!(session.reconnect().await, Err(ChatError::NoActiveRoom(broadcast())));
	assert_eq!(session.state(), SessionState::Disconnected);
	assert!(matches!(next_event(&mut events).await, ChatEvent::Disconnect(l) if l.room.as_str() == "abc123"));
}

#[tokio::test]
async fn reconnect_timeout_keeps_the_joined_room() {
	let (connector, mut servers) = fake_connector();
	let metadata = FakeMetadata::new(Some("abc123"));
	let config = ChatSessionConfig::for_broadcast(broadcast()).with_handshake_timeout(Duration::from_millis(100));
	let session = ChatSession::builder(config)
		.credentials(FakeCredentials::new(None))
		.metadata(metadata.clone())
		.connector(connector)
		.build()
		.unwrap();
	let mut events = session.events();
	let (_server, _) = connect(&session, &mut servers).await;
	assert!(matches!(next_event(&mut events).await, ChatEvent::Connect(_)));

	metadata.set(Some("xyz789"));
	let task = tokio::spawn({
		let session = session.clone();
		async move { session.reconnect().await }
	});
	let mut new_server = next_server(&mut servers).await;
	assert_eq!(new_server.recv_json().await["cid"], "xyz789");
	assert_eq!(session.chat_channel_id(), Some(room_id("abc123")));

	assert_eq!(
		task.await.unwrap(),
		Err(ChatError::HandshakeTimeout(Duration::from_millis(100)))
	);
	assert_eq!(session.state(), SessionState::Disconnected);
	assert!(matches!(next_event(&mut events).await, ChatEvent::Disconnect(l) if l.room.as_str() == "abc123"));
	assert_eq!(session.chat_channel_id(), Some(room_id("abc123")));
	assert!(new_server.closed_by_client().await);
}

#[tokio::test]
async fn typed_handlers_and_unknown_codes() {
	let (session, mut servers) = room_session(None);
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let id = session.on::<chzzk_chat::topic::Chat, _>(move |chat| sink.lock().push(chat.message.clone()));
	let raw = Arc::new(AtomicUsize::new(0));
	let raw_count = Arc::clone(&raw);
	session.on::<chzzk_chat::topic::Raw, _>(move |_| {
		raw_count.fetch_add(1, Ordering::SeqCst);
	});

	let (server, _) = connect(&session, &mut servers).await;
	let mut events = session.events();
	server.send(json!({"cmd": 94005, "bdy": {"whatever": true}}));
	server.send(json!("not an envelope"));
	server.send(json!({"cmd": 93101, "bdy": [{"msg": "one", "msgTypeCode": 1}]}));
	assert!(matches!(next_event(&mut events).await, ChatEvent::Chat(_)));

	assert!(session.off(id));
	server.send(json!({"cmd": 93101, "bdy": [{"msg": "two", "msgTypeCode": 1}]}));
	assert!(matches!(next_event(&mut events).await, ChatEvent::Chat(_)));

	assert_eq!(*seen.lock(), vec!["one".to_string()]);
	// CONNECTED, the unknown code and both chat frames; the malformed frame never decodes.
	assert_eq!(raw.load(Ordering::SeqCst), 4);
	assert!(session.is_connected());
}

#[test]
fn invalid_configs_are_rejected() {
	let config = ChatSessionConfig::for_room(room_id("abc123")).with_poll_interval(Duration::from_secs(1));
	assert!(matches!(
		ChatSession::builder(config).credentials(FakeCredentials::new(None)).build(),
		Err(ChatError::InvalidConfig(_))
	));

	let config = ChatSessionConfig::for_broadcast(broadcast());
	assert!(matches!(
		ChatSession::builder(config).credentials(FakeCredentials::new(None)).build(),
		Err(ChatError::InvalidConfig(_))
	));

	let config = ChatSessionConfig::for_room(room_id("abc123"));
	assert!(matches!(ChatSession::builder(config).build(), Err(ChatError::InvalidConfig(_))));
}
