#![forbid(unsafe_code)]

//! Chat session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!       ^                           |              |
//!       +---------------------------+--------------+
//! ```
//!
//! Each socket runs in its own task (see [`connection`]) and reports back
//! through [`Shared`] tagged with the generation it was spawned with.

mod config;
mod connection;
mod poller;
mod socket;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chzzk_domain::{ChannelId, ChatChannelId, UserIdHash};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

pub use config::{
	BaseUrls, ChatSessionConfig, ChatTarget, DEFAULT_API_BASE_URL, DEFAULT_GAME_BASE_URL, DEFAULT_HANDSHAKE_TIMEOUT,
	DEFAULT_KEEPALIVE_INTERVAL,
};
pub use socket::{BoxFuture, ChatSocket, FrameSink, FrameStream, WsConnector, tungstenite_connector};

use self::connection::{FrameOutcome, run_connection};
use self::poller::run_room_poller;
use crate::SecretString;
use crate::api::ChzzkClient;
use crate::bus::{EventBus, HandlerId};
use crate::codec::{Envelope, FieldMap, Inbound, classify};
use crate::credentials::{AccessGrant, CredentialResolver};
use crate::error::ChatError;
use crate::event::{ChatEvent, Lifecycle, topic::Topic};
use crate::metadata::MetadataService;
use crate::normalize::{normalize_batch, normalize_blind, normalize_notice};

/// How long teardown waits for a socket task to close before aborting it.
const SOCKET_CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
	Disconnected,
	Connecting,
	Connected,
	Reconnecting,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Disconnected => "disconnected",
			Self::Connecting => "connecting",
			Self::Connected => "connected",
			Self::Reconnecting => "reconnecting",
		})
	}
}

struct Inner {
	state: SessionState,
	/// Room of the last completed handshake.
	room: Option<ChatChannelId>,
	/// Room a handshake is in flight for; promoted to `room` on `CONNECTED`.
	pending_room: Option<ChatChannelId>,
	generation: u64,
	sid: Option<String>,
	grant: Option<AccessGrant>,
	outbound: Option<mpsc::UnboundedSender<String>>,
	handshake: Option<oneshot::Sender<Result<(), ChatError>>>,
	connection: Option<JoinHandle<()>>,
	poller: Option<JoinHandle<()>>,
}

impl Inner {
	fn new() -> Self {
		Self {
			state: SessionState::Disconnected,
			room: None,
			pending_room: None,
			generation: 0,
			sid: None,
			grant: None,
			outbound: None,
			handshake: None,
			connection: None,
			poller: None,
		}
	}

	/// Invalidate the current socket and hand back everything it owned.
	fn release(&mut self, forget_credentials: bool, stop_poller: bool) -> Released {
		self.generation += 1;
		self.sid = None;
		self.pending_room = None;
		if forget_credentials {
			self.grant = None;
		}
		Released {
			outbound: self.outbound.take(),
			handshake: self.handshake.take(),
			connection: self.connection.take(),
			poller: if stop_poller { self.poller.take() } else { None },
		}
	}

	fn ensure_connected(&self) -> Result<(&ChatChannelId, &str, &mpsc::UnboundedSender<String>), ChatError> {
		match (self.state, &self.room, &self.sid, &self.outbound) {
			(SessionState::Connected, Some(room), Some(sid), Some(outbound)) => Ok((room, sid, outbound)),
			_ => Err(ChatError::NotConnected),
		}
	}
}

/// Resources detached from the session during teardown.
struct Released {
	outbound: Option<mpsc::UnboundedSender<String>>,
	handshake: Option<oneshot::Sender<Result<(), ChatError>>>,
	connection: Option<JoinHandle<()>>,
	poller: Option<JoinHandle<()>>,
}

impl Released {
	/// Close without waiting. Used from inside the socket task itself.
	fn detach(self) {
		if let Some(poller) = self.poller {
			poller.abort();
		}
	}

	/// Close the socket and wait for its task, aborting it after a grace period.
	async fn finish(self) {
		let Released {
			outbound,
			handshake,
			connection,
			poller,
		} = self;
		drop(outbound);
		drop(handshake);
		if let Some(poller) = poller {
			poller.abort();
		}
		if let Some(mut connection) = connection
			&& tokio::time::timeout(SOCKET_CLOSE_GRACE, &mut connection).await.is_err()
		{
			connection.abort();
		}
	}
}

pub(crate) struct Shared {
	config: ChatSessionConfig,
	credentials: Option<Arc<dyn CredentialResolver>>,
	metadata: Option<Arc<dyn MetadataService>>,
	connector: WsConnector,
	bus: EventBus,
	inner: Mutex<Inner>,
}

impl Shared {
	fn broadcast_channel(&self) -> Option<&ChannelId> {
		match &self.config.target {
			ChatTarget::Broadcast(channel) => Some(channel),
			ChatTarget::Room(_) => None,
		}
	}

	fn is_current(&self, generation: u64) -> bool {
		self.inner.lock().generation == generation
	}

	fn publish_all(&self, events: impl IntoIterator<Item = ChatEvent>) {
		for event in events {
			self.bus.publish(event);
		}
	}

	pub(super) fn handle_frame(self: &Arc<Self>, generation: u64, text: &str) -> FrameOutcome {
		metrics::counter!("chzzk_chat_frames_total").increment(1);

		let env = match Envelope::decode(text) {
			Ok(env) => env,
			Err(err) => {
				metrics::counter!("chzzk_chat_frames_malformed_total").increment(1);
				warn!(generation, error = ?err, "dropping malformed chat frame");
				return FrameOutcome::default();
			}
		};

		if !self.is_current(generation) {
			debug!(generation, cmd = env.cmd, "ignoring frame from replaced socket");
			return FrameOutcome::default();
		}

		let inbound = classify(&env);
		let map = FieldMap::for_version(env.ver.as_deref());
		self.bus.publish(ChatEvent::Raw(env));

		let inbound = match inbound {
			Ok(Some(inbound)) => inbound,
			Ok(None) => {
				metrics::counter!("chzzk_chat_frames_ignored_total").increment(1);
				return FrameOutcome::default();
			}
			Err(err) => {
				metrics::counter!("chzzk_chat_frames_malformed_total").increment(1);
				warn!(generation, error = ?err, "dropping malformed chat frame");
				return FrameOutcome::default();
			}
		};

		match inbound {
			Inbound::Ping => {
				return FrameOutcome {
					reply: Envelope::pong().encode().ok(),
					is_pong: false,
				};
			}
			Inbound::Pong => {
				return FrameOutcome {
					reply: None,
					is_pong: true,
				};
			}
			Inbound::Connected { sid } => self.on_connected(generation, sid),
			Inbound::Batch {
				is_recent,
				notice,
				entries,
			} => {
				if let Some(notice) = notice {
					match normalize_notice(&notice, is_recent, map) {
						Ok(notice) => self.bus.publish(ChatEvent::Notice(notice)),
						Err(err) => warn!(generation, error = ?err, "dropping malformed notice"),
					}
				}
				self.publish_all(normalize_batch(&entries, is_recent, map));
			}
			Inbound::Notice(body) => match normalize_notice(&body, false, map) {
				Ok(notice) => self.bus.publish(ChatEvent::Notice(notice)),
				Err(err) => warn!(generation, error = ?err, "dropping malformed notice"),
			},
			Inbound::Blind(body) => match normalize_blind(&body) {
				Ok(blind) => self.bus.publish(ChatEvent::Blind(blind)),
				Err(err) => warn!(generation, error = ?err, "dropping malformed blind"),
			},
		}

		FrameOutcome::default()
	}

	fn on_connected(self: &Arc<Self>, generation: u64, sid: String) {
		let (event, handshake) = {
			let mut inner = self.inner.lock();
			if inner.generation != generation {
				return;
			}
			let was_reconnect = match inner.state {
				SessionState::Connecting => false,
				SessionState::Reconnecting => true,
				SessionState::Connected | SessionState::Disconnected => {
					debug!(generation, state = %inner.state, "unexpected CONNECTED frame");
					return;
				}
			};
			let Some(room) = inner.pending_room.take() else {
				return;
			};

			inner.state = SessionState::Connected;
			inner.room = Some(room.clone());
			inner.sid = Some(sid);

			if !was_reconnect
				&& inner.poller.is_none()
				&& let Some(period) = self.config.poll_interval
				&& self.broadcast_channel().is_some()
			{
				inner.poller = Some(tokio::spawn(run_room_poller(Arc::downgrade(self), period)));
			}

			info!(room = %room, generation, reconnect = was_reconnect, "chat session connected");
			let lifecycle = Lifecycle { room };
			let event = if was_reconnect {
				ChatEvent::Reconnect(lifecycle)
			} else {
				ChatEvent::Connect(lifecycle)
			};
			(event, inner.handshake.take())
		};

		self.bus.publish(event);
		if let Some(handshake) = handshake {
			let _ = handshake.send(Ok(()));
		}
	}

	pub(super) fn on_socket_closed(&self, generation: u64, reason: &str) {
		let mut inner = self.inner.lock();
		if inner.generation != generation {
			return;
		}

		match inner.state {
			SessionState::Connected => {
				let room = inner.room.clone();
				inner.state = SessionState::Disconnected;
				let released = inner.release(self.config.owns_credentials(), true);
				drop(inner);
				released.detach();

				info!(generation, %reason, "chat session closed by transport");
				if let Some(room) = room {
					self.bus.publish(ChatEvent::Disconnect(Lifecycle { room }));
				}
			}
			SessionState::Connecting | SessionState::Reconnecting => {
				if let Some(handshake) = inner.handshake.take() {
					let _ = handshake.send(Err(ChatError::Transport(format!("socket closed during handshake: {reason}"))));
				}
			}
			SessionState::Disconnected => {}
		}
	}

	async fn resolve_room(&self, hint: Option<ChatChannelId>) -> Result<ChatChannelId, ChatError> {
		match &self.config.target {
			ChatTarget::Room(room) => Ok(room.clone()),
			ChatTarget::Broadcast(channel) => {
				if let Some(room) = hint {
					return Ok(room);
				}
				let metadata = self
					.metadata
					.as_ref()
					.ok_or_else(|| ChatError::InvalidConfig("broadcast target needs a metadata service".to_string()))?;
				metadata
					.chat_channel_id(channel)
					.await?
					.ok_or_else(|| ChatError::NoActiveRoom(channel.clone()))
			}
		}
	}

	async fn resolve_grant(&self, room: &ChatChannelId) -> Result<AccessGrant, ChatError> {
		if let Some(token) = &self.config.access_token {
			return Ok(AccessGrant {
				access_token: token.clone(),
				identity_hash: self.config.identity_hash.clone(),
			});
		}
		let credentials = self
			.credentials
			.as_ref()
			.ok_or_else(|| ChatError::InvalidConfig("no access token and no credential resolver".to_string()))?;
		credentials.resolve_access(room).await
	}

	/// Resolve, open and handshake a new socket. The caller has already moved
	/// the state to `Connecting` or `Reconnecting`.
	async fn establish(self: &Arc<Self>, room_hint: Option<ChatChannelId>) -> Result<ChatChannelId, ChatError> {
		let room = self.resolve_room(room_hint).await?;
		let grant = self.resolve_grant(&room).await?;

		let url = self.config.chat_ws_url(&room);
		let url = Url::parse(&url).map_err(|err| ChatError::InvalidConfig(format!("chat ws url {url}: {err}")))?;
		debug!(room = %room, %url, "opening chat socket");
		let socket = (self.connector)(url)
			.await
			.map_err(|err| ChatError::Transport(format!("{err:#}")))?;

		let connect = Envelope::connect(&room, grant.access_token.expose(), grant.identity_hash.as_ref())
			.and_then(|env| env.encode())
			.map_err(|err| ChatError::Transport(format!("{err:#}")))?;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (handshake_tx, handshake_rx) = oneshot::channel();
		let _ = outbound_tx.send(connect);

		{
			let mut inner = self.inner.lock();
			inner.generation += 1;
			let generation = inner.generation;
			inner.pending_room = Some(room.clone());
			inner.grant = Some(grant);
			inner.outbound = Some(outbound_tx);
			inner.handshake = Some(handshake_tx);
			inner.connection = Some(tokio::spawn(run_connection(
				Arc::downgrade(self),
				generation,
				socket,
				outbound_rx,
				self.config.keepalive_interval,
			)));
		}

		let timeout = self.config.handshake_timeout;
		match tokio::time::timeout(timeout, handshake_rx).await {
			Ok(Ok(result)) => result.map(|()| room),
			Ok(Err(_)) => Err(ChatError::Transport("socket task ended during handshake".to_string())),
			Err(_) => Err(ChatError::HandshakeTimeout(timeout)),
		}
	}

	/// Tear down after a failed `establish`, unless `CONNECTED` landed after
	/// the timeout fired, in which case `None` is returned and nothing changes.
	/// On teardown, returns the last joined room with the released resources.
	fn abandon_transition(&self) -> Option<(Option<ChatChannelId>, Released)> {
		let mut inner = self.inner.lock();
		if inner.state == SessionState::Connected {
			return None;
		}
		inner.state = SessionState::Disconnected;
		let released = inner.release(self.config.owns_credentials(), true);
		Some((inner.room.clone(), released))
	}
}

/// Client for one chat room, or one broadcast's successive rooms.
///
/// Cheap to clone; clones share the same connection and subscribers.
#[derive(Clone)]
pub struct ChatSession {
	shared: Arc<Shared>,
}

impl fmt::Debug for ChatSession {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.shared.inner.lock();
		f.debug_struct("ChatSession")
			.field("target", &self.shared.config.target)
			.field("state", &inner.state)
			.field("room", &inner.room)
			.field("generation", &inner.generation)
			.finish()
	}
}

pub struct ChatSessionBuilder {
	config: ChatSessionConfig,
	credentials: Option<Arc<dyn CredentialResolver>>,
	metadata: Option<Arc<dyn MetadataService>>,
	connector: Option<WsConnector>,
}

impl ChatSessionBuilder {
	pub fn credentials(mut self, credentials: Arc<dyn CredentialResolver>) -> Self {
		self.credentials = Some(credentials);
		self
	}

	pub fn metadata(mut self, metadata: Arc<dyn MetadataService>) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn connector(mut self, connector: WsConnector) -> Self {
		self.connector = Some(connector);
		self
	}

	pub fn build(self) -> Result<ChatSession, ChatError> {
		self.config.validate()?;
		if matches!(self.config.target, ChatTarget::Broadcast(_)) && self.metadata.is_none() {
			return Err(ChatError::InvalidConfig(
				"broadcast target needs a metadata service".to_string(),
			));
		}
		if self.config.access_token.is_none() && self.credentials.is_none() {
			return Err(ChatError::InvalidConfig(
				"no access token and no credential resolver".to_string(),
			));
		}

		Ok(ChatSession {
			shared: Arc::new(Shared {
				config: self.config,
				credentials: self.credentials,
				metadata: self.metadata,
				connector: self.connector.unwrap_or_else(tungstenite_connector),
				bus: EventBus::new(),
				inner: Mutex::new(Inner::new()),
			}),
		})
	}
}

impl ChatSession {
	pub fn builder(config: ChatSessionConfig) -> ChatSessionBuilder {
		ChatSessionBuilder {
			config,
			credentials: None,
			metadata: None,
			connector: None,
		}
	}

	/// Use the REST client for both credentials and room lookups.
	pub fn from_client(config: ChatSessionConfig, client: Arc<ChzzkClient>) -> Result<Self, ChatError> {
		Self::builder(config)
			.credentials(client.clone())
			.metadata(client)
			.build()
	}

	/// No credential service at all; the caller already holds a token.
	pub fn from_access_token(
		room: ChatChannelId,
		access_token: SecretString,
		identity_hash: Option<UserIdHash>,
	) -> Result<Self, ChatError> {
		Self::builder(ChatSessionConfig::for_room(room).with_access_token(access_token, identity_hash)).build()
	}

	pub fn config(&self) -> &ChatSessionConfig {
		&self.shared.config
	}

	pub fn state(&self) -> SessionState {
		self.shared.inner.lock().state
	}

	pub fn is_connected(&self) -> bool {
		self.state() == SessionState::Connected
	}

	/// Active room, or the last one after a disconnect.
	pub fn chat_channel_id(&self) -> Option<ChatChannelId> {
		self.shared.inner.lock().room.clone()
	}

	pub fn on<T, F>(&self, handler: F) -> HandlerId
	where
		T: Topic,
		F: Fn(&T::Payload) + Send + Sync + 'static,
	{
		self.shared.bus.on::<T, F>(handler)
	}

	pub fn off(&self, id: HandlerId) -> bool {
		self.shared.bus.off(id)
	}

	/// Every event as a stream, for consumers that prefer a channel to callbacks.
	pub fn events(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
		self.shared.bus.stream()
	}

	/// Resolve credentials, open the socket and wait for `CONNECTED`.
	pub async fn connect(&self) -> Result<(), ChatError> {
		{
			let mut inner = self.shared.inner.lock();
			if inner.state != SessionState::Disconnected {
				return Err(ChatError::AlreadyConnected);
			}
			inner.state = SessionState::Connecting;
		}
		info!(target_room = ?self.shared.config.target, "connecting chat session");

		match self.shared.establish(None).await {
			Ok(_) => Ok(()),
			Err(err) => {
				let Some((_, released)) = self.shared.abandon_transition() else {
					debug!(error = %err, "handshake completed after the connect deadline");
					return Ok(());
				};
				released.finish().await;
				warn!(error = %err, "chat connect failed");
				Err(err)
			}
		}
	}

	pub async fn disconnect(&self) -> Result<(), ChatError> {
		let (room, released) = {
			let mut inner = self.shared.inner.lock();
			match inner.state {
				SessionState::Disconnected => return Err(ChatError::NotConnected),
				SessionState::Connecting | SessionState::Reconnecting => return Err(ChatError::TransitionInProgress),
				SessionState::Connected => {}
			}
			inner.state = SessionState::Disconnected;
			let released = inner.release(self.shared.config.owns_credentials(), true);
			(inner.room.clone(), released)
		};

		released.finish().await;
		info!(room = ?room, "chat session disconnected");
		if let Some(room) = room {
			self.shared.bus.publish(ChatEvent::Disconnect(Lifecycle { room }));
		}
		Ok(())
	}

	/// Replace the socket without a user-visible disconnect. Broadcast
	/// targets re-resolve their room first.
	pub async fn reconnect(&self) -> Result<(), ChatError> {
		self.reconnect_with(None).await
	}

	pub(crate) async fn reconnect_with(&self, room_hint: Option<ChatChannelId>) -> Result<(), ChatError> {
		let released = {
			let mut inner = self.shared.inner.lock();
			match inner.state {
				SessionState::Connected => {}
				SessionState::Disconnected => return Err(ChatError::NotConnected),
				SessionState::Connecting | SessionState::Reconnecting => return Err(ChatError::TransitionInProgress),
			}
			inner.state = SessionState::Reconnecting;
			inner.release(self.shared.config.owns_credentials(), false)
		};
		released.finish().await;

		match self.shared.establish(room_hint).await {
			Ok(room) => {
				metrics::counter!("chzzk_chat_reconnects_total").increment(1);
				debug!(room = %room, "chat session reconnected");
				Ok(())
			}
			Err(err) => {
				let Some((room, released)) = self.shared.abandon_transition() else {
					debug!(error = %err, "handshake completed after the reconnect deadline");
					return Ok(());
				};
				warn!(error = %err, "chat reconnect failed; session is now disconnected");
				if let Some(room) = room {
					self.shared.bus.publish(ChatEvent::Disconnect(Lifecycle { room }));
				}
				released.finish().await;
				Err(err)
			}
		}
	}

	/// Ask the server to replay up to `count` recent messages.
	pub fn request_recent_chat(&self, count: u32) -> Result<(), ChatError> {
		let inner = self.shared.inner.lock();
		let (room, sid, outbound) = inner.ensure_connected()?;
		let frame = Envelope::request_recent_chat(room, sid, count)
			.and_then(|env| env.encode())
			.map_err(|err| ChatError::Transport(format!("{err:#}")))?;
		outbound.send(frame).map_err(|_| ChatError::NotConnected)
	}

	/// Send a `TEXT` message. Needs a session authenticated with a user identity.
	pub fn send_chat(&self, message: &str, emojis: &BTreeMap<String, String>) -> Result<(), ChatError> {
		let inner = self.shared.inner.lock();
		let (room, sid, outbound) = inner.ensure_connected()?;
		if !inner.grant.as_ref().is_some_and(AccessGrant::can_send) {
			return Err(ChatError::NotAuthenticated);
		}
		let now_ms = chrono::Utc::now().timestamp_millis();
		let frame = Envelope::send_chat(room, sid, message, emojis, now_ms)
			.and_then(|env| env.encode())
			.map_err(|err| ChatError::Transport(format!("{err:#}")))?;
		outbound.send(frame).map_err(|_| ChatError::NotConnected)
	}
}
