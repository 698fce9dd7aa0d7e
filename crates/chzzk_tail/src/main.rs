#![forbid(unsafe_code)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use chzzk_chat::api::NidAuth;
use chzzk_chat::{ChatError, ChatEvent, ChatSession, ChatSessionConfig, ChzzkClient};
use chzzk_domain::{ChannelId, ChatChannelId};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::TailConfig;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: chzzk_tail [--channel <id> | --room <id>] [--recent <n>] [--config <path>]\n\
\n\
Options:\n\
\t--channel  Broadcast channel id; the chat room is looked up and tracked\n\
\t--room     Six-character chat room id\n\
\t--recent   Messages to backfill after connecting (default: 50, 0 disables)\n\
\t--config   Config file (default: ~/.chzzk/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Debug, Default)]
struct Args {
	channel: Option<ChannelId>,
	room: Option<ChatChannelId>,
	recent: Option<u32>,
	config_path: Option<PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--channel" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.channel = Some(ChannelId::new(v).unwrap_or_else(|e| {
					eprintln!("--channel: {e}");
					usage_and_exit();
				}));
			}
			"--room" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.room = Some(ChatChannelId::new(v).unwrap_or_else(|e| {
					eprintln!("--room: {e}");
					usage_and_exit();
				}));
			}
			"--recent" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.recent = Some(v.trim().parse().unwrap_or_else(|e| {
					eprintln!("--recent: {e}");
					usage_and_exit();
				}));
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				args.config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

impl Args {
	/// Flags win over file and env. A flag target replaces the other target kind.
	fn apply(self, cfg: &mut TailConfig) {
		if let Some(channel) = self.channel {
			cfg.channel_id = Some(channel);
			cfg.chat_channel_id = None;
		}
		if let Some(room) = self.room {
			cfg.chat_channel_id = Some(room);
			cfg.channel_id = None;
		}
		if let Some(recent) = self.recent {
			cfg.recent_chat_count = recent;
		}
	}
}

fn init_rustls_crypto_provider() {
	let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chzzk_chat=debug,chzzk_tail=debug".to_string());
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn build_session(cfg: &TailConfig) -> anyhow::Result<ChatSession> {
	let session_cfg = match (&cfg.chat_channel_id, &cfg.channel_id) {
		(Some(room), _) => ChatSessionConfig::for_room(room.clone()),
		(None, Some(channel)) => ChatSessionConfig::for_broadcast(channel.clone()).with_poll_interval(cfg.poll_interval),
		(None, None) => bail!("no chat target: pass --channel or --room, or set chat.channel_id in the config"),
	};
	let session_cfg = session_cfg.with_base_urls(cfg.base_urls.clone());

	if let Some(token) = &cfg.access_token
		&& cfg.chat_channel_id.is_some()
	{
		info!("using supplied access token; credential service disabled");
		let session_cfg = session_cfg.with_access_token(token.clone(), None);
		return ChatSession::builder(session_cfg).build().context("build chat session");
	}

	let auth = match (&cfg.nid_aut, &cfg.nid_ses) {
		(Some(nid_aut), Some(nid_ses)) => Some(NidAuth {
			nid_aut: nid_aut.clone(),
			nid_ses: nid_ses.clone(),
		}),
		_ => None,
	};
	let client = ChzzkClient::new(cfg.base_urls.clone(), auth)?;
	if !client.has_auth() {
		info!("no login cookies; chat is read-only");
	}
	ChatSession::from_client(session_cfg, Arc::new(client)).context("build chat session")
}

fn describe(event: &ChatEvent) -> Option<String> {
	fn nick(profile: Option<&chzzk_chat::Profile>) -> &str {
		profile.map(|p| p.nickname.as_str()).unwrap_or("(system)")
	}

	Some(match event {
		ChatEvent::Chat(chat) => {
			let recent = if chat.is_recent { " (recent)" } else { "" };
			if chat.hidden {
				format!("[chat{recent}] {}: <hidden>", nick(chat.profile.as_ref()))
			} else {
				format!("[chat{recent}] {}: {}", nick(chat.profile.as_ref()), chat.message)
			}
		}
		ChatEvent::Donation(donation) => {
			let amount = donation.extras.as_ref().map(|e| e.pay_amount).unwrap_or_default();
			let kind = donation
				.extras
				.as_ref()
				.and_then(|e| e.donation_type.as_ref())
				.map(|t| t.display_name())
				.unwrap_or("후원");
			let who = match donation.extras.as_ref() {
				Some(e) if e.is_anonymous => "(anonymous)",
				_ => nick(donation.profile.as_ref()),
			};
			format!("[donation] {who} {kind} {amount}: {}", donation.message)
		}
		ChatEvent::Subscription(sub) => {
			let month = sub.extras.as_ref().map(|e| e.month).unwrap_or_default();
			format!("[subscription] {} ({month} months): {}", nick(sub.profile.as_ref()), sub.message)
		}
		ChatEvent::SystemMessage(msg) => {
			let text = msg
				.extras
				.as_ref()
				.and_then(|e| e.description.as_deref())
				.unwrap_or(&msg.message);
			format!("[system] {text}")
		}
		ChatEvent::Notice(Some(notice)) => format!("[notice] {}", notice.message),
		ChatEvent::Notice(None) => "[notice] cleared".to_string(),
		ChatEvent::Blind(blind) => format!(
			"[blind] message by {} removed",
			blind.user_id.as_deref().unwrap_or("unknown")
		),
		ChatEvent::Connect(l) => format!("[connect] room {}", l.room),
		ChatEvent::Reconnect(l) => format!("[reconnect] room {}", l.room),
		ChatEvent::Disconnect(l) => format!("[disconnect] room {}", l.room),
		ChatEvent::Raw(_) => return None,
	})
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_rustls_crypto_provider();
	init_tracing();

	let args = parse_args();
	let config_path = match args.config_path.clone() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let mut cfg = crate::config::load_tail_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded tail config (toml + env overrides)");
	args.apply(&mut cfg);

	init_metrics(cfg.metrics_bind.as_deref());

	let session = build_session(&cfg)?;
	let mut events = session.events();
	session.connect().await.context("connect chat session")?;

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("ctrl-c received; disconnecting");
				break;
			}
			event = events.recv() => {
				let Some(event) = event else {
					break;
				};
				if matches!(event, ChatEvent::Connect(_) | ChatEvent::Reconnect(_))
					&& cfg.recent_chat_count > 0
					&& let Err(err) = session.request_recent_chat(cfg.recent_chat_count)
				{
					warn!(error = %err, "recent chat request failed");
				}
				let ended = matches!(event, ChatEvent::Disconnect(_));
				if let Some(line) = describe(&event) {
					println!("{line}");
				}
				if ended {
					break;
				}
			}
		}
	}

	match session.disconnect().await {
		Ok(()) | Err(ChatError::NotConnected) => Ok(()),
		Err(err) => Err(err.into()),
	}
}
