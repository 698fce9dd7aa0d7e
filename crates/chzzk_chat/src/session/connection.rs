#![forbid(unsafe_code)]

use std::sync::Weak;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use super::Shared;
use super::socket::ChatSocket;
use crate::codec::Envelope;

/// What the read loop should do after a frame was handled.
#[derive(Debug, Default)]
pub(super) struct FrameOutcome {
	pub reply: Option<String>,
	pub is_pong: bool,
}

/// Drives one socket until it closes or the session drops its outbound sender.
///
/// `generation` tags every callback so the session can ignore a socket that a
/// reconnect has already replaced.
pub(super) async fn run_connection(
	shared: Weak<Shared>,
	generation: u64,
	socket: ChatSocket,
	mut outbound_rx: mpsc::UnboundedReceiver<String>,
	keepalive: Duration,
) {
	let ChatSocket { mut sink, mut stream } = socket;
	let keepalive_timer = sleep(keepalive);
	tokio::pin!(keepalive_timer);

	let reason = loop {
		tokio::select! {
			biased;

			frame = outbound_rx.recv() => {
				let Some(frame) = frame else {
					debug!(generation, "outbound closed; closing chat socket");
					let _ = sink.close().await;
					return;
				};
				if let Err(err) = sink.send(frame).await {
					break format!("send failed: {err:#}");
				}
			}

			msg = stream.next() => {
				let text = match msg {
					None => break "closed by server".to_string(),
					Some(Err(err)) => break format!("read failed: {err:#}"),
					Some(Ok(text)) => text,
				};
				let Some(session) = shared.upgrade() else {
					return;
				};

				let outcome = session.handle_frame(generation, &text);
				drop(session);

				if let Some(reply) = outcome.reply
					&& let Err(err) = sink.send(reply).await
				{
					break format!("reply failed: {err:#}");
				}
				if !outcome.is_pong {
					keepalive_timer.as_mut().reset(Instant::now() + keepalive);
				}
			}

			() = &mut keepalive_timer => {
				metrics::counter!("chzzk_chat_keepalive_pings_total").increment(1);
				debug!(generation, "chat idle; sending keepalive ping");
				let ping = match Envelope::ping().encode() {
					Ok(ping) => ping,
					Err(err) => break format!("encode ping: {err:#}"),
				};
				if let Err(err) = sink.send(ping).await {
					break format!("keepalive failed: {err:#}");
				}
				keepalive_timer.as_mut().reset(Instant::now() + keepalive);
			}
		}
	};

	warn!(generation, %reason, "chat socket ended");
	if let Some(session) = shared.upgrade() {
		session.on_socket_closed(generation, &reason);
	}
}
