#![forbid(unsafe_code)]

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use super::{ChatSession, SessionState, Shared};

/// Re-resolves the broadcast's room id every `period` and reconnects on change.
///
/// Ticks are skipped while a transition is in flight. The task exits once the
/// session is gone or disconnected.
pub(super) async fn run_room_poller(shared: Weak<Shared>, period: Duration) {
	let mut ticker = interval_at(Instant::now() + period, period);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

	loop {
		ticker.tick().await;
		let Some(session) = shared.upgrade() else {
			return;
		};

		let (channel, current) = {
			let inner = session.inner.lock();
			match inner.state {
				SessionState::Connected => {}
				SessionState::Connecting | SessionState::Reconnecting => continue,
				SessionState::Disconnected => return,
			}
			let Some(channel) = session.broadcast_channel() else {
				return;
			};
			(channel.clone(), inner.room.clone())
		};
		let Some(metadata) = session.metadata.clone() else {
			return;
		};

		match metadata.chat_channel_id(&channel).await {
			Ok(Some(room)) if current.as_ref() != Some(&room) => {
				info!(channel = %channel, room = %room, "chat room changed; reconnecting");
				let handle = ChatSession {
					shared: Arc::clone(&session),
				};
				if let Err(err) = handle.reconnect_with(Some(room)).await {
					warn!(channel = %channel, error = %err, "room change reconnect failed");
				}
			}
			Ok(Some(_)) => {}
			Ok(None) => debug!(channel = %channel, "broadcast has no chat room right now"),
			Err(err) => {
				metrics::counter!("chzzk_chat_poll_errors_total").increment(1);
				warn!(channel = %channel, error = %err, "room poll failed");
			}
		}
	}
}
