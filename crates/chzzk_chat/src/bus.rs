#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::event::{ChatEvent, EventKind, topic::Topic};

/// Returned by [`EventBus::on`]; pass to [`EventBus::off`] to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

/// Typed publish/subscribe hub.
///
/// Handlers run synchronously on the publishing task, in registration order
/// per event kind. They are invoked outside the internal lock, so a handler
/// may subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct EventBus {
	next_id: AtomicU64,
	handlers: RwLock<BTreeMap<EventKind, Vec<(HandlerId, Handler)>>>,
	streams: Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let handlers: usize = self.handlers.read().values().map(Vec::len).sum();
		f.debug_struct("EventBus")
			.field("handlers", &handlers)
			.field("streams", &self.streams.lock().len())
			.finish()
	}
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn on<T, F>(&self, handler: F) -> HandlerId
	where
		T: Topic,
		F: Fn(&T::Payload) + Send + Sync + 'static,
	{
		let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
		let erased: Handler = Arc::new(move |event: &ChatEvent| {
			if let Some(payload) = T::payload(event) {
				handler(payload);
			}
		});
		self.handlers.write().entry(T::KIND).or_default().push((id, erased));
		id
	}

	/// Returns `false` if the handler was already removed.
	pub fn off(&self, id: HandlerId) -> bool {
		let mut handlers = self.handlers.write();
		for list in handlers.values_mut() {
			if let Some(pos) = list.iter().position(|(h, _)| *h == id) {
				list.remove(pos);
				return true;
			}
		}
		false
	}

	/// Every event published from now on. Dropping the receiver unsubscribes.
	pub fn stream(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.streams.lock().push(tx);
		rx
	}

	pub fn publish(&self, event: ChatEvent) {
		let kind = event.kind();
		metrics::counter!("chzzk_chat_events_total", "kind" => kind.as_str()).increment(1);

		let snapshot: Vec<Handler> = self
			.handlers
			.read()
			.get(&kind)
			.map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
			.unwrap_or_default();
		for handler in snapshot {
			handler(&event);
		}

		let mut streams = self.streams.lock();
		if streams.is_empty() {
			return;
		}
		streams.retain(|tx| tx.send(event.clone()).is_ok());
	}
}
