#![forbid(unsafe_code)]

use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use url::Url;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Text frames out.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;

/// Text frames in. The stream ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// A connected chat transport split into its two halves.
pub struct ChatSocket {
	pub sink: FrameSink,
	pub stream: FrameStream,
}

impl std::fmt::Debug for ChatSocket {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChatSocket").finish_non_exhaustive()
	}
}

/// Opens a [`ChatSocket`]; swapped out in tests.
pub type WsConnector = Arc<dyn Fn(Url) -> BoxFuture<'static, anyhow::Result<ChatSocket>> + Send + Sync>;

async fn connect_chat_ws(url: Url) -> anyhow::Result<ChatSocket> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
		.await
		.context("connect_async to chat ws")?;
	let (sink, stream) = ws.split();

	let sink = sink
		.sink_map_err(anyhow::Error::from)
		.with(|text: String| ready(Ok::<_, anyhow::Error>(Message::Text(text.into()))));

	let stream = stream
		.take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
		.filter_map(|msg| {
			ready(match msg {
				Ok(Message::Text(t)) => Some(Ok(t.as_str().to_owned())),
				Ok(Message::Binary(b)) => String::from_utf8(b.to_vec()).ok().map(Ok),
				Ok(_) => None,
				Err(e) => Some(Err(anyhow::Error::from(e).context("chat ws read"))),
			})
		});

	Ok(ChatSocket {
		sink: Box::pin(sink),
		stream: Box::pin(stream),
	})
}

pub fn tungstenite_connector() -> WsConnector {
	Arc::new(|url: Url| Box::pin(connect_chat_ws(url)) as BoxFuture<'static, anyhow::Result<ChatSocket>>)
}
