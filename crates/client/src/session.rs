//! TCP client for the broker's session surface.

use std::sync::Arc;

use covenant_sidekick_proto::wire::{decode_server_frame, encode_client_frame};
use covenant_sidekick_proto::{
	ClientFrame, ConnectionToken, ParamMap, ServerFrame, is_disconnect, read_value, write_value,
};
use covenant_wire::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::listener::{ListenerCore, RemoteLink};

/// The session's transport went away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("sidekick session closed")]
pub struct SessionError;

/// One live client connection to the broker.
///
/// Outbound frames are enqueued and drained by a writer task; inbound
/// frames arrive on the receiver returned by [`SidekickSession::connect`].
pub struct SidekickSession {
	out: mpsc::UnboundedSender<ClientFrame>,
}

impl SidekickSession {
	/// Connects to the broker and starts the read/write tasks.
	///
	/// Returns the session handle and the stream of inbound frames.
	pub async fn connect(
		addr: &str,
	) -> std::io::Result<(Arc<Self>, mpsc::UnboundedReceiver<ServerFrame>)> {
		let stream = TcpStream::connect(addr).await?;
		let (read_half, mut write_half) = stream.into_split();

		let (out, mut out_rx) = mpsc::unbounded_channel::<ClientFrame>();
		tokio::spawn(async move {
			while let Some(frame) = out_rx.recv().await {
				if let Err(e) = write_value(&mut write_half, &encode_client_frame(&frame)).await {
					if !is_disconnect(&e) {
						tracing::warn!(error = %e, "session write failed");
					}
					return;
				}
			}
		});

		let (events, events_rx) = mpsc::unbounded_channel();
		tokio::spawn(async move {
			let mut reader = tokio::io::BufReader::new(read_half);
			loop {
				let value = match read_value(&mut reader).await {
					Ok(value) => value,
					Err(e) => {
						if !is_disconnect(&e) {
							tracing::warn!(error = %e, "session read failed");
						}
						return;
					}
				};
				match decode_server_frame(&value) {
					Ok(frame) => {
						if events.send(frame).is_err() {
							return;
						}
					}
					Err(e) => {
						tracing::warn!(error = %e, "undecodable frame from sidekick");
						return;
					}
				}
			}
		});

		Ok((Arc::new(Self { out }), events_rx))
	}

	fn push(&self, frame: ClientFrame) -> Result<(), SessionError> {
		self.out.send(frame).map_err(|_| SessionError)
	}

	/// Joins the resource topics.
	pub fn listen(&self, resources: Vec<String>) -> Result<(), SessionError> {
		self.push(ClientFrame::Listen { resources })
	}

	/// Leaves the resource topics.
	pub fn unlisten(&self, resources: Vec<String>) -> Result<(), SessionError> {
		self.push(ClientFrame::Unlisten { resources })
	}

	/// Joins the channel topic a token resolves to.
	pub fn subscribe(&self, token: &ConnectionToken) -> Result<(), SessionError> {
		self.push(ClientFrame::Subscribe {
			token: token.clone(),
		})
	}

	/// Leaves the channel topic a token resolves to.
	pub fn unsubscribe(&self, token: &ConnectionToken) -> Result<(), SessionError> {
		self.push(ClientFrame::Unsubscribe {
			token: token.clone(),
		})
	}

	/// Sends a message into a channel.
	pub fn send(
		&self,
		token: &ConnectionToken,
		channel: impl Into<String>,
		params: ParamMap,
		data: Value,
	) -> Result<(), SessionError> {
		self.push(ClientFrame::Send {
			token: token.clone(),
			channel: channel.into(),
			params,
			data,
		})
	}

	/// Routes `updated` events into a listener core, forwarding
	/// everything else.
	///
	/// Returns the stream of non-update frames (subscription acks,
	/// channel messages, errors) for the application.
	pub fn route_updates(
		mut events: mpsc::UnboundedReceiver<ServerFrame>,
		listeners: Arc<ListenerCore>,
	) -> mpsc::UnboundedReceiver<ServerFrame> {
		let (forward, forwarded) = mpsc::unbounded_channel();
		tokio::spawn(async move {
			while let Some(frame) = events.recv().await {
				match frame {
					ServerFrame::Updated { resource } => listeners.on_updated(&resource),
					other => {
						if forward.send(other).is_err() {
							return;
						}
					}
				}
			}
		});
		forwarded
	}
}

impl RemoteLink for SidekickSession {
	fn listen(&self, resource: &str) {
		if self.listen(vec![resource.to_string()]).is_err() {
			tracing::warn!(resource, "listen dropped: session closed");
		}
	}

	fn unlisten(&self, resource: &str) {
		if self.unlisten(vec![resource.to_string()]).is_err() {
			tracing::warn!(resource, "unlisten dropped: session closed");
		}
	}
}
