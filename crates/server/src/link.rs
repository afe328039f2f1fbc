//! TCP server link to an out-of-process Sidekick broker.

use std::io::{Error as IoError, ErrorKind};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use covenant_sidekick_proto::wire::{decode_broker_frame, encode_link_frame};
use covenant_sidekick_proto::{
	BrokerFrame, ChannelDelegate, ChannelError, ConnectionRecord, ConnectionToken, LinkFrame,
	ParamMap, Sidekick, SidekickError, is_disconnect, read_value, write_value,
};
use covenant_wire::Value;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;

/// A late-bound [`ChannelDelegate`].
///
/// The link must exist before the server can be built (the server's
/// sidekick handle is the link), but deliveries target the server. A slot
/// breaks the cycle: hand it to [`RemoteSidekick::connect`], then point it
/// at the server once built. Deliveries before that fail with a sidekick
/// fault.
#[derive(Default)]
pub struct DelegateSlot {
	inner: RwLock<Option<Arc<dyn ChannelDelegate>>>,
}

impl DelegateSlot {
	/// An empty slot.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Points the slot at the built server.
	pub fn set(&self, delegate: Arc<dyn ChannelDelegate>) {
		*self.inner.write().unwrap() = Some(delegate);
	}
}

#[async_trait]
impl ChannelDelegate for DelegateSlot {
	async fn deliver(
		&self,
		channel: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError> {
		let delegate = self.inner.read().unwrap().clone();
		match delegate {
			Some(delegate) => delegate.deliver(channel, params, data, context).await,
			None => Err(ChannelError::sidekick("covenant server not ready")),
		}
	}
}

/// Server-side handle to a remote broker.
///
/// Trait calls enqueue frames onto the link; a writer task drains the
/// queue so callers never block on the socket. Incoming `Deliver` frames
/// are dispatched to the channel delegate and answered with
/// `DeliverReply`. A broken link surfaces as [`SidekickError::Unavailable`]
/// on subsequent calls; reconnection is the supervisor's concern.
#[derive(Debug)]
pub struct RemoteSidekick {
	out: mpsc::UnboundedSender<LinkFrame>,
}

impl RemoteSidekick {
	/// Connects to the broker, authenticates with the shared secret, and
	/// starts the link tasks.
	pub async fn connect(
		addr: &str,
		secret: &str,
		delegate: Arc<dyn ChannelDelegate>,
	) -> std::io::Result<Arc<Self>> {
		let stream = TcpStream::connect(addr).await?;
		let (read_half, mut write_half) = stream.into_split();

		write_value(
			&mut write_half,
			&encode_link_frame(&LinkFrame::Hello {
				secret: secret.to_string(),
			}),
		)
		.await?;

		let mut reader = tokio::io::BufReader::new(read_half);
		let first = read_value(&mut reader).await?;
		match decode_broker_frame(&first) {
			Ok(BrokerFrame::HelloAck) => {}
			Ok(BrokerFrame::HelloReject) => {
				return Err(IoError::new(
					ErrorKind::PermissionDenied,
					"sidekick rejected the link secret",
				));
			}
			Ok(other) => {
				return Err(IoError::new(
					ErrorKind::InvalidData,
					format!("unexpected frame before hello ack: {other:?}"),
				));
			}
			Err(e) => return Err(IoError::new(ErrorKind::InvalidData, e.to_string())),
		}

		let (out, out_rx) = mpsc::unbounded_channel();
		tokio::spawn(write_loop(write_half, out_rx));
		tokio::spawn(read_loop(reader, delegate, out.clone()));

		tracing::info!(addr, "sidekick link established");
		Ok(Arc::new(Self { out }))
	}

	fn send(&self, frame: LinkFrame) -> Result<(), SidekickError> {
		self.out
			.send(frame)
			.map_err(|_| SidekickError::Unavailable("sidekick link closed".to_string()))
	}
}

impl Sidekick for RemoteSidekick {
	fn add_connection(&self, record: ConnectionRecord) -> Result<(), SidekickError> {
		self.send(LinkFrame::AddConnection {
			token: record.token,
			channel: record.channel,
			params: record.params,
			context: record.context,
		})
	}

	fn remove_connection(&self, token: &ConnectionToken) -> Result<(), SidekickError> {
		self.send(LinkFrame::RemoveConnection {
			token: token.clone(),
		})
	}

	fn update_resources(&self, resources: &[String]) -> Result<(), SidekickError> {
		self.send(LinkFrame::Update {
			resources: resources.to_vec(),
		})
	}

	fn post_server_message(
		&self,
		channel: &str,
		params: &ParamMap,
		data: &Value,
	) -> Result<(), SidekickError> {
		self.send(LinkFrame::PostMessage {
			channel: channel.to_string(),
			params: params.clone(),
			data: data.clone(),
		})
	}
}

async fn write_loop(
	mut write_half: OwnedWriteHalf,
	mut out_rx: mpsc::UnboundedReceiver<LinkFrame>,
) {
	while let Some(frame) = out_rx.recv().await {
		if let Err(e) = write_value(&mut write_half, &encode_link_frame(&frame)).await {
			if !is_disconnect(&e) {
				tracing::error!(error = %e, "sidekick link write failed");
			}
			break;
		}
	}
}

async fn read_loop(
	mut reader: tokio::io::BufReader<tokio::net::tcp::OwnedReadHalf>,
	delegate: Arc<dyn ChannelDelegate>,
	out: mpsc::UnboundedSender<LinkFrame>,
) {
	loop {
		let value = match read_value(&mut reader).await {
			Ok(value) => value,
			Err(e) => {
				if is_disconnect(&e) {
					tracing::info!("sidekick link closed");
				} else {
					tracing::error!(error = %e, "sidekick link read failed");
				}
				return;
			}
		};

		match decode_broker_frame(&value) {
			Ok(BrokerFrame::Deliver {
				delivery,
				channel,
				params,
				data,
				context,
			}) => {
				let delegate = delegate.clone();
				let out = out.clone();
				tokio::spawn(async move {
					let error = delegate
						.deliver(&channel, &params, data, context)
						.await
						.err();
					let _ = out.send(LinkFrame::DeliverReply { delivery, error });
				});
			}
			Ok(frame) => {
				tracing::warn!(?frame, "unexpected frame on established link");
			}
			Err(e) => {
				tracing::warn!(error = %e, "undecodable frame on link");
			}
		}
	}
}
