//! TCP surface: client session loops and the authenticated server link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use covenant_sidekick_proto::wire::{
	decode_client_frame, decode_link_frame, encode_broker_frame, encode_server_frame,
};
use covenant_sidekick_proto::{
	BrokerFrame, ChannelDelegate, ChannelError, ClientFrame, DeliveryId, LinkFrame, ParamMap,
	ServerFrame, SessionId, is_disconnect, read_value, write_value,
};
use covenant_wire::Value;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::SidekickCore;

/// How long a delegated send may wait for the server's reply.
const DELIVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Authentication policy for the server link.
#[derive(Debug, Clone)]
pub struct LinkAuth {
	/// Shared secret the server must present in its `hello`.
	pub secret: String,
	/// Delay applied before rejecting a failed authentication, to deter
	/// brute force.
	pub delay: Duration,
}

impl LinkAuth {
	/// Policy with the default rejection delay.
	pub fn new(secret: impl Into<String>) -> Self {
		Self {
			secret: secret.into(),
			delay: SidekickCore::DEFAULT_AUTH_DELAY,
		}
	}
}

/// Accepts broker connections until `shutdown` is cancelled.
///
/// The first frame decides what a connection is: a `hello` makes it a
/// server link, anything else makes it a client session.
pub async fn serve(
	listener: TcpListener,
	core: Arc<SidekickCore>,
	auth: LinkAuth,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	tracing::info!(addr = ?listener.local_addr().ok(), "sidekick listening");
	loop {
		tokio::select! {
			() = shutdown.cancelled() => {
				tracing::info!("sidekick accept loop stopping");
				return Ok(());
			}
			accepted = listener.accept() => {
				match accepted {
					Ok((stream, peer)) => {
						tracing::debug!(%peer, "connection accepted");
						tokio::spawn(handle_connection(stream, core.clone(), auth.clone()));
					}
					Err(e) => {
						tracing::error!(error = %e, "accept failed");
					}
				}
			}
		}
	}
}

/// Classifies and runs one connection.
pub(crate) async fn handle_connection(stream: TcpStream, core: Arc<SidekickCore>, auth: LinkAuth) {
	let (read_half, write_half) = stream.into_split();
	let mut reader = BufReader::new(read_half);

	let first = match read_value(&mut reader).await {
		Ok(value) => value,
		Err(e) => {
			if !is_disconnect(&e) {
				tracing::warn!(error = %e, "connection dropped before first frame");
			}
			return;
		}
	};

	if let Ok(LinkFrame::Hello { secret }) = decode_link_frame(&first) {
		run_server_link(reader, write_half, core, auth, &secret).await;
		return;
	}

	match decode_client_frame(&first) {
		Ok(frame) => run_client_session(reader, write_half, core, frame).await,
		Err(e) => {
			tracing::warn!(error = %e, "undecodable first frame, closing connection");
		}
	}
}

async fn run_client_session(
	mut reader: BufReader<OwnedReadHalf>,
	write_half: OwnedWriteHalf,
	core: Arc<SidekickCore>,
	first: ClientFrame,
) {
	let (session_id, outbound) = core.register_session();
	tokio::spawn(drain_session_queue(session_id, outbound, write_half));

	apply_client_frame(&core, session_id, first).await;

	loop {
		let value = match read_value(&mut reader).await {
			Ok(value) => value,
			Err(e) => {
				if !is_disconnect(&e) {
					tracing::warn!(%session_id, error = %e, "session read failed");
				}
				break;
			}
		};
		match decode_client_frame(&value) {
			Ok(frame) => apply_client_frame(&core, session_id, frame).await,
			Err(e) => {
				tracing::warn!(%session_id, error = %e, "undecodable frame, closing session");
				break;
			}
		}
	}

	core.unregister_session(session_id);
}

async fn apply_client_frame(core: &Arc<SidekickCore>, session_id: SessionId, frame: ClientFrame) {
	match frame {
		ClientFrame::Send {
			token,
			channel,
			params,
			data,
		} => {
			core.handle_send(session_id, &token, &channel, &params, data)
				.await;
		}
		other => core.handle_sync_frame(session_id, other),
	}
}

async fn drain_session_queue(
	session_id: SessionId,
	mut outbound: mpsc::Receiver<ServerFrame>,
	mut write_half: OwnedWriteHalf,
) {
	while let Some(frame) = outbound.recv().await {
		if let Err(e) = write_value(&mut write_half, &encode_server_frame(&frame)).await {
			if !is_disconnect(&e) {
				tracing::warn!(%session_id, error = %e, "session write failed");
			}
			return;
		}
	}
}

/// Pending delegated sends awaiting a `deliverReply` from the server.
///
/// Dropping a pending entry wakes the waiter with a link-dropped error,
/// so clearing the map on link teardown cancels everything in flight.
struct LinkDelegate {
	out: mpsc::UnboundedSender<BrokerFrame>,
	pending: Mutex<HashMap<DeliveryId, oneshot::Sender<Option<ChannelError>>>>,
	next_delivery: AtomicU64,
}

impl LinkDelegate {
	fn complete(&self, delivery: DeliveryId, error: Option<ChannelError>) {
		let Some(tx) = self.pending.lock().unwrap().remove(&delivery) else {
			tracing::warn!(?delivery, "reply for unknown delivery");
			return;
		};
		let _ = tx.send(error);
	}

	fn cancel_all(&self) {
		self.pending.lock().unwrap().clear();
	}
}

#[async_trait]
impl ChannelDelegate for LinkDelegate {
	async fn deliver(
		&self,
		channel: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError> {
		let delivery = DeliveryId(self.next_delivery.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = oneshot::channel();
		self.pending.lock().unwrap().insert(delivery, tx);

		let frame = BrokerFrame::Deliver {
			delivery,
			channel: channel.to_string(),
			params: params.clone(),
			data,
			context,
		};
		if self.out.send(frame).is_err() {
			self.pending.lock().unwrap().remove(&delivery);
			return Err(ChannelError::sidekick("server link closed"));
		}

		match tokio::time::timeout(DELIVER_TIMEOUT, rx).await {
			Ok(Ok(None)) => Ok(()),
			Ok(Ok(Some(error))) => Err(error),
			Ok(Err(_)) => Err(ChannelError::sidekick("server link dropped")),
			Err(_) => {
				self.pending.lock().unwrap().remove(&delivery);
				Err(ChannelError::sidekick("server did not reply in time"))
			}
		}
	}
}

async fn run_server_link(
	mut reader: BufReader<OwnedReadHalf>,
	mut write_half: OwnedWriteHalf,
	core: Arc<SidekickCore>,
	auth: LinkAuth,
	presented: &str,
) {
	if !constant_time_eq(presented, &auth.secret) {
		tracing::warn!("server link authentication failed");
		tokio::time::sleep(auth.delay).await;
		let _ = write_value(&mut write_half, &encode_broker_frame(&BrokerFrame::HelloReject)).await;
		return;
	}

	if write_value(&mut write_half, &encode_broker_frame(&BrokerFrame::HelloAck))
		.await
		.is_err()
	{
		return;
	}

	let (out, mut out_rx) = mpsc::unbounded_channel();
	let delegate = Arc::new(LinkDelegate {
		out,
		pending: Mutex::new(HashMap::new()),
		next_delivery: AtomicU64::new(0),
	});
	let dyn_delegate: Arc<dyn ChannelDelegate> = delegate.clone();
	core.set_delegate(dyn_delegate.clone());
	tracing::info!("server link authenticated");

	let writer = tokio::spawn(async move {
		while let Some(frame) = out_rx.recv().await {
			if write_value(&mut write_half, &encode_broker_frame(&frame))
				.await
				.is_err()
			{
				return;
			}
		}
	});

	loop {
		let value = match read_value(&mut reader).await {
			Ok(value) => value,
			Err(e) => {
				if is_disconnect(&e) {
					tracing::info!("server link closed");
				} else {
					tracing::warn!(error = %e, "server link read failed");
				}
				break;
			}
		};
		let frame = match decode_link_frame(&value) {
			Ok(frame) => frame,
			Err(e) => {
				tracing::warn!(error = %e, "undecodable link frame, closing link");
				break;
			}
		};
		match frame {
			LinkFrame::Hello { .. } => {
				tracing::warn!("duplicate hello on established link");
			}
			LinkFrame::AddConnection {
				token,
				channel,
				params,
				context,
			} => {
				let record = covenant_sidekick_proto::ConnectionRecord {
					token,
					channel,
					params,
					context,
				};
				if let Err(e) = core.add_connection(record) {
					tracing::warn!(error = %e, "add_connection rejected");
				}
			}
			LinkFrame::RemoveConnection { token } => core.remove_connection(&token),
			LinkFrame::Update { resources } => core.update_resources(&resources),
			LinkFrame::PostMessage {
				channel,
				params,
				data,
			} => core.post_server_message(&channel, &params, &data),
			LinkFrame::DeliverReply { delivery, error } => delegate.complete(delivery, error),
		}
	}

	core.clear_delegate(&dyn_delegate);
	delegate.cancel_all();
	writer.abort();
}

fn constant_time_eq(a: &str, b: &str) -> bool {
	let a = a.as_bytes();
	let b = b.as_bytes();
	let mut diff = a.len() ^ b.len();
	for i in 0..a.len().min(b.len()) {
		diff |= usize::from(a[i] ^ b[i]);
	}
	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn constant_time_eq_compares_content_and_length() {
		assert!(constant_time_eq("s3cret", "s3cret"));
		assert!(!constant_time_eq("s3cret", "s3cre7"));
		assert!(!constant_time_eq("s3cret", "s3cret-longer"));
		assert!(!constant_time_eq("", "x"));
		assert!(constant_time_eq("", ""));
	}
}
