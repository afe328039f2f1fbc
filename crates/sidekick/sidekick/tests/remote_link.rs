//! The authenticated server link, end to end over TCP.

use std::sync::Arc;
use std::time::Duration;

use covenant_contract::{ChannelDef, Covenant};
use covenant_schema::Schema;
use covenant_server::{
	ConnectArgs, CovenantServer, DelegateSlot, Headers, MessageArgs, RemoteSidekick,
};
use covenant_sidekick::core::SidekickCore;
use covenant_sidekick::{LinkAuth, serve};
use covenant_sidekick_proto::wire::{decode_server_frame, encode_client_frame};
use covenant_sidekick_proto::{ClientFrame, ParamMap, ServerFrame, read_value, write_value};
use covenant_wire::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn covenant() -> Covenant {
	Covenant::declare(
		[],
		[ChannelDef {
			name: "chatroom".to_string(),
			params: vec!["chatChannel".to_string()],
			connection_request: Schema::object([("name", Schema::String)]),
			connection_context: Schema::object([("connectionId", Schema::String)]),
			client_message: Schema::object([("message", Schema::String)]),
			server_message: Schema::object([
				("senderId", Schema::String),
				("message", Schema::String),
			]),
		}],
	)
	.unwrap()
}

fn room(name: &str) -> ParamMap {
	[("chatChannel", name)].into_iter().collect()
}

async fn start_broker(secret: &str) -> (String, CancellationToken) {
	let core = SidekickCore::new();
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap().to_string();
	let shutdown = CancellationToken::new();
	let mut auth = LinkAuth::new(secret);
	auth.delay = Duration::from_millis(10);
	tokio::spawn(serve(listener, core, auth, shutdown.clone()));
	(addr, shutdown)
}

/// A raw client session speaking the framed protocol directly.
struct RawSession {
	stream: TcpStream,
}

impl RawSession {
	async fn connect(addr: &str) -> Self {
		Self {
			stream: TcpStream::connect(addr).await.unwrap(),
		}
	}

	async fn send(&mut self, frame: ClientFrame) {
		write_value(&mut self.stream, &encode_client_frame(&frame))
			.await
			.unwrap();
	}

	async fn recv(&mut self) -> ServerFrame {
		let value = tokio::time::timeout(Duration::from_secs(2), read_value(&mut self.stream))
			.await
			.expect("timed out")
			.unwrap();
		decode_server_frame(&value).unwrap()
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_secrets_are_rejected_after_a_delay() {
	let (addr, _shutdown) = start_broker("right").await;

	let err = RemoteSidekick::connect(&addr, "wrong", DelegateSlot::new())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), std::io::ErrorKind::PermissionDenied);
}

fn build_server(
	sidekick: Arc<dyn covenant_sidekick_proto::Sidekick>,
) -> Arc<CovenantServer<(), ()>> {
	CovenantServer::builder(
		covenant(),
		sidekick,
		|_headers, _request| async { Ok(()) },
		|_context, _error| async { Ok(()) },
	)
	.channel_derivation(|_context, _reject| async { Ok(()) })
	.channel(
		"chatroom",
		|args: ConnectArgs<(), ()>| async move {
			let name = args
				.inputs
				.get("name")
				.and_then(Value::as_str)
				.unwrap_or_default();
			Ok(Value::object([(
				"connectionId",
				Value::from(format!("conn-{name}")),
			)]))
		},
		|args: MessageArgs<()>| async move {
			let sender = args
				.context
				.get("connectionId")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let message = args
				.inputs
				.get("message")
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			args.poster
				.post(
					"chatroom",
					&args.params,
					&Value::object([
						("senderId", Value::from(sender)),
						("message", Value::from(message)),
					]),
				)
				.map_err(|e| args.error.raise(e.message, e.fault))
		},
	)
	.build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_round_trips_through_the_link() {
	let (addr, _shutdown) = start_broker("s3cret").await;

	// The slot breaks the server <-> link cycle.
	let slot = DelegateSlot::new();
	let link = RemoteSidekick::connect(&addr, "s3cret", slot.clone())
		.await
		.unwrap();
	let server = build_server(link as Arc<dyn covenant_sidekick_proto::Sidekick>);
	slot.set(server.clone());

	let token = server
		.connect(
			"chatroom",
			room("room-1"),
			Value::object([("name", Value::from("ada"))]),
			Headers::new(),
		)
		.await
		.unwrap();

	// Give the addConnection frame time to cross the link.
	tokio::time::sleep(Duration::from_millis(100)).await;

	let mut session = RawSession::connect(&addr).await;
	session
		.send(ClientFrame::Subscribe {
			token: token.clone(),
		})
		.await;
	assert!(matches!(session.recv().await, ServerFrame::Subscribed { .. }));

	session
		.send(ClientFrame::Send {
			token,
			channel: "chatroom".to_string(),
			params: room("room-1"),
			data: Value::object([("message", Value::from("over the link"))]),
		})
		.await;

	match session.recv().await {
		ServerFrame::Message { data, .. } => {
			assert_eq!(data.get("message"), Some(&Value::from("over the link")));
			assert_eq!(
				data.get("senderId"),
				Some(&Value::from("conn-ada"))
			);
		}
		other => panic!("expected message, got {other:?}"),
	}
}
