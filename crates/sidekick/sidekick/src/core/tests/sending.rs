//! Client send delegation through the server callback.

use covenant_sidekick_proto::{ChannelError, Fault, ServerFrame};
use covenant_wire::Value;

use super::helpers::{EchoDelegate, TestSession, chat_record, client_fault, room, token};
use crate::core::SidekickCore;

fn hello() -> Value {
	Value::object([("message", Value::from("hello"))])
}

#[tokio::test]
async fn send_delegates_with_the_records_context() {
	let core = SidekickCore::new();
	let delegate = EchoDelegate::install(&core);
	core.add_connection(chat_record("tok-send", "room-1", "conn-42"))
		.unwrap();
	let sender = TestSession::join(&core);

	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	let delivered = delegate.delivered.lock().unwrap();
	assert_eq!(delivered.len(), 1);
	let (channel, params, data, context) = &delivered[0];
	assert_eq!(channel, "chatroom");
	assert_eq!(*params, room("room-1"));
	assert_eq!(*data, hello());
	assert_eq!(
		context.get("connectionId").and_then(Value::as_str),
		Some("conn-42")
	);
}

#[tokio::test]
async fn subscribers_receive_what_the_server_posts_back() {
	let core = SidekickCore::new();
	EchoDelegate::install(&core);
	core.add_connection(chat_record("tok-sub", "room-1", "conn-sub"))
		.unwrap();
	core.add_connection(chat_record("tok-send", "room-1", "conn-send"))
		.unwrap();

	let mut subscriber = TestSession::join(&core);
	let sender = TestSession::join(&core);
	core.subscribe(subscriber.session_id, &token("tok-sub"));
	subscriber.drain();

	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	match subscriber.recv().await {
		Some(ServerFrame::Message { data, .. }) => {
			assert_eq!(
				data,
				Value::object([
					("senderId", Value::from("conn-send")),
					("message", Value::from("hello")),
				])
			);
		}
		other => panic!("expected message, got {other:?}"),
	}
}

#[tokio::test]
async fn sending_requires_no_subscription() {
	let core = SidekickCore::new();
	let delegate = EchoDelegate::install(&core);
	core.add_connection(chat_record("tok-send", "room-1", "c"))
		.unwrap();
	let mut sender = TestSession::join(&core);

	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	assert_eq!(delegate.delivered.lock().unwrap().len(), 1);
	// The sender is not subscribed, so the broadcast does not come back.
	assert_eq!(sender.try_recv(), None);
}

#[tokio::test]
async fn unknown_send_tokens_error_to_the_sender() {
	let core = SidekickCore::new();
	let delegate = EchoDelegate::install(&core);
	let mut sender = TestSession::join(&core);

	core.handle_send(
		sender.session_id,
		&token("missing"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	assert_eq!(
		sender.try_recv(),
		Some(ServerFrame::Error(ChannelError::sidekick("unknown token")))
	);
	assert!(delegate.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mismatched_channel_or_params_is_a_client_fault() {
	let core = SidekickCore::new();
	let delegate = EchoDelegate::install(&core);
	core.add_connection(chat_record("tok-send", "room-1", "c"))
		.unwrap();
	let mut sender = TestSession::join(&core);

	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-2"),
		hello(),
	)
	.await;

	match sender.try_recv() {
		Some(ServerFrame::Error(error)) => {
			assert_eq!(error.fault, Fault::Client);
			assert!(error.message.contains("does not match"));
		}
		other => panic!("expected error, got {other:?}"),
	}
	assert!(delegate.delivered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn delegate_failures_reach_only_the_sender() {
	let core = SidekickCore::new();
	let delegate = EchoDelegate::install(&core);
	core.add_connection(chat_record("tok-sub", "room-1", "s"))
		.unwrap();
	core.add_connection(chat_record("tok-send", "room-1", "c"))
		.unwrap();

	let mut subscriber = TestSession::join(&core);
	let mut sender = TestSession::join(&core);
	core.subscribe(subscriber.session_id, &token("tok-sub"));
	subscriber.drain();

	delegate.fail_next(client_fault("handler said no"));
	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	assert!(matches!(
		sender.try_recv(),
		Some(ServerFrame::Error(ChannelError {
			fault: Fault::Client,
			..
		}))
	));
	assert_eq!(subscriber.try_recv(), None);
}

#[tokio::test]
async fn sends_without_a_server_are_sidekick_faults() {
	let core = SidekickCore::new();
	core.add_connection(chat_record("tok-send", "room-1", "c"))
		.unwrap();
	let mut sender = TestSession::join(&core);

	core.handle_send(
		sender.session_id,
		&token("tok-send"),
		"chatroom",
		&room("room-1"),
		hello(),
	)
	.await;

	match sender.try_recv() {
		Some(ServerFrame::Error(error)) => {
			assert_eq!(error.fault, Fault::Sidekick);
			assert!(error.message.contains("no covenant server"));
		}
		other => panic!("expected error, got {other:?}"),
	}
}
