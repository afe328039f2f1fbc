//! Common test utilities and helpers.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use covenant_sidekick_proto::{
	ChannelDelegate, ChannelError, ConnectionRecord, ConnectionToken, Fault, ParamMap,
	ServerFrame, SessionId,
};
use covenant_wire::Value;
use tokio::sync::mpsc;

use crate::core::SidekickCore;

/// A registered session with its captured outbound queue.
pub struct TestSession {
	pub session_id: SessionId,
	pub frames: mpsc::Receiver<ServerFrame>,
}

impl TestSession {
	pub fn join(core: &Arc<SidekickCore>) -> Self {
		let (session_id, frames) = core.register_session();
		Self { session_id, frames }
	}

	/// Next frame already enqueued, if any.
	pub fn try_recv(&mut self) -> Option<ServerFrame> {
		self.frames.try_recv().ok()
	}

	/// Waits briefly for a frame.
	pub async fn recv(&mut self) -> Option<ServerFrame> {
		tokio::time::timeout(Duration::from_millis(100), self.frames.recv())
			.await
			.ok()
			.flatten()
	}

	/// Drains everything currently enqueued.
	pub fn drain(&mut self) -> Vec<ServerFrame> {
		let mut frames = Vec::new();
		while let Ok(frame) = self.frames.try_recv() {
			frames.push(frame);
		}
		frames
	}
}

pub fn room(name: &str) -> ParamMap {
	[("chatChannel", name)].into_iter().collect()
}

pub fn token(name: &str) -> ConnectionToken {
	ConnectionToken::new(name)
}

pub fn chat_record(token_name: &str, room_name: &str, sender: &str) -> ConnectionRecord {
	ConnectionRecord {
		token: token(token_name),
		channel: "chatroom".to_string(),
		params: room(room_name),
		context: Value::object([("connectionId", Value::from(sender))]),
	}
}

/// Delegate that records deliveries and broadcasts them back on the same
/// channel topic, chat-style.
#[derive(Default)]
pub struct EchoDelegate {
	core: Mutex<Weak<SidekickCore>>,
	pub delivered: Mutex<Vec<(String, ParamMap, Value, Value)>>,
	pub fail_with: Mutex<Option<ChannelError>>,
}

impl EchoDelegate {
	pub fn install(core: &Arc<SidekickCore>) -> Arc<Self> {
		let delegate = Arc::new(Self::default());
		*delegate.core.lock().unwrap() = Arc::downgrade(core);
		core.set_delegate(delegate.clone());
		delegate
	}

	pub fn fail_next(&self, error: ChannelError) {
		*self.fail_with.lock().unwrap() = Some(error);
	}
}

#[async_trait]
impl ChannelDelegate for EchoDelegate {
	async fn deliver(
		&self,
		channel: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError> {
		if let Some(error) = self.fail_with.lock().unwrap().take() {
			return Err(error);
		}

		self.delivered.lock().unwrap().push((
			channel.to_string(),
			params.clone(),
			data.clone(),
			context.clone(),
		));

		let Some(core) = self.core.lock().unwrap().upgrade() else {
			return Err(ChannelError::sidekick("core gone"));
		};
		let sender = context
			.get("connectionId")
			.and_then(Value::as_str)
			.unwrap_or_default();
		let message = data
			.get("message")
			.and_then(Value::as_str)
			.unwrap_or_default();
		core.post_server_message(
			channel,
			params,
			&Value::object([
				("senderId", Value::from(sender)),
				("message", Value::from(message)),
			]),
		);
		Ok(())
	}
}

pub fn client_fault(message: &str) -> ChannelError {
	ChannelError {
		channel: None,
		params: None,
		fault: Fault::Client,
		message: message.to_string(),
	}
}
