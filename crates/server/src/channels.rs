//! The channel runtime: connection handshake, message routing, and server
//! message publication.

use std::sync::Arc;

use async_trait::async_trait;
use covenant_contract::{ChannelDef, Covenant};
use covenant_sidekick_proto::{
	ChannelDelegate, ChannelError, ConnectionRecord, ConnectionToken, Fault, ParamMap, Sidekick,
};
use covenant_wire::Value;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::args::{ConnectArgs, Headers, MessageArgs, RequestHandle};
use crate::error::{ErrorSink, Halt, RejectSink};
use crate::server::CovenantServer;

/// Publishes server messages on channel topics.
///
/// Cheap to clone; hand one to a derivation so procedures can broadcast,
/// and every `on_message` handler receives one in its args.
#[derive(Clone)]
pub struct ChannelPoster {
	covenant: Covenant,
	sidekick: Arc<dyn Sidekick>,
}

impl ChannelPoster {
	/// Validates the payload against the channel's server-message schema
	/// and publishes it on the channel topic.
	pub fn post(&self, channel: &str, params: &ParamMap, data: &Value) -> Result<(), ChannelError> {
		let Some(def) = self.covenant.channel(channel) else {
			return Err(ChannelError::scoped(
				channel,
				params.clone(),
				Fault::Server,
				format!("unknown channel {channel:?}"),
			));
		};

		if let Err(issues) = def.server_message.validate(data) {
			tracing::error!(channel, %issues, "server message violated its schema");
			return Err(ChannelError::scoped(
				channel,
				params.clone(),
				Fault::Server,
				format!("server message for {channel:?} violated its schema: {issues}"),
			));
		}

		self.sidekick
			.post_server_message(channel, params, data)
			.map_err(|e| {
				ChannelError::scoped(channel, params.clone(), Fault::Sidekick, e.to_string())
			})
	}
}

fn fault_for_halt(halt: &Halt) -> Fault {
	if halt.code >= 500 {
		Fault::Server
	} else {
		Fault::Client
	}
}

impl<C: Send + Sync + 'static, D: Send + Sync + 'static> CovenantServer<C, D> {
	/// A publisher bound to this server's covenant and broker handle.
	pub fn poster(&self) -> ChannelPoster {
		ChannelPoster {
			covenant: self.covenant.clone(),
			sidekick: self.sidekick.clone(),
		}
	}

	/// Handles a channel connection request.
	///
	/// Validates params and the request payload, runs `on_connect`, mints
	/// a token, and registers the connection record with the broker. The
	/// returned token is the client's ticket into the broker.
	pub async fn connect(
		&self,
		channel_name: &str,
		params: ParamMap,
		request: Value,
		headers: Headers,
	) -> Result<ConnectionToken, ChannelError> {
		let scoped = |fault, message: String| {
			ChannelError::scoped(channel_name, params.clone(), fault, message)
		};

		let Some(def) = self.covenant.channel(channel_name) else {
			return Err(ChannelError::scoped(
				channel_name,
				params.clone(),
				Fault::Client,
				format!("unknown channel {channel_name:?}"),
			));
		};

		if let Err(message) = check_params(def, &params) {
			return Err(scoped(Fault::Client, message));
		}

		if let Err(issues) = def.connection_request.validate(&request) {
			return Err(scoped(
				Fault::Client,
				format!("parsing connection request for {channel_name:?} failed: {issues}"),
			));
		}

		let handle = RequestHandle {
			deadline: None,
			cancel: CancellationToken::new(),
		};
		let context = (self.context_generator)(Arc::new(headers), handle)
			.await
			.map_err(|halt| scoped(fault_for_halt(&halt), halt.message.clone()))?;
		let context = Arc::new(context);
		let derivation = (self.derivation)(context.clone(), ErrorSink)
			.await
			.map_err(|halt| scoped(fault_for_halt(&halt), halt.message.clone()))?;

		let Some(imp) = self.channels.get(channel_name) else {
			tracing::error!(channel = channel_name, "declared channel has no handlers");
			return Err(scoped(
				Fault::Server,
				format!("channel {channel_name:?} is not implemented"),
			));
		};

		let args = ConnectArgs {
			inputs: request,
			params: params.clone(),
			context,
			derivation: Arc::new(derivation),
			reject: RejectSink,
		};
		let connection_context = match std::panic::AssertUnwindSafe((imp.on_connect)(args))
			.catch_unwind()
			.await
		{
			Ok(Ok(context)) => context,
			Ok(Err(reject)) => return Err(scoped(reject.fault, reject.message)),
			Err(_) => {
				tracing::error!(channel = channel_name, "on_connect panicked");
				return Err(scoped(Fault::Server, "internal server error".to_string()));
			}
		};

		if let Err(issues) = def.connection_context.validate(&connection_context) {
			tracing::error!(channel = channel_name, %issues, "connection context violated schema");
			return Err(scoped(
				Fault::Server,
				format!("connection context for {channel_name:?} violated its schema: {issues}"),
			));
		}

		let token = ConnectionToken::new(Uuid::new_v4().to_string());
		self.sidekick
			.add_connection(ConnectionRecord {
				token: token.clone(),
				channel: channel_name.to_string(),
				params: params.clone(),
				context: connection_context,
			})
			.map_err(|e| scoped(Fault::Sidekick, e.to_string()))?;

		tracing::debug!(channel = channel_name, %params, "channel connection minted");
		Ok(token)
	}

	/// Tears down a minted connection, forgetting its record in the
	/// broker.
	pub fn disconnect(&self, token: &ConnectionToken) -> Result<(), ChannelError> {
		self.sidekick
			.remove_connection(token)
			.map_err(|e| ChannelError::sidekick(e.to_string()))
	}

	/// Processes a client message sent into a channel.
	///
	/// Entry point for the broker's delegation: `context` is the
	/// connection context captured when the sender's token was minted.
	pub async fn process_channel_message(
		&self,
		channel_name: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError> {
		let scoped = |fault, message: String| {
			ChannelError::scoped(channel_name, params.clone(), fault, message)
		};

		let Some(def) = self.covenant.channel(channel_name) else {
			return Err(scoped(
				Fault::Client,
				format!("unknown channel {channel_name:?}"),
			));
		};

		if let Err(issues) = def.client_message.validate(&data) {
			return Err(scoped(
				Fault::Client,
				format!("parsing channel message for {channel_name:?} failed: {issues}"),
			));
		}

		let Some(channel_derivation) = &self.channel_derivation else {
			tracing::error!(channel = channel_name, "no channel derivation configured");
			return Err(scoped(
				Fault::Server,
				"no channel derivation configured".to_string(),
			));
		};
		let derivation = channel_derivation(context.clone(), RejectSink)
			.await
			.map_err(|reject| scoped(reject.fault, reject.message))?;

		let Some(imp) = self.channels.get(channel_name) else {
			tracing::error!(channel = channel_name, "declared channel has no handlers");
			return Err(scoped(
				Fault::Server,
				format!("channel {channel_name:?} is not implemented"),
			));
		};

		let args = MessageArgs {
			inputs: data,
			params: params.clone(),
			context,
			derivation: Arc::new(derivation),
			poster: self.poster(),
			error: RejectSink,
		};
		match std::panic::AssertUnwindSafe((imp.on_message)(args))
			.catch_unwind()
			.await
		{
			Ok(Ok(())) => Ok(()),
			Ok(Err(reject)) => Err(scoped(reject.fault, reject.message)),
			Err(_) => {
				tracing::error!(channel = channel_name, "on_message panicked");
				Err(scoped(Fault::Server, "internal server error".to_string()))
			}
		}
	}

	/// Validates and publishes a server message on a channel topic.
	pub fn post_channel_message(
		&self,
		channel: &str,
		params: &ParamMap,
		data: &Value,
	) -> Result<(), ChannelError> {
		self.poster().post(channel, params, data)
	}
}

fn check_params(def: &ChannelDef, params: &ParamMap) -> Result<(), String> {
	for declared in &def.params {
		if params.get(declared).is_none() {
			return Err(format!("missing channel param {declared:?}"));
		}
	}
	for (name, _) in params.iter() {
		if !def.params.iter().any(|declared| declared == name) {
			return Err(format!("unexpected channel param {name:?}"));
		}
	}
	Ok(())
}

#[async_trait]
impl<C: Send + Sync + 'static, D: Send + Sync + 'static> ChannelDelegate for CovenantServer<C, D> {
	async fn deliver(
		&self,
		channel: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError> {
		self.process_channel_message(channel, params, data, context).await
	}
}
