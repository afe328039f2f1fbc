//! Per-request and per-delivery argument records handed to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use covenant_sidekick_proto::ParamMap;
use covenant_wire::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorSink, RejectSink};

/// Opaque request headers.
#[derive(Debug, Clone, Default)]
pub struct Headers(HashMap<String, String>);

impl Headers {
	/// An empty header set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets one header.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.0.insert(name.into(), value.into());
	}

	/// Looks up a header by name.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
	fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
		Self(
			iter.into_iter()
				.map(|(n, v)| (n.into(), v.into()))
				.collect(),
		)
	}
}

/// Handle to the in-flight request, exposed to the context generator.
///
/// Carries the transport-derived deadline and the cancellation token the
/// dispatcher trips when that deadline expires.
#[derive(Debug, Clone)]
pub struct RequestHandle {
	/// Remaining time budget, when the transport imposed one.
	pub deadline: Option<Duration>,
	/// Cancelled by the dispatcher on deadline expiry.
	pub cancel: CancellationToken,
}

/// Arguments to a procedure handler. One record per request; nothing here
/// is shared across requests.
pub struct ProcedureArgs<C, D> {
	/// The validated caller inputs.
	pub inputs: Value,
	/// Per-request context from the context generator.
	pub context: Arc<C>,
	/// Per-request toolbox from the derivation.
	pub derivation: Arc<D>,
	/// The request headers.
	pub headers: Arc<Headers>,
	/// Cancelled when the request deadline expires.
	pub cancel: CancellationToken,
	/// Builds deliberate failures for `?`-propagation.
	pub error: ErrorSink,
}

/// Arguments to a resources function.
pub struct ResourceArgs<'r, C> {
	/// The validated caller inputs.
	pub inputs: &'r Value,
	/// The validated handler outputs.
	pub outputs: &'r Value,
	/// The per-request context.
	pub context: &'r C,
}

/// Arguments to a channel `on_connect` handler.
pub struct ConnectArgs<C, D> {
	/// The validated connection request payload.
	pub inputs: Value,
	/// The param bindings the client is connecting under.
	pub params: ParamMap,
	/// Per-request context from the context generator.
	pub context: Arc<C>,
	/// Per-request toolbox from the derivation.
	pub derivation: Arc<D>,
	/// Builds deliberate rejections for `?`-propagation.
	pub reject: RejectSink,
}

/// Arguments to a channel `on_message` handler.
pub struct MessageArgs<D> {
	/// The validated client message payload.
	pub inputs: Value,
	/// The param bindings of the sending connection.
	pub params: ParamMap,
	/// The connection context captured at mint time.
	pub context: Value,
	/// Per-delivery toolbox from the channel derivation.
	pub derivation: Arc<D>,
	/// Broadcasts server messages on channel topics.
	pub poster: crate::channels::ChannelPoster,
	/// Builds deliberate failures for `?`-propagation.
	pub error: RejectSink,
}
