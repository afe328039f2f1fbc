//! The server-facing broker surface, as traits both sides implement against.
//!
//! The covenant server pushes state in through [`Sidekick`] and receives
//! delegated channel sends through [`ChannelDelegate`]. The broker crate
//! provides the in-process implementation; the server crate provides the
//! TCP server-link implementation.

use async_trait::async_trait;
use covenant_wire::Value;
use thiserror::Error;

use crate::{ChannelError, ConnectionToken, ParamMap};

/// One approved channel connection, as held by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
	/// The minted token.
	pub token: ConnectionToken,
	/// Channel the token binds to.
	pub channel: String,
	/// Param bindings the token binds to.
	pub params: ParamMap,
	/// Server-chosen context, validated at mint time and carried opaquely.
	pub context: Value,
}

/// Failure of a server-facing broker operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SidekickError {
	/// The broker cannot be reached (link down, queue closed).
	#[error("sidekick unavailable: {0}")]
	Unavailable(String),
	/// A token is already bound to a different connection record.
	#[error("token already bound to a different connection")]
	TokenMismatch,
}

/// Server-facing broker operations.
///
/// Implementations are synchronous enqueue-style calls: they hand state to
/// the broker (directly or via an outbound link queue) without waiting for
/// fan-out to complete.
pub trait Sidekick: Send + Sync {
	/// Installs one connection record. Idempotent on identical records.
	fn add_connection(&self, record: ConnectionRecord) -> Result<(), SidekickError>;

	/// Removes a connection record and the channel-topic joins made
	/// through it.
	fn remove_connection(&self, token: &ConnectionToken) -> Result<(), SidekickError>;

	/// Publishes `updated` on each resource topic.
	fn update_resources(&self, resources: &[String]) -> Result<(), SidekickError>;

	/// Publishes a server message on a channel topic.
	fn post_server_message(
		&self,
		channel: &str,
		params: &ParamMap,
		data: &Value,
	) -> Result<(), SidekickError>;
}

/// Delivery of client-sent channel messages into the covenant server.
///
/// Set at broker startup. A returned error goes back to the offending
/// sender only; other subscribers are unaffected.
#[async_trait]
pub trait ChannelDelegate: Send + Sync {
	/// Processes one client message sent into a channel.
	async fn deliver(
		&self,
		channel: &str,
		params: &ParamMap,
		data: Value,
		context: Value,
	) -> Result<(), ChannelError>;
}
