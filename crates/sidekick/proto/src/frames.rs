//! Frame definitions for the two broker surfaces.
//!
//! The session surface carries [`ClientFrame`]s in and [`ServerFrame`]s
//! out. The server link carries [`LinkFrame`]s in and [`BrokerFrame`]s out.

use covenant_wire::Value;

use crate::{ConnectionToken, DeliveryId, ParamMap};

/// Attribution of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
	/// The caller did something wrong (bad params, mismatched send).
	Client,
	/// A covenant handler failed.
	Server,
	/// The broker itself rejected or dropped the operation.
	Sidekick,
}

impl Fault {
	/// The wire name of this fault.
	pub fn as_wire_str(self) -> &'static str {
		match self {
			Self::Client => "client",
			Self::Server => "server",
			Self::Sidekick => "sidekick",
		}
	}

	/// Parses a wire fault name.
	pub fn from_wire_str(s: &str) -> Option<Self> {
		match s {
			"client" => Some(Self::Client),
			"server" => Some(Self::Server),
			"sidekick" => Some(Self::Sidekick),
			_ => None,
		}
	}
}

/// A structured channel failure.
///
/// `channel` and `params` are optional because some failures (for example
/// an unknown token) cannot be attributed to a channel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelError {
	/// The channel the failure relates to, when known.
	pub channel: Option<String>,
	/// The param bindings the failure relates to, when known.
	pub params: Option<ParamMap>,
	/// Who is at fault.
	pub fault: Fault,
	/// Human-readable description.
	pub message: String,
}

impl ChannelError {
	/// A broker-attributed failure with no channel attribution.
	pub fn sidekick(message: impl Into<String>) -> Self {
		Self {
			channel: None,
			params: None,
			fault: Fault::Sidekick,
			message: message.into(),
		}
	}

	/// A failure attributed to a specific channel instance.
	pub fn scoped(
		channel: impl Into<String>,
		params: ParamMap,
		fault: Fault,
		message: impl Into<String>,
	) -> Self {
		Self {
			channel: Some(channel.into()),
			params: Some(params),
			fault,
			message: message.into(),
		}
	}
}

impl std::fmt::Display for ChannelError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.channel {
			Some(channel) => write!(
				f,
				"channel {channel} ({} fault): {}",
				self.fault.as_wire_str(),
				self.message
			),
			None => write!(f, "({} fault): {}", self.fault.as_wire_str(), self.message),
		}
	}
}

impl std::error::Error for ChannelError {}

/// Inbound frames on a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
	/// Join the resource topic for each named resource.
	Listen {
		/// Resource names to start listening on.
		resources: Vec<String>,
	},
	/// Leave the resource topic for each named resource. Idempotent.
	Unlisten {
		/// Resource names to stop listening on.
		resources: Vec<String>,
	},
	/// Join the channel topic identified by a minted token.
	Subscribe {
		/// Token obtained from the covenant server at connect time.
		token: ConnectionToken,
	},
	/// Leave the channel topic identified by the token.
	Unsubscribe {
		/// Token obtained from the covenant server at connect time.
		token: ConnectionToken,
	},
	/// Send a message into a channel. Authorized by token identity; the
	/// sending session need not be subscribed.
	Send {
		/// Token authorizing the send.
		token: ConnectionToken,
		/// Channel name; must match the token's connection record.
		channel: String,
		/// Param bindings; must match the token's connection record.
		params: ParamMap,
		/// The client message payload.
		data: Value,
	},
}

/// Outbound frames on a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
	/// Acknowledges a `Listen`, echoing the resources joined.
	Listening {
		/// Resources now listened on.
		resources: Vec<String>,
	},
	/// Acknowledges an `Unlisten`, echoing the resources left.
	Unlistening {
		/// Resources no longer listened on.
		resources: Vec<String>,
	},
	/// Acknowledges a `Subscribe` with the resolved channel instance.
	Subscribed {
		/// The channel joined.
		channel: String,
		/// The param bindings joined.
		params: ParamMap,
	},
	/// Acknowledges an `Unsubscribe`.
	Unsubscribed {
		/// The channel left.
		channel: String,
		/// The param bindings left.
		params: ParamMap,
	},
	/// A resource was updated; listeners should refetch.
	Updated {
		/// The resource that changed.
		resource: String,
	},
	/// A server message published on a channel topic.
	Message {
		/// The channel the message was posted on.
		channel: String,
		/// The param bindings the message was posted under.
		params: ParamMap,
		/// The server message payload.
		data: Value,
	},
	/// A structured failure. The session stays open.
	Error(ChannelError),
}

/// Frames from the covenant server to the broker over the server link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
	/// Authenticates the link. Must be the first frame.
	Hello {
		/// Shared secret presented as a bearer credential.
		secret: String,
	},
	/// Installs one connection record. Idempotent on identical records.
	AddConnection {
		/// The minted token.
		token: ConnectionToken,
		/// Channel the token binds to.
		channel: String,
		/// Param bindings the token binds to.
		params: ParamMap,
		/// Server-chosen connection context, carried opaquely.
		context: Value,
	},
	/// Removes a connection record and any channel-topic joins made
	/// through it.
	RemoveConnection {
		/// The token to forget.
		token: ConnectionToken,
	},
	/// Publishes `updated` on each resource topic.
	Update {
		/// Resources whose listeners should refetch.
		resources: Vec<String>,
	},
	/// Publishes a server message on a channel topic.
	PostMessage {
		/// Target channel.
		channel: String,
		/// Target param bindings.
		params: ParamMap,
		/// The server message payload.
		data: Value,
	},
	/// Completes a delegated `Deliver`.
	DeliverReply {
		/// Correlates with the broker's `Deliver`.
		delivery: DeliveryId,
		/// The channel error to return to the sender, if the handler
		/// failed.
		error: Option<ChannelError>,
	},
}

/// Frames from the broker to the covenant server over the server link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerFrame {
	/// The link is authenticated and usable.
	HelloAck,
	/// Authentication failed; the broker closes the link after this.
	HelloReject,
	/// Delegates a client-sent channel message to the server.
	Deliver {
		/// Correlation id for the reply.
		delivery: DeliveryId,
		/// Channel the client sent into.
		channel: String,
		/// Param bindings of the connection record.
		params: ParamMap,
		/// The client message payload.
		data: Value,
		/// The connection context captured at mint time.
		context: Value,
	},
}
