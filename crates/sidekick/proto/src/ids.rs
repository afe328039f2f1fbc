//! Identifier newtypes used across the broker protocol.

use std::fmt;

/// Unique identifier for broker sessions (client connections).
///
/// Allocated by the broker when a client connects; never reused within one
/// broker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "s{}", self.0)
	}
}

/// Opaque token identifying one approved channel connection.
///
/// Minted by the covenant server when `onConnect` succeeds and presented by
/// the client to the broker. The broker never inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionToken(String);

impl ConnectionToken {
	/// Wraps an already-minted token string.
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	/// The token's wire representation.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for ConnectionToken {
	fn from(token: String) -> Self {
		Self(token)
	}
}

/// Correlation id for a `Deliver` sent over the server link.
///
/// The broker allocates one per delegated channel send and matches the
/// server's `DeliverReply` against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryId(pub u64);
