#![warn(missing_docs)]

//! The covenant: a declarative registry of typed procedures and channels.
//!
//! A covenant is declared once, shared by the server and every client, and
//! immutable for the life of the process. Declaration is where programmer
//! errors (duplicate names, duplicate channel params) are caught.

use std::collections::HashMap;
use std::sync::Arc;

use covenant_schema::Schema;
use thiserror::Error;

/// Whether a procedure reads or writes.
///
/// The distinction is semantic: both kinds dispatch identically, but a
/// mutation's returned resources are what callers are expected to
/// invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
	/// Read-only by convention.
	Query,
	/// Expected to change state and surface resources.
	Mutation,
}

/// Declaration of one procedure.
#[derive(Debug, Clone)]
pub struct ProcedureDef {
	/// Unique procedure name.
	pub name: String,
	/// Query or mutation.
	pub kind: ProcedureKind,
	/// Schema for the caller-supplied inputs.
	pub input: Schema,
	/// Schema for the handler-produced outputs.
	pub output: Schema,
}

impl ProcedureDef {
	/// Declares a query.
	pub fn query(name: impl Into<String>, input: Schema, output: Schema) -> Self {
		Self {
			name: name.into(),
			kind: ProcedureKind::Query,
			input,
			output,
		}
	}

	/// Declares a mutation.
	pub fn mutation(name: impl Into<String>, input: Schema, output: Schema) -> Self {
		Self {
			name: name.into(),
			kind: ProcedureKind::Mutation,
			input,
			output,
		}
	}
}

/// Declaration of one channel.
#[derive(Debug, Clone)]
pub struct ChannelDef {
	/// Unique channel name.
	pub name: String,
	/// Ordered param names scoping instances of this channel.
	pub params: Vec<String>,
	/// Schema for the connect-time request payload.
	pub connection_request: Schema,
	/// Schema for the server-authored connection context.
	pub connection_context: Schema,
	/// Schema for messages clients send into the channel.
	pub client_message: Schema,
	/// Schema for messages the server broadcasts to subscribers.
	pub server_message: Schema,
}

/// A programmer error in a covenant declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
	/// Two procedures share a name.
	#[error("duplicate procedure {0:?}")]
	DuplicateProcedure(String),
	/// Two channels share a name.
	#[error("duplicate channel {0:?}")]
	DuplicateChannel(String),
	/// A channel declares the same param twice.
	#[error("channel {channel:?} declares duplicate param {param:?}")]
	DuplicateParam {
		/// The offending channel.
		channel: String,
		/// The repeated param name.
		param: String,
	},
}

#[derive(Debug)]
struct Inner {
	procedures: HashMap<String, ProcedureDef>,
	channels: HashMap<String, ChannelDef>,
}

/// The shared contract. Cheap to clone; descriptors live for the process
/// lifetime.
#[derive(Debug, Clone)]
pub struct Covenant {
	inner: Arc<Inner>,
}

impl Covenant {
	/// Declares a covenant, rejecting duplicate names at once.
	pub fn declare(
		procedures: impl IntoIterator<Item = ProcedureDef>,
		channels: impl IntoIterator<Item = ChannelDef>,
	) -> Result<Self, ContractError> {
		let mut procedure_map = HashMap::new();
		for procedure in procedures {
			if procedure_map.contains_key(&procedure.name) {
				return Err(ContractError::DuplicateProcedure(procedure.name));
			}
			procedure_map.insert(procedure.name.clone(), procedure);
		}

		let mut channel_map = HashMap::new();
		for channel in channels {
			if channel_map.contains_key(&channel.name) {
				return Err(ContractError::DuplicateChannel(channel.name));
			}
			for (i, param) in channel.params.iter().enumerate() {
				if channel.params[..i].contains(param) {
					return Err(ContractError::DuplicateParam {
						channel: channel.name.clone(),
						param: param.clone(),
					});
				}
			}
			channel_map.insert(channel.name.clone(), channel);
		}

		Ok(Self {
			inner: Arc::new(Inner {
				procedures: procedure_map,
				channels: channel_map,
			}),
		})
	}

	/// Looks up a procedure by name.
	pub fn procedure(&self, name: &str) -> Option<&ProcedureDef> {
		self.inner.procedures.get(name)
	}

	/// Looks up a channel by name.
	pub fn channel(&self, name: &str) -> Option<&ChannelDef> {
		self.inner.channels.get(name)
	}

	/// Iterates all declared procedures.
	pub fn procedures(&self) -> impl Iterator<Item = &ProcedureDef> {
		self.inner.procedures.values()
	}

	/// Iterates all declared channels.
	pub fn channels(&self) -> impl Iterator<Item = &ChannelDef> {
		self.inner.channels.values()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn chatroom() -> ChannelDef {
		ChannelDef {
			name: "chatroom".to_string(),
			params: vec!["chatChannel".to_string()],
			connection_request: Schema::object([("name", Schema::String)]),
			connection_context: Schema::object([("connectionId", Schema::String)]),
			client_message: Schema::object([("message", Schema::String)]),
			server_message: Schema::object([
				("senderId", Schema::String),
				("message", Schema::String),
			]),
		}
	}

	#[test]
	fn declares_and_looks_up() {
		let covenant = Covenant::declare(
			[ProcedureDef::query(
				"helloWorld",
				Schema::String,
				Schema::String,
			)],
			[chatroom()],
		)
		.unwrap();

		assert_eq!(
			covenant.procedure("helloWorld").map(|p| p.kind),
			Some(ProcedureKind::Query)
		);
		assert!(covenant.procedure("nope").is_none());
		assert_eq!(
			covenant.channel("chatroom").map(|c| c.params.len()),
			Some(1)
		);
	}

	#[test]
	fn rejects_duplicate_procedures() {
		let result = Covenant::declare(
			[
				ProcedureDef::query("a", Schema::Any, Schema::Any),
				ProcedureDef::mutation("a", Schema::Any, Schema::Any),
			],
			[],
		);
		assert_eq!(
			result.unwrap_err(),
			ContractError::DuplicateProcedure("a".to_string())
		);
	}

	#[test]
	fn rejects_duplicate_channel_params() {
		let mut channel = chatroom();
		channel.params = vec!["room".to_string(), "room".to_string()];
		let result = Covenant::declare([], [channel]);
		assert!(matches!(result, Err(ContractError::DuplicateParam { .. })));
	}
}
