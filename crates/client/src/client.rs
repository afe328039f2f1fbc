//! The typed procedure call surface.

use std::sync::Arc;

use async_trait::async_trait;
use covenant_contract::{Covenant, ProcedureKind};
use covenant_wire::Value;
use thiserror::Error;

use crate::listener::ListenerCore;

/// A successful call: data plus the resources the procedure touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOk {
	/// The response data, already validated against the output schema.
	pub data: Value,
	/// Resources the caller is expected to invalidate (mutations).
	pub resources: Vec<String>,
}

/// A failed call. Remote errors never throw; they land here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct CallError {
	/// HTTP-style status code.
	pub code: u16,
	/// Error message from the server, or a synthetic client-side message.
	pub message: String,
}

/// Carrier of procedure requests; HTTP and in-process adapters implement
/// this.
#[async_trait]
pub trait ProcedureTransport: Send + Sync {
	/// Performs one request/response exchange.
	async fn call(&self, procedure: &str, inputs: Value) -> Result<CallOk, CallError>;
}

/// Client-side covenant surface.
///
/// Validates every response against the covenant's output schema before
/// the caller sees it, and feeds mutation resources into the listener
/// core so local refetches fire.
pub struct CovenantClient {
	covenant: Covenant,
	transport: Arc<dyn ProcedureTransport>,
	listeners: Arc<ListenerCore>,
}

impl CovenantClient {
	/// Builds a client over a transport and listener core.
	pub fn new(
		covenant: Covenant,
		transport: Arc<dyn ProcedureTransport>,
		listeners: Arc<ListenerCore>,
	) -> Self {
		Self {
			covenant,
			transport,
			listeners,
		}
	}

	/// The listener core driving refetches.
	pub fn listeners(&self) -> &Arc<ListenerCore> {
		&self.listeners
	}

	/// Calls a procedure.
	///
	/// On a successful mutation, every local listener intersecting the
	/// returned resources is refetched exactly once.
	pub async fn call(&self, procedure: &str, inputs: Value) -> Result<CallOk, CallError> {
		let Some(def) = self.covenant.procedure(procedure) else {
			return Err(CallError {
				code: 404,
				message: format!("unknown procedure {procedure:?}"),
			});
		};

		let ok = self.transport.call(procedure, inputs).await?;

		// The server's word is not enough: malformed data must never
		// reach the caller.
		if let Err(issues) = def.output.validate(&ok.data) {
			tracing::warn!(procedure, %issues, "response violated the output schema");
			return Err(CallError {
				code: 500,
				message: format!(
					"response for {procedure:?} violated the output schema: {issues}"
				),
			});
		}

		if def.kind == ProcedureKind::Mutation {
			self.listeners.after_mutation(&ok.resources);
		}

		Ok(ok)
	}
}
