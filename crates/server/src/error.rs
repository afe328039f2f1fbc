//! Failure types for dispatch and channel handling.

use std::fmt;

use covenant_schema::Issues;
use covenant_sidekick_proto::Fault;
use thiserror::Error;

/// Deliberate early exit from a procedure handler, context generator, or
/// derivation.
///
/// Constructed through [`ErrorSink::raise`]; the dispatcher converts it to
/// the failure response shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct Halt {
	/// HTTP-style status code carried to the caller.
	pub code: u16,
	/// Message carried to the caller.
	pub message: String,
}

impl Halt {
	/// An authorization failure (401).
	pub fn unauthorized(message: impl Into<String>) -> Self {
		Self {
			code: 401,
			message: message.into(),
		}
	}
}

/// The `error(message, code)` callable handed to procedure handlers.
///
/// Raising produces a [`Halt`] for `?`-propagation; only the dispatcher
/// observes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorSink;

impl ErrorSink {
	/// Builds the early-exit record for a deliberate handler failure.
	pub fn raise(&self, message: impl Into<String>, code: u16) -> Halt {
		Halt {
			code,
			message: message.into(),
		}
	}
}

/// Deliberate early exit from a channel handler, attributed to a fault
/// domain instead of a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({} fault)", .fault.as_wire_str())]
pub struct Reject {
	/// Who is at fault.
	pub fault: Fault,
	/// Message carried to the caller.
	pub message: String,
}

/// The `reject(message, fault)` / `error(message, fault)` callable handed
/// to channel handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectSink;

impl RejectSink {
	/// Builds the early-exit record for a deliberate channel failure.
	pub fn raise(&self, message: impl Into<String>, fault: Fault) -> Reject {
		Reject {
			fault,
			message: message.into(),
		}
	}
}

/// The failure half of a procedure result. Carries only error info; data
/// and resources are never present on failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct ProcedureFailure {
	/// HTTP-style status code.
	pub code: u16,
	/// Sanitized message.
	pub message: String,
}

impl ProcedureFailure {
	/// Unknown procedure (404).
	pub fn not_found(name: &str) -> Self {
		Self {
			code: 404,
			message: format!("unknown procedure {name:?}"),
		}
	}

	/// Inputs failed the input schema (400).
	pub fn bad_input(name: &str, issues: &Issues) -> Self {
		Self {
			code: 400,
			message: format!("parsing procedure inputs for {name:?} failed: {issues}"),
		}
	}

	/// Outputs failed the output schema: the server violated its own
	/// contract (500).
	pub fn output_contract(name: &str, issues: &Issues) -> Self {
		Self {
			code: 500,
			message: format!("procedure {name:?} violated its output contract: {issues}"),
		}
	}

	/// The deadline expired before the pipeline finished (504).
	pub fn deadline_exceeded(name: &str) -> Self {
		Self {
			code: 504,
			message: format!("procedure {name:?} deadline exceeded"),
		}
	}

	/// An unexpected fault, sanitized (500).
	pub fn internal() -> Self {
		Self {
			code: 500,
			message: "internal server error".to_string(),
		}
	}
}

impl From<Halt> for ProcedureFailure {
	fn from(halt: Halt) -> Self {
		Self {
			code: halt.code,
			message: halt.message,
		}
	}
}

/// Missing implementations found by `assert_all_defined`. Fatal at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionError {
	/// Names of declared procedures with no handler.
	pub procedures: Vec<String>,
	/// Names of declared channels with no handler set.
	pub channels: Vec<String>,
	/// A channel derivation is declared nowhere but channels exist.
	pub missing_channel_derivation: bool,
}

impl fmt::Display for DefinitionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("covenant implementation incomplete:")?;
		for name in &self.procedures {
			write!(f, " procedure {name:?} has no handler;")?;
		}
		for name in &self.channels {
			write!(f, " channel {name:?} has no handlers;")?;
		}
		if self.missing_channel_derivation {
			f.write_str(" no channel derivation is configured;")?;
		}
		Ok(())
	}
}

impl std::error::Error for DefinitionError {}
