#![warn(missing_docs)]

//! Covenant procedure dispatcher and channel runtime.
//!
//! # Purpose
//!
//! - Dispatch procedure calls through the full validation pipeline: input
//!   schema, per-request context and derivation, handler invocation,
//!   resource collection, output schema.
//! - Run the channel lifecycle: connection handshake with opaque tokens,
//!   server-authored context binding, inbound message routing, outbound
//!   server message publication.
//! - Talk to the Sidekick broker through the [`Sidekick`] trait, either
//!   in-process or over the authenticated TCP server link.
//!
//! # Mental model
//!
//! - A [`CovenantServer`] is built once from a covenant plus handler
//!   implementations and is immutable afterwards; `assert_all_defined`
//!   verifies completeness before traffic is accepted.
//! - Queries and mutations share one dispatch path; the distinction is
//!   semantic (mutation resources are what callers invalidate).
//! - Handlers signal deliberate failure by returning an early-exit record
//!   ([`Halt`] for procedures, [`Reject`] for channel handlers) built via
//!   the sink passed in their args. Unexpected faults (panics) are caught
//!   at the dispatch boundary and surfaced as sanitized internal errors.
//! - Per-request state (context, derivation, cancellation token) lives in
//!   one args record handed to the handler; nothing is shared between
//!   requests.
//!
//! [`Sidekick`]: covenant_sidekick_proto::Sidekick

mod args;
mod channels;
mod error;
mod link;
mod server;

pub use args::{
	ConnectArgs, Headers, MessageArgs, ProcedureArgs, RequestHandle, ResourceArgs,
};
pub use channels::ChannelPoster;
pub use error::{DefinitionError, ErrorSink, Halt, ProcedureFailure, Reject, RejectSink};
pub use link::{DelegateSlot, RemoteSidekick};
pub use server::{CovenantServer, CovenantServerBuilder, ProcedureResult, ProcedureSuccess};
