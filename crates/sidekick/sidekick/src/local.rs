//! In-process broker handle for single-process deployments.

use std::sync::Arc;

use covenant_sidekick_proto::{
	ConnectionRecord, ConnectionToken, ParamMap, Sidekick, SidekickError,
};
use covenant_wire::Value;

use crate::core::SidekickCore;

/// A [`Sidekick`] backed by a broker core in the same process.
///
/// The covenant server holds one of these instead of a TCP link; tests and
/// embedded deployments skip the daemon entirely. The server itself must
/// still be installed as the core's delegate (`core.set_delegate`) once
/// built, or client sends have nowhere to go.
#[derive(Clone)]
pub struct LocalSidekick {
	core: Arc<SidekickCore>,
}

impl LocalSidekick {
	/// Wraps a broker core.
	pub fn new(core: Arc<SidekickCore>) -> Self {
		Self { core }
	}

	/// The underlying broker core.
	pub fn core(&self) -> &Arc<SidekickCore> {
		&self.core
	}
}

impl Sidekick for LocalSidekick {
	fn add_connection(&self, record: ConnectionRecord) -> Result<(), SidekickError> {
		self.core.add_connection(record)
	}

	fn remove_connection(&self, token: &ConnectionToken) -> Result<(), SidekickError> {
		self.core.remove_connection(token);
		Ok(())
	}

	fn update_resources(&self, resources: &[String]) -> Result<(), SidekickError> {
		self.core.update_resources(resources);
		Ok(())
	}

	fn post_server_message(
		&self,
		channel: &str,
		params: &ParamMap,
		data: &Value,
	) -> Result<(), SidekickError> {
		self.core.post_server_message(channel, params, data);
		Ok(())
	}
}
