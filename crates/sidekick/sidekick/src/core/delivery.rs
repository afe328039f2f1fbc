//! Delegation of client-sent channel messages to the covenant server.

use covenant_sidekick_proto::{
	ChannelError, ConnectionToken, Fault, ParamMap, ServerFrame, SessionId,
};
use covenant_wire::Value;

use super::SidekickCore;

impl SidekickCore {
	/// Handles a `send` from a client session.
	///
	/// Resolves the token, checks the supplied (channel, params) against
	/// the connection record, and delegates to the server callback. Any
	/// failure is reported to the sending session only; subscribers never
	/// see another client's failed send.
	pub async fn handle_send(
		&self,
		session_id: SessionId,
		token: &ConnectionToken,
		channel: &str,
		params: &ParamMap,
		data: Value,
	) {
		let Some(record) = self.resolve_token(token) else {
			let _ = self.send_to_session(
				session_id,
				ServerFrame::Error(ChannelError::sidekick("unknown token")),
			);
			return;
		};

		if record.channel != channel || record.params != *params {
			let _ = self.send_to_session(
				session_id,
				ServerFrame::Error(ChannelError::scoped(
					channel,
					params.clone(),
					Fault::Client,
					"send does not match the token's connection",
				)),
			);
			return;
		}

		let Some(delegate) = self.current_delegate() else {
			let _ = self.send_to_session(
				session_id,
				ServerFrame::Error(ChannelError::sidekick("no covenant server attached")),
			);
			return;
		};

		// The lock is not held here; delegation may run handlers.
		if let Err(error) = delegate
			.deliver(&record.channel, &record.params, data, record.context)
			.await
		{
			let _ = self.send_to_session(session_id, ServerFrame::Error(error));
		}
	}
}
