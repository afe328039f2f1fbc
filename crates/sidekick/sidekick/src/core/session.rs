//! Session lifecycle management.

use covenant_sidekick_proto::{ChannelError, ServerFrame, SessionId};
use tokio::sync::mpsc;

use super::{SessionEntry, SidekickCore};

impl SidekickCore {
	/// Registers a new client session.
	///
	/// Returns the allocated id and the receiving end of the session's
	/// bounded outbound queue; the transport drains it into the socket.
	pub fn register_session(&self) -> (SessionId, mpsc::Receiver<ServerFrame>) {
		let session_id = self.allocate_session_id();
		let (sink, rx) = mpsc::channel(self.queue_capacity());

		let mut state = self.state.lock().unwrap();
		state.sessions.insert(
			session_id,
			SessionEntry {
				sink,
				joined: std::collections::HashSet::new(),
			},
		);
		drop(state);

		tracing::debug!(%session_id, "session registered");
		(session_id, rx)
	}

	/// Unregisters a session, removing it from every topic before its
	/// memory is released.
	pub fn unregister_session(&self, session_id: SessionId) {
		let mut state = self.state.lock().unwrap();
		let Some(session) = state.sessions.remove(&session_id) else {
			return;
		};
		for topic in &session.joined {
			if let Some(members) = state.topics.get_mut(topic) {
				members.remove(&session_id);
				if members.is_empty() {
					state.topics.remove(topic);
				}
			}
		}
		drop(state);

		tracing::debug!(%session_id, "session unregistered");
	}

	/// Enqueues one frame for a session. Returns false when the session
	/// is gone or its queue is full.
	pub fn send_to_session(&self, session_id: SessionId, frame: ServerFrame) -> bool {
		let state = self.state.lock().unwrap();
		match state.sessions.get(&session_id) {
			Some(session) => session.sink.try_send(frame).is_ok(),
			None => false,
		}
	}

	/// Drops a session that overflowed its queue or closed its transport:
	/// a best-effort final error, then authoritative cleanup.
	pub(crate) fn drop_session(&self, session_id: SessionId, reason: &str) {
		tracing::warn!(%session_id, reason, "dropping session");
		let _ = self.send_to_session(
			session_id,
			ServerFrame::Error(ChannelError::sidekick(reason)),
		);
		self.unregister_session(session_id);
	}

	/// Cleans up every session whose enqueue failed during a publish.
	pub(crate) fn cleanup_failed_sessions(&self, failed: Vec<SessionId>) {
		for session_id in failed {
			self.drop_session(session_id, "outbound queue overflowed");
		}
	}
}
