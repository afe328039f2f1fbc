//! Topic membership: resource listening and channel subscription.

use covenant_sidekick_proto::{
	ChannelError, ClientFrame, ConnectionToken, ServerFrame, SessionId, TopicKey,
};

use super::{BrokerState, SidekickCore};

impl BrokerState {
	fn join(&mut self, session_id: SessionId, topic: TopicKey) {
		if let Some(session) = self.sessions.get_mut(&session_id) {
			session.joined.insert(topic.clone());
			self.topics.entry(topic).or_default().insert(session_id);
		}
	}

	fn leave(&mut self, session_id: SessionId, topic: &TopicKey) {
		if let Some(session) = self.sessions.get_mut(&session_id) {
			session.joined.remove(topic);
		}
		if let Some(members) = self.topics.get_mut(topic) {
			members.remove(&session_id);
			if members.is_empty() {
				self.topics.remove(topic);
			}
		}
	}

	fn enqueue(&self, session_id: SessionId, frame: ServerFrame) -> bool {
		match self.sessions.get(&session_id) {
			Some(session) => session.sink.try_send(frame).is_ok(),
			None => false,
		}
	}
}

impl SidekickCore {
	/// Joins the session to each resource topic and acks with
	/// `listening`. Idempotent.
	pub fn listen(&self, session_id: SessionId, resources: Vec<String>) {
		let mut failed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			for resource in &resources {
				state.join(session_id, TopicKey::resource(resource.clone()));
			}
			let ack = ServerFrame::Listening { resources };
			if !state.enqueue(session_id, ack) {
				failed.push(session_id);
			}
		}
		self.cleanup_failed_sessions(failed);
	}

	/// Leaves each resource topic and acks with `unlistening`.
	/// Idempotent.
	pub fn unlisten(&self, session_id: SessionId, resources: Vec<String>) {
		let mut failed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			for resource in &resources {
				state.leave(session_id, &TopicKey::resource(resource.clone()));
			}
			let ack = ServerFrame::Unlistening { resources };
			if !state.enqueue(session_id, ack) {
				failed.push(session_id);
			}
		}
		self.cleanup_failed_sessions(failed);
	}

	/// Resolves the token and joins the session to its channel topic.
	///
	/// Tokens carry their own identity: any session presenting a valid
	/// token may subscribe, not just the one that connected.
	pub fn subscribe(&self, session_id: SessionId, token: &ConnectionToken) {
		let mut failed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			let resolved = state
				.tokens
				.get(token)
				.map(|record| (record.channel.clone(), record.params.clone()));
			let frame = match resolved {
				Some((channel, params)) => {
					state.join(session_id, TopicKey::channel(channel.clone(), params.clone()));
					ServerFrame::Subscribed { channel, params }
				}
				None => ServerFrame::Error(ChannelError::sidekick("unknown token")),
			};
			if !state.enqueue(session_id, frame) {
				failed.push(session_id);
			}
		}
		self.cleanup_failed_sessions(failed);
	}

	/// Resolves the token and leaves its channel topic.
	pub fn unsubscribe(&self, session_id: SessionId, token: &ConnectionToken) {
		let mut failed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			let resolved = state
				.tokens
				.get(token)
				.map(|record| (record.channel.clone(), record.params.clone()));
			let frame = match resolved {
				Some((channel, params)) => {
					state.leave(session_id, &TopicKey::channel(channel.clone(), params.clone()));
					ServerFrame::Unsubscribed { channel, params }
				}
				None => ServerFrame::Error(ChannelError::sidekick("unknown token")),
			};
			if !state.enqueue(session_id, frame) {
				failed.push(session_id);
			}
		}
		self.cleanup_failed_sessions(failed);
	}

	/// Applies one inbound client frame other than `send`.
	///
	/// `send` involves async delegation and is handled by
	/// [`SidekickCore::handle_send`].
	pub fn handle_sync_frame(&self, session_id: SessionId, frame: ClientFrame) {
		match frame {
			ClientFrame::Listen { resources } => self.listen(session_id, resources),
			ClientFrame::Unlisten { resources } => self.unlisten(session_id, resources),
			ClientFrame::Subscribe { token } => self.subscribe(session_id, &token),
			ClientFrame::Unsubscribe { token } => self.unsubscribe(session_id, &token),
			ClientFrame::Send { .. } => {
				debug_assert!(false, "send frames take the delegation path");
			}
		}
	}
}
