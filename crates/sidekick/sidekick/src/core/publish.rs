//! Publishing: resource updates and channel message fan-out.

use covenant_sidekick_proto::{ParamMap, ServerFrame, SessionId, TopicKey};
use covenant_wire::Value;

use super::SidekickCore;

impl SidekickCore {
	/// Publishes `updated` on each resource topic.
	pub fn update_resources(&self, resources: &[String]) {
		for resource in resources {
			self.publish(
				&TopicKey::resource(resource.clone()),
				ServerFrame::Updated {
					resource: resource.clone(),
				},
			);
		}
	}

	/// Publishes a server message on a channel topic.
	pub fn post_server_message(&self, channel: &str, params: &ParamMap, data: &Value) {
		self.publish(
			&TopicKey::channel(channel.to_string(), params.clone()),
			ServerFrame::Message {
				channel: channel.to_string(),
				params: params.clone(),
				data: data.clone(),
			},
		);
	}

	/// Fans one frame out to every member of a topic.
	///
	/// Enqueueing happens under the state lock (it never blocks); failed
	/// sessions are cleaned up after release. Each session's queue
	/// preserves enqueue order, which is all the cross-topic ordering the
	/// protocol promises.
	pub(crate) fn publish(&self, topic: &TopicKey, frame: ServerFrame) {
		let mut failed: Vec<SessionId> = Vec::new();
		{
			let state = self.state.lock().unwrap();
			let Some(members) = state.topics.get(topic) else {
				return;
			};
			for session_id in members {
				let Some(session) = state.sessions.get(session_id) else {
					continue;
				};
				if session.sink.try_send(frame.clone()).is_err() {
					failed.push(*session_id);
				}
			}
		}

		if !failed.is_empty() {
			tracing::warn!(%topic, count = failed.len(), "publish failed for sessions");
			self.cleanup_failed_sessions(failed);
		}
	}
}
