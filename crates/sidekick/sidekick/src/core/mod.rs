//! Broker core: topic registry, session bookkeeping, and fan-out.
//!
//! # Purpose
//!
//! - Track per-client subscriptions for resource topics and channel/params
//!   topics, and publish updates to every subscriber.
//! - Resolve connection tokens to their records and delegate client-sent
//!   channel messages back to the covenant server.
//! - Keep dead and slow sessions from wedging the rest of the broker.
//!
//! # Mental model
//!
//! - [`SidekickCore`] owns one mutex over all broker state (token table,
//!   sessions, topics). The lock is held only to mutate maps and to
//!   enqueue frames onto per-session queues; enqueueing never blocks, and
//!   socket I/O happens in per-session writer tasks outside the lock.
//! - Each session owns a bounded outbound queue. The queue is the
//!   serializer: frames enqueued for a session are delivered in enqueue
//!   order, so an ack enqueued under the same lock span as a membership
//!   change is observed before any later topic traffic.
//! - Tokens are minted by the server, not the broker. The broker only
//!   resolves them; an unknown token is always the client's problem to
//!   hear about and never tears the session down.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints |
//! |---|---|---|
//! | [`SidekickCore`] | Authoritative broker state | single mutex over all three maps |
//! | `SessionEntry` | One connected client | owns the bounded sink and its joined-topic set |
//! | [`ConnectionRecord`] | One minted token binding | immutable once installed; idempotent re-adds |
//! | [`TopicKey`] | Routing key | resource names and (channel, params) pairs are disjoint |
//!
//! # Invariants
//!
//! 1. A session's `joined` set and the topic map MUST stay mirror images;
//!    every mutation updates both under one lock span.
//!    - Failure symptom: unregister leaks topic members and publishes go
//!      to dead sessions forever.
//! 2. A `subscribe`/`unsubscribe` ack MUST be enqueued under the same lock
//!    span that mutates membership, so it precedes post-subscription topic
//!    messages on that session.
//!    - Failure symptom: clients observe topic traffic before the ack and
//!      misattribute it to an earlier subscription.
//! 3. Publishing MUST NOT hold the lock while handling failed sessions;
//!    failures are collected and cleaned up after release.
//!    - Failure symptom: deadlock between cleanup and concurrent publish.
//! 4. A full or closed session queue MUST drop the whole session (with a
//!    best-effort final error), never stall the publisher.
//!    - Failure symptom: one slow consumer backpressures every topic it
//!      shares with healthy sessions.

mod delivery;
mod publish;
mod session;
mod topics;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use covenant_sidekick_proto::{
	ChannelDelegate, ConnectionRecord, ConnectionToken, ServerFrame, SessionId, SidekickError,
	TopicKey,
};
use tokio::sync::mpsc;

/// Configuration for the broker core.
#[derive(Debug, Clone)]
pub struct SidekickConfig {
	/// High-water mark for each session's outbound queue. A session whose
	/// queue fills up is dropped.
	pub session_queue_capacity: usize,
}

impl Default for SidekickConfig {
	fn default() -> Self {
		Self {
			session_queue_capacity: 256,
		}
	}
}

/// Authoritative broker state.
pub struct SidekickCore {
	state: Mutex<BrokerState>,
	next_session_id: AtomicU64,
	delegate: RwLock<Option<Arc<dyn ChannelDelegate>>>,
	config: SidekickConfig,
}

impl std::fmt::Debug for SidekickCore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SidekickCore")
			.field("state", &self.state)
			.field("next_session_id", &self.next_session_id)
			.field("delegate", &self.delegate.read().map(|d| d.is_some()))
			.field("config", &self.config)
			.finish()
	}
}

#[derive(Debug, Default)]
struct BrokerState {
	/// Minted connection records by token.
	tokens: HashMap<ConnectionToken, ConnectionRecord>,
	/// Connected client sessions.
	sessions: HashMap<SessionId, SessionEntry>,
	/// Topic membership, mirrored by each session's `joined` set.
	topics: HashMap<TopicKey, HashSet<SessionId>>,
}

#[derive(Debug)]
struct SessionEntry {
	sink: mpsc::Sender<ServerFrame>,
	joined: HashSet<TopicKey>,
}

impl SidekickCore {
	/// Creates a broker core with default configuration.
	pub fn new() -> Arc<Self> {
		Self::with_config(SidekickConfig::default())
	}

	/// Creates a broker core with custom configuration.
	pub fn with_config(config: SidekickConfig) -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(BrokerState::default()),
			next_session_id: AtomicU64::new(0),
			delegate: RwLock::new(None),
			config,
		})
	}

	/// Installs the server callback that receives delegated channel sends.
	/// Set at startup (in-process) or when a server link authenticates.
	pub fn set_delegate(&self, delegate: Arc<dyn ChannelDelegate>) {
		*self.delegate.write().unwrap() = Some(delegate);
	}

	/// Clears the server callback, if it is still the given one.
	///
	/// Used when a server link drops, without clobbering a replacement
	/// link that may have authenticated in the meantime.
	pub fn clear_delegate(&self, expected: &Arc<dyn ChannelDelegate>) {
		let mut delegate = self.delegate.write().unwrap();
		if delegate
			.as_ref()
			.is_some_and(|current| Arc::ptr_eq(current, expected))
		{
			*delegate = None;
		}
	}

	pub(crate) fn current_delegate(&self) -> Option<Arc<dyn ChannelDelegate>> {
		self.delegate.read().unwrap().clone()
	}

	/// Installs one connection record.
	///
	/// Idempotent on identical records; a token collision with a
	/// different record is rejected.
	pub fn add_connection(&self, record: ConnectionRecord) -> Result<(), SidekickError> {
		let mut state = self.state.lock().unwrap();
		match state.tokens.get(&record.token) {
			Some(existing) if *existing == record => Ok(()),
			Some(_) => Err(SidekickError::TokenMismatch),
			None => {
				tracing::debug!(channel = %record.channel, "connection record installed");
				state.tokens.insert(record.token.clone(), record);
				Ok(())
			}
		}
	}

	/// Removes a connection record.
	///
	/// If no other record covers the same channel topic, current members
	/// are evicted with an `unsubscribed` ack so the "subscription implies
	/// a matching record" invariant keeps holding.
	pub fn remove_connection(&self, token: &ConnectionToken) {
		let mut failed = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			let Some(record) = state.tokens.remove(token) else {
				return;
			};

			let topic = TopicKey::channel(record.channel.clone(), record.params.clone());
			let still_covered = state
				.tokens
				.values()
				.any(|r| r.channel == record.channel && r.params == record.params);
			if still_covered {
				return;
			}

			let Some(members) = state.topics.remove(&topic) else {
				return;
			};
			for session_id in members {
				if let Some(session) = state.sessions.get_mut(&session_id) {
					session.joined.remove(&topic);
					let ack = ServerFrame::Unsubscribed {
						channel: record.channel.clone(),
						params: record.params.clone(),
					};
					if session.sink.try_send(ack).is_err() {
						failed.push(session_id);
					}
				}
			}
		}
		self.cleanup_failed_sessions(failed);
	}

	/// Resolves a token to its record, if one is installed.
	pub fn resolve_token(&self, token: &ConnectionToken) -> Option<ConnectionRecord> {
		let state = self.state.lock().unwrap();
		state.tokens.get(token).cloned()
	}

	pub(crate) fn allocate_session_id(&self) -> SessionId {
		SessionId(self.next_session_id.fetch_add(1, Ordering::Relaxed))
	}

	pub(crate) fn queue_capacity(&self) -> usize {
		self.config.session_queue_capacity
	}

	/// Delay applied before rejecting a failed link authentication.
	pub const DEFAULT_AUTH_DELAY: Duration = Duration::from_secs(3);
}

/// Snapshot of broker state for tests and debugging.
#[doc(hidden)]
pub type BrokerStateSnapshot = (
	HashSet<ConnectionToken>,
	HashSet<SessionId>,
	HashMap<TopicKey, HashSet<SessionId>>,
);

impl SidekickCore {
	/// Retrieves a snapshot of the current broker state.
	#[doc(hidden)]
	pub fn get_state(&self) -> BrokerStateSnapshot {
		let state = self.state.lock().unwrap();
		(
			state.tokens.keys().cloned().collect(),
			state.sessions.keys().cloned().collect(),
			state.topics.clone(),
		)
	}
}

#[cfg(test)]
mod tests;
