//! Resource topic membership and update fan-out.

use covenant_sidekick_proto::{ServerFrame, SidekickError};

use super::helpers::{TestSession, chat_record};
use crate::core::{SidekickConfig, SidekickCore};

#[tokio::test]
async fn listen_acks_and_receives_updates() {
	let core = SidekickCore::new();
	let mut session = TestSession::join(&core);

	core.listen(session.session_id, vec!["/data/a".to_string()]);
	assert_eq!(
		session.try_recv(),
		Some(ServerFrame::Listening {
			resources: vec!["/data/a".to_string()],
		})
	);

	core.update_resources(&["/data/a".to_string()]);
	assert_eq!(
		session.try_recv(),
		Some(ServerFrame::Updated {
			resource: "/data/a".to_string(),
		})
	);
}

#[tokio::test]
async fn updates_only_reach_listeners() {
	let core = SidekickCore::new();
	let mut listener = TestSession::join(&core);
	let mut bystander = TestSession::join(&core);

	core.listen(listener.session_id, vec!["/data/a".to_string()]);
	core.listen(bystander.session_id, vec!["/data/b".to_string()]);
	listener.drain();
	bystander.drain();

	core.update_resources(&["/data/a".to_string()]);
	assert!(matches!(
		listener.try_recv(),
		Some(ServerFrame::Updated { .. })
	));
	assert_eq!(bystander.try_recv(), None);
}

#[tokio::test]
async fn each_joined_session_gets_exactly_one_update_per_publish() {
	let core = SidekickCore::new();
	let mut a = TestSession::join(&core);
	let mut b = TestSession::join(&core);

	for session in [&a, &b] {
		core.listen(session.session_id, vec!["/data/k".to_string()]);
	}
	a.drain();
	b.drain();

	core.update_resources(&["/data/k".to_string()]);
	assert_eq!(a.drain().len(), 1);
	assert_eq!(b.drain().len(), 1);
}

#[tokio::test]
async fn unlisten_stops_updates_and_is_idempotent() {
	let core = SidekickCore::new();
	let mut session = TestSession::join(&core);

	core.listen(session.session_id, vec!["/data/a".to_string()]);
	core.unlisten(session.session_id, vec!["/data/a".to_string()]);
	core.unlisten(session.session_id, vec!["/data/a".to_string()]);
	session.drain();

	core.update_resources(&["/data/a".to_string()]);
	assert_eq!(session.try_recv(), None);
}

#[tokio::test]
async fn updates_for_unknown_resources_are_noops() {
	let core = SidekickCore::new();
	let mut session = TestSession::join(&core);
	core.update_resources(&["/data/nobody".to_string()]);
	assert_eq!(session.try_recv(), None);
}

#[tokio::test]
async fn wildcard_resources_are_literal_topic_names() {
	let core = SidekickCore::new();
	let mut session = TestSession::join(&core);
	core.listen(session.session_id, vec!["/data/test-key".to_string()]);
	session.drain();

	// No prefix semantics: "/data/*" only reaches listeners of the
	// literal string.
	core.update_resources(&["/data/*".to_string()]);
	assert_eq!(session.try_recv(), None);
}

#[tokio::test]
async fn unregister_removes_session_from_all_topics() {
	let core = SidekickCore::new();
	let session = TestSession::join(&core);
	core.listen(
		session.session_id,
		vec!["/data/a".to_string(), "/data/b".to_string()],
	);

	core.unregister_session(session.session_id);
	let (_, sessions, topics) = core.get_state();
	assert!(!sessions.contains(&session.session_id));
	assert!(topics.is_empty());
}

#[tokio::test]
async fn slow_consumers_are_dropped_not_waited_on() {
	let core = SidekickCore::with_config(SidekickConfig {
		session_queue_capacity: 2,
	});
	let mut slow = TestSession::join(&core);
	let mut healthy = TestSession::join(&core);

	for session in [&slow, &healthy] {
		core.listen(session.session_id, vec!["/data/hot".to_string()]);
	}
	healthy.drain();
	// The slow session never drains; its ack already occupies one slot.

	for _ in 0..4 {
		core.update_resources(&["/data/hot".to_string()]);
	}

	let (_, sessions, _) = core.get_state();
	assert!(!sessions.contains(&slow.session_id));
	assert!(sessions.contains(&healthy.session_id));
	assert_eq!(healthy.drain().len(), 4);

	// The slow session's queue holds whatever fit before the drop.
	assert!(slow.drain().len() <= 2);
}

#[tokio::test]
async fn add_connection_is_idempotent_and_rejects_mismatches() {
	let core = SidekickCore::new();
	let record = chat_record("tok-1", "room-1", "ada");

	core.add_connection(record.clone()).unwrap();
	core.add_connection(record.clone()).unwrap();

	let mut different = record;
	different.params = super::helpers::room("room-2");
	assert_eq!(
		core.add_connection(different),
		Err(SidekickError::TokenMismatch)
	);
}
