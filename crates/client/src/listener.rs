//! Resource listener registry with remote reference counting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An async refetch callback registered for a set of resources.
pub type Refetch = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Handle identifying one registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Where remote listen/unlisten transitions are reported.
///
/// The Sidekick session implements this; [`LocalOnly`] ignores it for
/// clients that never leave the process.
pub trait RemoteLink: Send + Sync {
	/// Called on the 0 to 1 remote-listener transition for a resource.
	fn listen(&self, resource: &str);
	/// Called on the 1 to 0 remote-listener transition for a resource.
	fn unlisten(&self, resource: &str);
}

/// A [`RemoteLink`] for purely local clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl RemoteLink for LocalOnly {
	fn listen(&self, _resource: &str) {}
	fn unlisten(&self, _resource: &str) {}
}

struct ListenerRecord {
	resources: Vec<String>,
	refetch: Refetch,
	remote: bool,
}

#[derive(Default)]
struct ListenerState {
	listeners: HashMap<ListenerId, ListenerRecord>,
	remote_counts: HashMap<String, usize>,
}

/// Counts local and remote listeners per resource and fans refetches out.
pub struct ListenerCore {
	state: Mutex<ListenerState>,
	link: Arc<dyn RemoteLink>,
	next_id: AtomicU64,
}

impl ListenerCore {
	/// A listener core reporting remote transitions to `link`.
	pub fn new(link: Arc<dyn RemoteLink>) -> Self {
		Self {
			state: Mutex::new(ListenerState::default()),
			link,
			next_id: AtomicU64::new(0),
		}
	}

	/// Registers a refetch for a set of resources.
	///
	/// A `remote` listener bumps each resource's remote count; the 0 to 1
	/// transition tells the broker to start publishing `updated` events
	/// here.
	pub fn register(&self, resources: Vec<String>, refetch: Refetch, remote: bool) -> ListenerId {
		let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let mut newly_listened = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			if remote {
				for resource in &resources {
					let count = state.remote_counts.entry(resource.clone()).or_insert(0);
					*count += 1;
					if *count == 1 {
						newly_listened.push(resource.clone());
					}
				}
			}
			state.listeners.insert(
				id,
				ListenerRecord {
					resources,
					refetch,
					remote,
				},
			);
		}
		for resource in newly_listened {
			self.link.listen(&resource);
		}
		id
	}

	/// Removes a listener, informing the broker on 1 to 0 transitions.
	pub fn remove(&self, id: ListenerId) {
		let mut newly_unlistened = Vec::new();
		{
			let mut state = self.state.lock().unwrap();
			let Some(record) = state.listeners.remove(&id) else {
				return;
			};
			if record.remote {
				for resource in &record.resources {
					if let Some(count) = state.remote_counts.get_mut(resource) {
						*count -= 1;
						if *count == 0 {
							state.remote_counts.remove(resource);
							newly_unlistened.push(resource.clone());
						}
					}
				}
			}
		}
		for resource in newly_unlistened {
			self.link.unlisten(&resource);
		}
	}

	/// Invokes every refetch registered for a resource, concurrently.
	pub fn on_updated(&self, resource: &str) {
		let refetches: Vec<Refetch> = {
			let state = self.state.lock().unwrap();
			state
				.listeners
				.values()
				.filter(|record| record.resources.iter().any(|r| r == resource))
				.map(|record| record.refetch.clone())
				.collect()
		};
		for refetch in refetches {
			tokio::spawn(refetch());
		}
	}

	/// Refetches every listener whose resource set intersects a
	/// mutation's returned resources, exactly once per listener no matter
	/// how many resources overlap.
	pub fn after_mutation(&self, resources: &[String]) {
		let refetches: Vec<Refetch> = {
			let state = self.state.lock().unwrap();
			state
				.listeners
				.values()
				.filter(|record| {
					record
						.resources
						.iter()
						.any(|r| resources.contains(r))
				})
				.map(|record| record.refetch.clone())
				.collect()
		};
		for refetch in refetches {
			tokio::spawn(refetch());
		}
	}

	/// Number of registered listeners.
	pub fn len(&self) -> usize {
		self.state.lock().unwrap().listeners.len()
	}

	/// Whether no listeners are registered.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
