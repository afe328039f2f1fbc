//! Channel param maps and broker topic keys.

use std::collections::BTreeMap;
use std::fmt;

/// A channel's param bindings: param name to string value.
///
/// Stored sorted by name, so equality and hashing are canonical regardless
/// of the order params were supplied in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamMap {
	entries: BTreeMap<String, String>,
}

impl ParamMap {
	/// An empty param map.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets one param binding.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.entries.insert(name.into(), value.into());
	}

	/// Looks up a param value by name.
	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries.get(name).map(String::as_str)
	}

	/// Number of bindings.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether there are no bindings.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Iterates bindings in name order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	/// The bound param names, in order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for ParamMap {
	fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
		Self {
			entries: iter
				.into_iter()
				.map(|(n, v)| (n.into(), v.into()))
				.collect(),
		}
	}
}

impl fmt::Display for ParamMap {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("{")?;
		for (i, (name, value)) in self.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{name}={value}")?;
		}
		f.write_str("}")
	}
}

/// Broker routing key: either a resource name or a channel scoped by its
/// params.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKey {
	/// A resource topic; any client may listen on any resource name.
	Resource(String),
	/// A channel topic, scoped by the canonical param map.
	Channel {
		/// The channel name.
		channel: String,
		/// The param bindings identifying this instance of the channel.
		params: ParamMap,
	},
}

impl TopicKey {
	/// A resource topic key.
	pub fn resource(name: impl Into<String>) -> Self {
		Self::Resource(name.into())
	}

	/// A channel topic key.
	pub fn channel(channel: impl Into<String>, params: ParamMap) -> Self {
		Self::Channel {
			channel: channel.into(),
			params,
		}
	}
}

impl fmt::Display for TopicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Resource(name) => write!(f, "resource:{name}"),
			Self::Channel { channel, params } => write!(f, "channel:{channel}:{params}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn param_maps_are_order_insensitive() {
		let a: ParamMap = [("room", "1"), ("shard", "a")].into_iter().collect();
		let b: ParamMap = [("shard", "a"), ("room", "1")].into_iter().collect();
		assert_eq!(a, b);
		assert_eq!(TopicKey::channel("chat", a), TopicKey::channel("chat", b));
	}

	#[test]
	fn differing_values_differ() {
		let a: ParamMap = [("room", "1")].into_iter().collect();
		let b: ParamMap = [("room", "2")].into_iter().collect();
		assert_ne!(a, b);
	}

	#[test]
	fn resource_and_channel_topics_are_disjoint() {
		let resource = TopicKey::resource("chat");
		let channel = TopicKey::channel("chat", ParamMap::new());
		assert_ne!(resource, channel);
	}
}
