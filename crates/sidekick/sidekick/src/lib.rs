#![warn(missing_docs)]

//! Sidekick: the covenant pub/sub broker.
//!
//! Sidekick routes two kinds of traffic between covenant servers and their
//! clients: resource update notifications (cache invalidation) and channel
//! messages (bidirectional streams scoped by param maps). It holds no
//! durable state; a restart invalidates every token and session.

pub mod core;
mod local;
pub mod serve;

pub use local::LocalSidekick;
pub use serve::{LinkAuth, serve};
