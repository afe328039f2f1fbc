#![warn(missing_docs)]

//! Shared wire types for the Sidekick broker protocol.
//!
//! This crate defines the data structures exchanged between clients and the
//! broker (the session surface), and between the covenant server and the
//! broker (the server link), together with their strict encoding to the
//! wire text format and the length-delimited framing used on the transport.

mod frames;
mod framing;
mod ids;
mod params;
mod service;
pub mod wire;

pub use frames::{BrokerFrame, ChannelError, ClientFrame, Fault, LinkFrame, ServerFrame};
pub use framing::{MAX_FRAME_LEN, is_disconnect, read_value, write_value};
pub use ids::{ConnectionToken, DeliveryId, SessionId};
pub use params::{ParamMap, TopicKey};
pub use service::{ChannelDelegate, ConnectionRecord, Sidekick, SidekickError};
