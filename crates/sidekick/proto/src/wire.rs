//! Conversion between frames and wire values.
//!
//! Every frame encodes as a tagged object `{"type": "...", ...}`. Decoding
//! is strict: an unknown tag or a malformed field is an error naming the
//! problem, never a silently ignored frame.

use std::collections::BTreeMap;

use covenant_wire::Value;
use thiserror::Error;

use crate::{
	BrokerFrame, ChannelError, ClientFrame, ConnectionToken, DeliveryId, Fault, LinkFrame,
	ParamMap, ServerFrame,
};

/// A frame that does not decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed frame: {0}")]
pub struct WireError(pub String);

fn malformed(message: impl Into<String>) -> WireError {
	WireError(message.into())
}

type Fields<'v> = &'v BTreeMap<String, Value>;

fn fields(value: &Value) -> Result<Fields<'_>, WireError> {
	value
		.as_object()
		.ok_or_else(|| malformed(format!("expected object, found {}", value.type_name())))
}

fn frame_type<'v>(fields: Fields<'v>) -> Result<&'v str, WireError> {
	fields
		.get("type")
		.and_then(Value::as_str)
		.ok_or_else(|| malformed("missing \"type\" tag"))
}

fn field<'v>(fields: Fields<'v>, name: &str) -> Result<&'v Value, WireError> {
	fields
		.get(name)
		.ok_or_else(|| malformed(format!("missing field {name:?}")))
}

fn string_field(fields: Fields<'_>, name: &str) -> Result<String, WireError> {
	field(fields, name)?
		.as_str()
		.map(str::to_string)
		.ok_or_else(|| malformed(format!("field {name:?} must be a string")))
}

fn resources_field(fields: Fields<'_>, name: &str) -> Result<Vec<String>, WireError> {
	let items = field(fields, name)?
		.as_list()
		.ok_or_else(|| malformed(format!("field {name:?} must be a list")))?;
	items
		.iter()
		.map(|item| {
			item.as_str()
				.map(str::to_string)
				.ok_or_else(|| malformed(format!("field {name:?} must contain strings")))
		})
		.collect()
}

fn params_field(fields: Fields<'_>, name: &str) -> Result<ParamMap, WireError> {
	let object = field(fields, name)?
		.as_object()
		.ok_or_else(|| malformed(format!("field {name:?} must be an object")))?;
	object
		.iter()
		.map(|(k, v)| {
			v.as_str()
				.map(|v| (k.clone(), v.to_string()))
				.ok_or_else(|| malformed(format!("param {k:?} must be a string")))
		})
		.collect()
}

fn token_field(fields: Fields<'_>, name: &str) -> Result<ConnectionToken, WireError> {
	string_field(fields, name).map(ConnectionToken::new)
}

fn delivery_field(fields: Fields<'_>, name: &str) -> Result<DeliveryId, WireError> {
	let n = field(fields, name)?
		.as_f64()
		.filter(|n| n.is_finite() && *n >= 0.0 && *n == n.trunc())
		.ok_or_else(|| malformed(format!("field {name:?} must be a non-negative integer")))?;
	Ok(DeliveryId(n as u64))
}

fn params_value(params: &ParamMap) -> Value {
	Value::Object(
		params
			.iter()
			.map(|(k, v)| (k.to_string(), Value::from(v)))
			.collect(),
	)
}

fn tagged(tag: &str, rest: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
	let mut object: BTreeMap<String, Value> = rest
		.into_iter()
		.map(|(k, v)| (k.to_string(), v))
		.collect();
	object.insert("type".to_string(), Value::from(tag));
	Value::Object(object)
}

fn channel_error_fields(error: &ChannelError) -> Vec<(&'static str, Value)> {
	let mut rest = Vec::new();
	if let Some(channel) = &error.channel {
		rest.push(("channel", Value::from(channel.as_str())));
	}
	if let Some(params) = &error.params {
		rest.push(("params", params_value(params)));
	}
	rest.push(("fault", Value::from(error.fault.as_wire_str())));
	rest.push(("message", Value::from(error.message.as_str())));
	rest
}

fn decode_channel_error(fields: Fields<'_>) -> Result<ChannelError, WireError> {
	let fault = string_field(fields, "fault")?;
	let fault = Fault::from_wire_str(&fault)
		.ok_or_else(|| malformed(format!("unknown fault {fault:?}")))?;
	Ok(ChannelError {
		channel: match fields.get("channel") {
			Some(v) => Some(
				v.as_str()
					.map(str::to_string)
					.ok_or_else(|| malformed("field \"channel\" must be a string"))?,
			),
			None => None,
		},
		params: match fields.get("params") {
			Some(_) => Some(params_field(fields, "params")?),
			None => None,
		},
		fault,
		message: string_field(fields, "message")?,
	})
}

/// Encodes a client-session inbound frame.
pub fn encode_client_frame(frame: &ClientFrame) -> Value {
	match frame {
		ClientFrame::Listen { resources } => tagged(
			"listen",
			[(
				"resources",
				Value::List(resources.iter().map(|r| Value::from(r.as_str())).collect()),
			)],
		),
		ClientFrame::Unlisten { resources } => tagged(
			"unlisten",
			[(
				"resources",
				Value::List(resources.iter().map(|r| Value::from(r.as_str())).collect()),
			)],
		),
		ClientFrame::Subscribe { token } => {
			tagged("subscribe", [("token", Value::from(token.as_str()))])
		}
		ClientFrame::Unsubscribe { token } => {
			tagged("unsubscribe", [("token", Value::from(token.as_str()))])
		}
		ClientFrame::Send {
			token,
			channel,
			params,
			data,
		} => tagged(
			"send",
			[
				("token", Value::from(token.as_str())),
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
				("data", data.clone()),
			],
		),
	}
}

/// Decodes a client-session inbound frame.
pub fn decode_client_frame(value: &Value) -> Result<ClientFrame, WireError> {
	let fields = fields(value)?;
	match frame_type(fields)? {
		"listen" => Ok(ClientFrame::Listen {
			resources: resources_field(fields, "resources")?,
		}),
		"unlisten" => Ok(ClientFrame::Unlisten {
			resources: resources_field(fields, "resources")?,
		}),
		"subscribe" => Ok(ClientFrame::Subscribe {
			token: token_field(fields, "token")?,
		}),
		"unsubscribe" => Ok(ClientFrame::Unsubscribe {
			token: token_field(fields, "token")?,
		}),
		"send" => Ok(ClientFrame::Send {
			token: token_field(fields, "token")?,
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
			data: field(fields, "data")?.clone(),
		}),
		other => Err(malformed(format!("unknown client frame type {other:?}"))),
	}
}

/// Encodes a client-session outbound frame.
pub fn encode_server_frame(frame: &ServerFrame) -> Value {
	match frame {
		ServerFrame::Listening { resources } => tagged(
			"listening",
			[(
				"resources",
				Value::List(resources.iter().map(|r| Value::from(r.as_str())).collect()),
			)],
		),
		ServerFrame::Unlistening { resources } => tagged(
			"unlistening",
			[(
				"resources",
				Value::List(resources.iter().map(|r| Value::from(r.as_str())).collect()),
			)],
		),
		ServerFrame::Subscribed { channel, params } => tagged(
			"subscribed",
			[
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
			],
		),
		ServerFrame::Unsubscribed { channel, params } => tagged(
			"unsubscribed",
			[
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
			],
		),
		ServerFrame::Updated { resource } => {
			tagged("updated", [("resource", Value::from(resource.as_str()))])
		}
		ServerFrame::Message {
			channel,
			params,
			data,
		} => tagged(
			"message",
			[
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
				("data", data.clone()),
			],
		),
		ServerFrame::Error(error) => tagged("error", channel_error_fields(error)),
	}
}

/// Decodes a client-session outbound frame.
pub fn decode_server_frame(value: &Value) -> Result<ServerFrame, WireError> {
	let fields = fields(value)?;
	match frame_type(fields)? {
		"listening" => Ok(ServerFrame::Listening {
			resources: resources_field(fields, "resources")?,
		}),
		"unlistening" => Ok(ServerFrame::Unlistening {
			resources: resources_field(fields, "resources")?,
		}),
		"subscribed" => Ok(ServerFrame::Subscribed {
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
		}),
		"unsubscribed" => Ok(ServerFrame::Unsubscribed {
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
		}),
		"updated" => Ok(ServerFrame::Updated {
			resource: string_field(fields, "resource")?,
		}),
		"message" => Ok(ServerFrame::Message {
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
			data: field(fields, "data")?.clone(),
		}),
		"error" => Ok(ServerFrame::Error(decode_channel_error(fields)?)),
		other => Err(malformed(format!("unknown server frame type {other:?}"))),
	}
}

/// Encodes a server-link inbound frame.
pub fn encode_link_frame(frame: &LinkFrame) -> Value {
	match frame {
		LinkFrame::Hello { secret } => tagged("hello", [("secret", Value::from(secret.as_str()))]),
		LinkFrame::AddConnection {
			token,
			channel,
			params,
			context,
		} => tagged(
			"addConnection",
			[
				("token", Value::from(token.as_str())),
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
				("context", context.clone()),
			],
		),
		LinkFrame::RemoveConnection { token } => {
			tagged("removeConnection", [("token", Value::from(token.as_str()))])
		}
		LinkFrame::Update { resources } => tagged(
			"update",
			[(
				"resources",
				Value::List(resources.iter().map(|r| Value::from(r.as_str())).collect()),
			)],
		),
		LinkFrame::PostMessage {
			channel,
			params,
			data,
		} => tagged(
			"postMessage",
			[
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
				("data", data.clone()),
			],
		),
		LinkFrame::DeliverReply { delivery, error } => {
			let mut rest = vec![("delivery", Value::from(delivery.0 as f64))];
			if let Some(error) = error {
				rest.push(("error", tagged("error", channel_error_fields(error))));
			}
			tagged("deliverReply", rest)
		}
	}
}

/// Decodes a server-link inbound frame.
pub fn decode_link_frame(value: &Value) -> Result<LinkFrame, WireError> {
	let fields = fields(value)?;
	match frame_type(fields)? {
		"hello" => Ok(LinkFrame::Hello {
			secret: string_field(fields, "secret")?,
		}),
		"addConnection" => Ok(LinkFrame::AddConnection {
			token: token_field(fields, "token")?,
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
			context: field(fields, "context")?.clone(),
		}),
		"removeConnection" => Ok(LinkFrame::RemoveConnection {
			token: token_field(fields, "token")?,
		}),
		"update" => Ok(LinkFrame::Update {
			resources: resources_field(fields, "resources")?,
		}),
		"postMessage" => Ok(LinkFrame::PostMessage {
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
			data: field(fields, "data")?.clone(),
		}),
		"deliverReply" => Ok(LinkFrame::DeliverReply {
			delivery: delivery_field(fields, "delivery")?,
			error: match fields.get("error") {
				Some(error) => Some(decode_channel_error(self::fields(error)?)?),
				None => None,
			},
		}),
		other => Err(malformed(format!("unknown link frame type {other:?}"))),
	}
}

/// Encodes a server-link outbound frame.
pub fn encode_broker_frame(frame: &BrokerFrame) -> Value {
	match frame {
		BrokerFrame::HelloAck => tagged("helloAck", std::iter::empty()),
		BrokerFrame::HelloReject => tagged("helloReject", std::iter::empty()),
		BrokerFrame::Deliver {
			delivery,
			channel,
			params,
			data,
			context,
		} => tagged(
			"deliver",
			[
				("delivery", Value::from(delivery.0 as f64)),
				("channel", Value::from(channel.as_str())),
				("params", params_value(params)),
				("data", data.clone()),
				("context", context.clone()),
			],
		),
	}
}

/// Decodes a server-link outbound frame.
pub fn decode_broker_frame(value: &Value) -> Result<BrokerFrame, WireError> {
	let fields = fields(value)?;
	match frame_type(fields)? {
		"helloAck" => Ok(BrokerFrame::HelloAck),
		"helloReject" => Ok(BrokerFrame::HelloReject),
		"deliver" => Ok(BrokerFrame::Deliver {
			delivery: delivery_field(fields, "delivery")?,
			channel: string_field(fields, "channel")?,
			params: params_field(fields, "params")?,
			data: field(fields, "data")?.clone(),
			context: field(fields, "context")?.clone(),
		}),
		other => Err(malformed(format!("unknown broker frame type {other:?}"))),
	}
}
