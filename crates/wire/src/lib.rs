#![warn(missing_docs)]

//! Boundary wire codec for covenant.
//!
//! Values cross process boundaries as a strict JSON superset: plain JSON
//! documents parse identically, and three documented extensions carry the
//! types JSON cannot express:
//!
//! - `NaN`, `Infinity` and `-Infinity` literals in number position.
//! - Tagged objects `{"$date": millis}`, `{"$map": [[k, v], ...]}` and
//!   `{"$set": [v, ...]}` for [`Value::Date`], [`Value::Map`] and
//!   [`Value::Set`].
//! - Literal object keys beginning with `$` are escaped as `$$...` so they
//!   never collide with tags.
//!
//! The parser is strict: trailing commas, comments, unterminated strings,
//! unknown keywords, lone surrogates and trailing garbage are all rejected
//! with a byte offset. The codec is used only at the boundary; internal
//! data structures hold [`Value`] trees directly.

mod parse;
mod value;
mod write;

pub use parse::{ParseError, parse};
pub use value::Value;
pub use write::write;
