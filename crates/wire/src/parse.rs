//! Strict parser for the wire text format.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::Value;

/// Maximum nesting depth accepted by the parser.
const MAX_DEPTH: usize = 128;

/// A parse failure with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {offset}")]
pub struct ParseError {
	/// Byte offset into the input where the error was detected.
	pub offset: usize,
	/// Human-readable description of the failure.
	pub message: String,
}

/// Parses one wire document. The entire input must be consumed; trailing
/// garbage after the top-level value is an error.
pub fn parse(input: &str) -> Result<Value, ParseError> {
	let mut parser = Parser {
		bytes: input.as_bytes(),
		pos: 0,
	};
	parser.skip_ws();
	let value = parser.value(0)?;
	parser.skip_ws();
	if parser.pos != parser.bytes.len() {
		return Err(parser.err("trailing characters after value"));
	}
	Ok(value)
}

struct Parser<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> Parser<'a> {
	fn err(&self, message: impl Into<String>) -> ParseError {
		ParseError {
			offset: self.pos,
			message: message.into(),
		}
	}

	fn peek(&self) -> Option<u8> {
		self.bytes.get(self.pos).copied()
	}

	fn skip_ws(&mut self) {
		while let Some(b) = self.peek() {
			match b {
				b' ' | b'\t' | b'\n' | b'\r' => self.pos += 1,
				_ => break,
			}
		}
	}

	fn expect(&mut self, b: u8) -> Result<(), ParseError> {
		if self.peek() == Some(b) {
			self.pos += 1;
			Ok(())
		} else {
			Err(self.err(format!("expected '{}'", b as char)))
		}
	}

	fn literal(&mut self, word: &str, value: Value) -> Result<Value, ParseError> {
		if self.bytes[self.pos..].starts_with(word.as_bytes()) {
			self.pos += word.len();
			Ok(value)
		} else {
			Err(self.err("unknown keyword"))
		}
	}

	fn value(&mut self, depth: usize) -> Result<Value, ParseError> {
		if depth > MAX_DEPTH {
			return Err(self.err("value nested too deeply"));
		}
		match self.peek() {
			Some(b'{') => self.object(depth),
			Some(b'[') => self.list(depth),
			Some(b'"') => Ok(Value::String(self.string()?)),
			Some(b't') => self.literal("true", Value::Bool(true)),
			Some(b'f') => self.literal("false", Value::Bool(false)),
			Some(b'n') => self.literal("null", Value::Null),
			Some(b'N') => self.literal("NaN", Value::Number(f64::NAN)),
			Some(b'I') => self.literal("Infinity", Value::Number(f64::INFINITY)),
			Some(b'-' | b'0'..=b'9') => self.number(),
			Some(_) => Err(self.err("unexpected character")),
			None => Err(self.err("unexpected end of input")),
		}
	}

	fn list(&mut self, depth: usize) -> Result<Value, ParseError> {
		self.expect(b'[')?;
		let mut items = Vec::new();
		self.skip_ws();
		if self.peek() == Some(b']') {
			self.pos += 1;
			return Ok(Value::List(items));
		}
		loop {
			self.skip_ws();
			items.push(self.value(depth + 1)?);
			self.skip_ws();
			match self.peek() {
				Some(b',') => {
					self.pos += 1;
					self.skip_ws();
					if self.peek() == Some(b']') {
						return Err(self.err("trailing comma in list"));
					}
				}
				Some(b']') => {
					self.pos += 1;
					return Ok(Value::List(items));
				}
				_ => return Err(self.err("expected ',' or ']'")),
			}
		}
	}

	fn object(&mut self, depth: usize) -> Result<Value, ParseError> {
		let start = self.pos;
		self.expect(b'{')?;
		let mut fields: Vec<(String, Value)> = Vec::new();
		self.skip_ws();
		if self.peek() == Some(b'}') {
			self.pos += 1;
			return Ok(Value::Object(BTreeMap::new()));
		}
		loop {
			self.skip_ws();
			if self.peek() != Some(b'"') {
				return Err(self.err("expected object key"));
			}
			let key_offset = self.pos;
			let key = self.string()?;
			if fields.iter().any(|(existing, _)| *existing == key) {
				return Err(ParseError {
					offset: key_offset,
					message: format!("duplicate object key {key:?}"),
				});
			}
			self.skip_ws();
			self.expect(b':')?;
			self.skip_ws();
			let value = self.value(depth + 1)?;
			fields.push((key, value));
			self.skip_ws();
			match self.peek() {
				Some(b',') => {
					self.pos += 1;
					self.skip_ws();
					if self.peek() == Some(b'}') {
						return Err(self.err("trailing comma in object"));
					}
				}
				Some(b'}') => {
					self.pos += 1;
					break;
				}
				_ => return Err(self.err("expected ',' or '}'")),
			}
		}
		finish_object(fields, start)
	}

	fn string(&mut self) -> Result<String, ParseError> {
		self.expect(b'"')?;
		let mut out = String::new();
		loop {
			let Some(b) = self.peek() else {
				return Err(self.err("unterminated string"));
			};
			match b {
				b'"' => {
					self.pos += 1;
					return Ok(out);
				}
				b'\\' => {
					self.pos += 1;
					out.push(self.escape()?);
				}
				0x00..=0x1F => {
					return Err(self.err("unescaped control character in string"));
				}
				_ => {
					// Copy one UTF-8 scalar; the input slice came from a
					// &str so the encoding is already valid.
					let start = self.pos;
					self.pos += 1;
					while self
						.peek()
						.is_some_and(|next| (next & 0b1100_0000) == 0b1000_0000)
					{
						self.pos += 1;
					}
					out.push_str(
						std::str::from_utf8(&self.bytes[start..self.pos])
							.expect("input slice is valid UTF-8"),
					);
				}
			}
		}
	}

	fn escape(&mut self) -> Result<char, ParseError> {
		let Some(b) = self.peek() else {
			return Err(self.err("unterminated escape"));
		};
		self.pos += 1;
		Ok(match b {
			b'"' => '"',
			b'\\' => '\\',
			b'/' => '/',
			b'b' => '\u{8}',
			b'f' => '\u{C}',
			b'n' => '\n',
			b'r' => '\r',
			b't' => '\t',
			b'u' => return self.unicode_escape(),
			_ => {
				self.pos -= 1;
				return Err(self.err("invalid escape character"));
			}
		})
	}

	fn unicode_escape(&mut self) -> Result<char, ParseError> {
		let first = self.hex4()?;
		let code = if (0xD800..=0xDBFF).contains(&first) {
			// High surrogate: a low surrogate escape must follow.
			if self.peek() == Some(b'\\') {
				self.pos += 1;
				self.expect(b'u')
					.map_err(|_| self.err("lone surrogate in string escape"))?;
				let second = self.hex4()?;
				if !(0xDC00..=0xDFFF).contains(&second) {
					return Err(self.err("lone surrogate in string escape"));
				}
				0x10000 + ((first - 0xD800) << 10) + (second - 0xDC00)
			} else {
				return Err(self.err("lone surrogate in string escape"));
			}
		} else if (0xDC00..=0xDFFF).contains(&first) {
			return Err(self.err("lone surrogate in string escape"));
		} else {
			first
		};
		char::from_u32(code).ok_or_else(|| self.err("invalid unicode escape"))
	}

	fn hex4(&mut self) -> Result<u32, ParseError> {
		let mut code = 0u32;
		for _ in 0..4 {
			let Some(b) = self.peek() else {
				return Err(self.err("unterminated unicode escape"));
			};
			let digit = match b {
				b'0'..=b'9' => u32::from(b - b'0'),
				b'a'..=b'f' => u32::from(b - b'a') + 10,
				b'A'..=b'F' => u32::from(b - b'A') + 10,
				_ => return Err(self.err("invalid unicode escape digit")),
			};
			code = code * 16 + digit;
			self.pos += 1;
		}
		Ok(code)
	}

	fn number(&mut self) -> Result<Value, ParseError> {
		let start = self.pos;
		if self.peek() == Some(b'-') {
			self.pos += 1;
			if self.peek() == Some(b'I') {
				return self.literal("Infinity", Value::Number(f64::NEG_INFINITY));
			}
		}
		match self.peek() {
			Some(b'0') => {
				self.pos += 1;
				if self.peek().is_some_and(|b| b.is_ascii_digit()) {
					return Err(self.err("leading zero in number"));
				}
			}
			Some(b'1'..=b'9') => {
				while self.peek().is_some_and(|b| b.is_ascii_digit()) {
					self.pos += 1;
				}
			}
			_ => return Err(self.err("expected digit")),
		}
		if self.peek() == Some(b'.') {
			self.pos += 1;
			if !self.peek().is_some_and(|b| b.is_ascii_digit()) {
				return Err(self.err("expected digit after decimal point"));
			}
			while self.peek().is_some_and(|b| b.is_ascii_digit()) {
				self.pos += 1;
			}
		}
		if matches!(self.peek(), Some(b'e' | b'E')) {
			self.pos += 1;
			if matches!(self.peek(), Some(b'+' | b'-')) {
				self.pos += 1;
			}
			if !self.peek().is_some_and(|b| b.is_ascii_digit()) {
				return Err(self.err("expected digit in exponent"));
			}
			while self.peek().is_some_and(|b| b.is_ascii_digit()) {
				self.pos += 1;
			}
		}
		let text = std::str::from_utf8(&self.bytes[start..self.pos])
			.expect("number span is valid UTF-8");
		let n: f64 = text.parse().map_err(|_| ParseError {
			offset: start,
			message: "number out of range".to_string(),
		})?;
		Ok(Value::Number(n))
	}
}

/// Resolves tagged objects and `$`-escaped keys once an object's raw fields
/// are collected.
fn finish_object(fields: Vec<(String, Value)>, offset: usize) -> Result<Value, ParseError> {
	if fields.len() == 1 {
		let (key, value) = &fields[0];
		match key.as_str() {
			"$date" => {
				let Some(ms) = value.as_f64().filter(|ms| ms.is_finite()) else {
					return Err(ParseError {
						offset,
						message: "$date payload must be a finite number of milliseconds"
							.to_string(),
					});
				};
				return Ok(Value::Date(ms as i64));
			}
			"$map" => {
				let Some(entries) = value.as_list() else {
					return Err(ParseError {
						offset,
						message: "$map payload must be a list of [key, value] pairs".to_string(),
					});
				};
				let mut pairs = Vec::with_capacity(entries.len());
				for entry in entries {
					match entry.as_list() {
						Some([k, v]) => pairs.push((k.clone(), v.clone())),
						_ => {
							return Err(ParseError {
								offset,
								message: "$map entry must be a [key, value] pair".to_string(),
							});
						}
					}
				}
				return Ok(Value::Map(pairs));
			}
			"$set" => {
				let Some(items) = value.as_list() else {
					return Err(ParseError {
						offset,
						message: "$set payload must be a list".to_string(),
					});
				};
				return Ok(Value::Set(items.to_vec()));
			}
			_ => {}
		}
	}

	let mut object = BTreeMap::new();
	for (key, value) in fields {
		let key = if let Some(escaped) = key.strip_prefix("$$") {
			format!("${escaped}")
		} else if key.starts_with('$') {
			return Err(ParseError {
				offset,
				message: format!("unknown tag {key:?}"),
			});
		} else {
			key
		};
		object.insert(key, value);
	}
	Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_plain_json() {
		let value = parse(r#"{"a": [1, 2.5, -3e2], "b": "hi", "c": null, "d": true}"#).unwrap();
		assert_eq!(value.get("b").and_then(Value::as_str), Some("hi"));
		assert_eq!(
			value.get("a").and_then(Value::as_list).map(<[Value]>::len),
			Some(3)
		);
	}

	#[test]
	fn parses_extended_literals() {
		assert!(
			parse("NaN")
				.unwrap()
				.as_f64()
				.is_some_and(f64::is_nan)
		);
		assert_eq!(parse("Infinity").unwrap(), Value::Number(f64::INFINITY));
		assert_eq!(parse("-Infinity").unwrap(), Value::Number(f64::NEG_INFINITY));
	}

	#[test]
	fn parses_tagged_values() {
		assert_eq!(parse(r#"{"$date": 1700000000000}"#).unwrap(), Value::Date(1_700_000_000_000));
		assert_eq!(
			parse(r#"{"$map": [["k", 1]]}"#).unwrap(),
			Value::Map(vec![(Value::from("k"), Value::from(1.0))])
		);
		assert_eq!(
			parse(r#"{"$set": [1, 2]}"#).unwrap(),
			Value::Set(vec![Value::from(1.0), Value::from(2.0)])
		);
	}

	#[test]
	fn unescapes_dollar_keys() {
		let value = parse(r#"{"$$date": 1}"#).unwrap();
		assert_eq!(value.get("$date"), Some(&Value::from(1.0)));
	}

	#[test]
	fn rejects_unknown_tags() {
		assert!(parse(r#"{"$bogus": 1}"#).is_err());
	}

	#[test]
	fn rejects_trailing_commas() {
		assert!(parse("[1, 2,]").is_err());
		assert!(parse(r#"{"a": 1,}"#).is_err());
	}

	#[test]
	fn rejects_trailing_garbage() {
		assert!(parse("1 2").is_err());
		assert!(parse("{} x").is_err());
	}

	#[test]
	fn rejects_malformed_numbers() {
		assert!(parse("01").is_err());
		assert!(parse("1.").is_err());
		assert!(parse(".5").is_err());
		assert!(parse("+1").is_err());
		assert!(parse("1e").is_err());
	}

	#[test]
	fn rejects_unterminated_and_lone_surrogates() {
		assert!(parse(r#""abc"#).is_err());
		assert!(parse(r#""\ud800""#).is_err());
		assert!(parse(r#""\udc00""#).is_err());
		assert_eq!(
			parse(r#""😀""#).unwrap(),
			Value::from("\u{1F600}")
		);
	}

	#[test]
	fn rejects_duplicate_keys() {
		assert!(parse(r#"{"a": 1, "a": 2}"#).is_err());
	}

	#[test]
	fn rejects_unknown_keywords() {
		assert!(parse("None").is_err());
		assert!(parse("undefined").is_err());
		assert!(parse("nul").is_err());
	}

	#[test]
	fn errors_carry_offsets() {
		let err = parse("[1, x]").unwrap_err();
		assert_eq!(err.offset, 4);
	}
}
