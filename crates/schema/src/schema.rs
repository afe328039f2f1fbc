//! The schema combinator tree and its validator.

use covenant_wire::Value;

use crate::{Issue, Issues, PathSeg};

/// A declarative description of a wire value shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
	/// Accepts any value.
	Any,
	/// The null literal.
	Null,
	/// A boolean.
	Bool,
	/// Any number, including NaN and ±Infinity.
	Number,
	/// A finite number with no fractional part.
	Int,
	/// A string.
	String,
	/// A date.
	Date,
	/// Exactly the given value.
	Literal(Value),
	/// An object with the given fields. Unknown keys are rejected. A field
	/// whose schema is [`Schema::Optional`] may be absent.
	Object(Vec<(String, Schema)>),
	/// A list whose elements all match the element schema.
	List(Box<Schema>),
	/// A map whose keys and values match the given schemas.
	Map(Box<Schema>, Box<Schema>),
	/// A set whose members match the member schema.
	Set(Box<Schema>),
	/// Marks an object field as omittable. When the value is present it
	/// must match the inner schema.
	Optional(Box<Schema>),
	/// Accepts null in addition to the inner schema.
	Nullable(Box<Schema>),
	/// Accepts a value matching any alternative; first match wins.
	Union(Vec<Schema>),
}

impl Schema {
	/// An object schema from `(name, field schema)` pairs.
	pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Schema)>) -> Self {
		Self::Object(fields.into_iter().map(|(k, s)| (k.into(), s)).collect())
	}

	/// A list schema.
	pub fn list(element: Schema) -> Self {
		Self::List(Box::new(element))
	}

	/// A map schema.
	pub fn map(key: Schema, value: Schema) -> Self {
		Self::Map(Box::new(key), Box::new(value))
	}

	/// A set schema.
	pub fn set(member: Schema) -> Self {
		Self::Set(Box::new(member))
	}

	/// Marks a field as omittable.
	pub fn optional(inner: Schema) -> Self {
		Self::Optional(Box::new(inner))
	}

	/// Accepts null in addition to the inner schema.
	pub fn nullable(inner: Schema) -> Self {
		Self::Nullable(Box::new(inner))
	}

	/// Validates a value, returning every issue found.
	pub fn validate(&self, value: &Value) -> Result<(), Issues> {
		let mut issues = Vec::new();
		check(self, value, &mut Vec::new(), &mut issues);
		if issues.is_empty() {
			Ok(())
		} else {
			Err(Issues(issues))
		}
	}
}

fn mismatch(expected: &str, value: &Value, path: &[PathSeg], issues: &mut Vec<Issue>) {
	issues.push(Issue::new(
		path,
		format!("expected {expected}, found {}", value.type_name()),
	));
}

fn check(schema: &Schema, value: &Value, path: &mut Vec<PathSeg>, issues: &mut Vec<Issue>) {
	match schema {
		Schema::Any => {}
		Schema::Null => {
			if !value.is_null() {
				mismatch("null", value, path, issues);
			}
		}
		Schema::Bool => {
			if value.as_bool().is_none() {
				mismatch("bool", value, path, issues);
			}
		}
		Schema::Number => {
			if value.as_f64().is_none() {
				mismatch("number", value, path, issues);
			}
		}
		Schema::Int => match value.as_f64() {
			Some(n) if n.is_finite() && n == n.trunc() => {}
			Some(_) => {
				issues.push(Issue::new(path, "expected integer, found fractional number"));
			}
			None => mismatch("integer", value, path, issues),
		},
		Schema::String => {
			if value.as_str().is_none() {
				mismatch("string", value, path, issues);
			}
		}
		Schema::Date => {
			if !matches!(value, Value::Date(_)) {
				mismatch("date", value, path, issues);
			}
		}
		Schema::Literal(expected) => {
			if value != expected {
				issues.push(Issue::new(
					path,
					format!("expected literal {}", covenant_wire::write(expected)),
				));
			}
		}
		Schema::Object(fields) => {
			let Some(object) = value.as_object() else {
				mismatch("object", value, path, issues);
				return;
			};
			for (name, field_schema) in fields {
				match (object.get(name), field_schema) {
					(Some(field), Schema::Optional(inner)) => {
						path.push(PathSeg::Key(name.clone()));
						check(inner, field, path, issues);
						path.pop();
					}
					(Some(field), _) => {
						path.push(PathSeg::Key(name.clone()));
						check(field_schema, field, path, issues);
						path.pop();
					}
					(None, Schema::Optional(_)) => {}
					(None, _) => {
						path.push(PathSeg::Key(name.clone()));
						issues.push(Issue::new(path, "missing required field"));
						path.pop();
					}
				}
			}
			for key in object.keys() {
				if !fields.iter().any(|(name, _)| name == key) {
					path.push(PathSeg::Key(key.clone()));
					issues.push(Issue::new(path, "unknown field"));
					path.pop();
				}
			}
		}
		Schema::List(element) => {
			let Some(items) = value.as_list() else {
				mismatch("list", value, path, issues);
				return;
			};
			for (i, item) in items.iter().enumerate() {
				path.push(PathSeg::Index(i));
				check(element, item, path, issues);
				path.pop();
			}
		}
		Schema::Map(key_schema, value_schema) => {
			let Value::Map(pairs) = value else {
				mismatch("map", value, path, issues);
				return;
			};
			for (i, (k, v)) in pairs.iter().enumerate() {
				path.push(PathSeg::Index(i));
				check(key_schema, k, path, issues);
				check(value_schema, v, path, issues);
				path.pop();
			}
		}
		Schema::Set(member) => {
			let Value::Set(items) = value else {
				mismatch("set", value, path, issues);
				return;
			};
			for (i, item) in items.iter().enumerate() {
				path.push(PathSeg::Index(i));
				check(member, item, path, issues);
				path.pop();
			}
		}
		// Optional only affects field presence; a present value must match.
		Schema::Optional(inner) => check(inner, value, path, issues),
		Schema::Nullable(inner) => {
			if !value.is_null() {
				check(inner, value, path, issues);
			}
		}
		Schema::Union(alternatives) => {
			let mut failures = Vec::new();
			for alternative in alternatives {
				let mut sub = Vec::new();
				check(alternative, value, &mut Vec::new(), &mut sub);
				if sub.is_empty() {
					return;
				}
				failures.push(sub);
			}
			let summary = failures
				.iter()
				.filter_map(|sub| sub.first())
				.map(ToString::to_string)
				.collect::<Vec<_>>()
				.join(", ");
			issues.push(Issue::new(
				path,
				format!("matched no union alternative ({summary})"),
			));
		}
	}
}

#[cfg(test)]
mod tests {
	use covenant_wire::parse;

	use super::*;

	fn user_schema() -> Schema {
		Schema::object([
			("name", Schema::String),
			("age", Schema::Int),
			("nickname", Schema::optional(Schema::String)),
			("tags", Schema::list(Schema::String)),
		])
	}

	#[test]
	fn accepts_matching_object() {
		let value = parse(r#"{"name": "ada", "age": 36, "tags": ["math"]}"#).unwrap();
		assert!(user_schema().validate(&value).is_ok());
	}

	#[test]
	fn reports_paths_for_nested_failures() {
		let value = parse(r#"{"name": "ada", "age": 36, "tags": ["math", 7]}"#).unwrap();
		let issues = user_schema().validate(&value).unwrap_err();
		assert_eq!(
			issues.to_string(),
			"at value.tags[1]: expected string, found number"
		);
	}

	#[test]
	fn rejects_missing_and_unknown_fields() {
		let value = parse(r#"{"name": "ada", "age": 36, "tags": [], "extra": 1}"#).unwrap();
		let issues = user_schema().validate(&value).unwrap_err();
		assert!(issues.to_string().contains("unknown field"));

		let value = parse(r#"{"name": "ada", "tags": []}"#).unwrap();
		let issues = user_schema().validate(&value).unwrap_err();
		assert!(issues.to_string().contains("at value.age: missing required field"));
	}

	#[test]
	fn optional_fields_may_be_absent_but_not_wrong() {
		let with = parse(r#"{"name": "a", "age": 1, "nickname": 5, "tags": []}"#).unwrap();
		assert!(user_schema().validate(&with).is_err());
	}

	#[test]
	fn int_rejects_fractions_and_non_finite() {
		assert!(Schema::Int.validate(&parse("3").unwrap()).is_ok());
		assert!(Schema::Int.validate(&parse("3.5").unwrap()).is_err());
		assert!(Schema::Int.validate(&parse("NaN").unwrap()).is_err());
		assert!(Schema::Number.validate(&parse("NaN").unwrap()).is_ok());
	}

	#[test]
	fn literal_matches_exactly() {
		let schema = Schema::Literal(Value::from("query"));
		assert!(schema.validate(&Value::from("query")).is_ok());
		let issues = schema.validate(&Value::from("mutation")).unwrap_err();
		assert!(issues.to_string().contains("expected literal \"query\""));
	}

	#[test]
	fn union_tries_alternatives_in_order() {
		let schema = Schema::Union(vec![Schema::String, Schema::Int]);
		assert!(schema.validate(&Value::from("x")).is_ok());
		assert!(schema.validate(&Value::from(3.0)).is_ok());
		let issues = schema.validate(&Value::Null).unwrap_err();
		assert!(issues.to_string().contains("matched no union alternative"));
	}

	#[test]
	fn nullable_accepts_null() {
		let schema = Schema::nullable(Schema::String);
		assert!(schema.validate(&Value::Null).is_ok());
		assert!(schema.validate(&Value::from("x")).is_ok());
		assert!(schema.validate(&Value::from(1.0)).is_err());
	}

	#[test]
	fn map_and_set_check_members() {
		let schema = Schema::map(Schema::Date, Schema::String);
		let ok = Value::Map(vec![(Value::Date(0), Value::from("epoch"))]);
		assert!(schema.validate(&ok).is_ok());
		let bad = Value::Map(vec![(Value::from(0.0), Value::from("epoch"))]);
		assert!(schema.validate(&bad).is_err());

		let schema = Schema::set(Schema::Int);
		assert!(schema.validate(&Value::Set(vec![Value::from(1.0)])).is_ok());
		assert!(schema.validate(&Value::List(vec![])).is_err());
	}
}
