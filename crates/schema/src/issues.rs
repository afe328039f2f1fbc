//! Validation issue reporting.

use std::fmt;

/// One step of a path into a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
	/// An object field name.
	Key(String),
	/// A list index.
	Index(usize),
}

/// A single validation failure at one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
	/// Path from the validated root to the offending value.
	pub path: Vec<PathSeg>,
	/// What was wrong there.
	pub message: String,
}

impl Issue {
	pub(crate) fn new(path: &[PathSeg], message: impl Into<String>) -> Self {
		Self {
			path: path.to_vec(),
			message: message.into(),
		}
	}

	fn render_path(&self) -> String {
		let mut out = String::from("value");
		for seg in &self.path {
			match seg {
				PathSeg::Key(key) => {
					out.push('.');
					out.push_str(key);
				}
				PathSeg::Index(i) => {
					out.push_str(&format!("[{i}]"));
				}
			}
		}
		out
	}
}

impl fmt::Display for Issue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "at {}: {}", self.render_path(), self.message)
	}
}

/// A non-empty list of validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issues(pub Vec<Issue>);

impl std::error::Error for Issues {}

impl fmt::Display for Issues {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, issue) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}
			write!(f, "{issue}")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn issue_paths_render() {
		let issue = Issue::new(
			&[
				PathSeg::Key("user".to_string()),
				PathSeg::Index(3),
				PathSeg::Key("name".to_string()),
			],
			"expected string, found number",
		);
		assert_eq!(
			issue.to_string(),
			"at value.user[3].name: expected string, found number"
		);
	}

	#[test]
	fn issues_join_with_semicolons() {
		let issues = Issues(vec![
			Issue::new(&[], "expected object, found null"),
			Issue::new(&[PathSeg::Key("x".to_string())], "missing required field"),
		]);
		assert_eq!(
			issues.to_string(),
			"at value: expected object, found null; at value.x: missing required field"
		);
	}
}
