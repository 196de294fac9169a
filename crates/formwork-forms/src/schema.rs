//! Pluggable schema evaluation
//!
//! A [`Schema`] inspects the whole value tree and reports messages per field
//! path. The form store only depends on this trait; two implementations ship
//! with the crate:
//!
//! - [`FnSchema`] wraps a closure
//! - [`RuleSchema`] applies built-in [`Rules`] to path patterns, where `[]`
//!   matches every element of an array
//!
//! ## Example
//!
//! ```
//! use formwork_forms::schema::{RuleSchema, Schema};
//! use formwork_forms::validators::Rules;
//! use serde_json::json;
//!
//! let schema = RuleSchema::new()
//!     .field("users[]", Rules::new().email())
//!     .unwrap();
//!
//! let result = futures::executor::block_on(
//!     schema.validate(&json!({ "users": ["good@example.com", "bad-addr@"] })),
//! );
//! assert_eq!(result.len(), 1);
//! assert!(result.errors_at(&"users[1]".parse().unwrap()).is_some());
//! ```

use std::collections::BTreeMap;
use std::collections::btree_map;

use async_trait::async_trait;
use formwork_core::path::{self, FieldPath, PathError, PathSegment};
use serde_json::Value;

use crate::error::FormResult;
use crate::validators::Rules;

/// Messages reported by one schema evaluation, keyed by field path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaResult {
	errors: BTreeMap<FieldPath, Vec<String>>,
}

impl SchemaResult {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a message for `path`
	pub fn add(&mut self, path: FieldPath, message: impl Into<String>) {
		self.errors.entry(path).or_default().push(message.into());
	}

	/// Builder-style [`SchemaResult::add`]
	pub fn with_error(mut self, path: FieldPath, message: impl Into<String>) -> Self {
		self.add(path, message);
		self
	}

	pub fn errors_at(&self, path: &FieldPath) -> Option<&[String]> {
		self.errors.get(path).map(Vec::as_slice)
	}

	pub fn is_valid(&self) -> bool {
		self.errors.values().all(Vec::is_empty)
	}

	pub fn len(&self) -> usize {
		self.errors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn iter(&self) -> btree_map::Iter<'_, FieldPath, Vec<String>> {
		self.errors.iter()
	}

	pub(crate) fn into_map(self) -> BTreeMap<FieldPath, Vec<String>> {
		self.errors
	}
}

impl FromIterator<(FieldPath, String)> for SchemaResult {
	fn from_iter<I: IntoIterator<Item = (FieldPath, String)>>(iter: I) -> Self {
		let mut result = Self::new();
		for (path, message) in iter {
			result.add(path, message);
		}
		result
	}
}

/// Whole-form validation
///
/// Implementations receive a snapshot of the value tree and must not assume
/// it is still current when they finish; the store discards results that were
/// superseded while the evaluation was in flight.
#[async_trait(?Send)]
pub trait Schema {
	async fn validate(&self, values: &Value) -> SchemaResult;
}

/// Schema backed by a synchronous closure
pub struct FnSchema<F> {
	validate: F,
}

impl<F> FnSchema<F>
where
	F: Fn(&Value) -> SchemaResult,
{
	pub fn new(validate: F) -> Self {
		Self { validate }
	}
}

#[async_trait(?Send)]
impl<F> Schema for FnSchema<F>
where
	F: Fn(&Value) -> SchemaResult,
{
	async fn validate(&self, values: &Value) -> SchemaResult {
		(self.validate)(values)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternSegment {
	Exact(PathSegment),
	EveryIndex,
}

/// Field path in which `[]` stands for every index of an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
	raw: String,
	segments: Vec<PatternSegment>,
}

impl PathPattern {
	pub fn parse(raw: &str) -> FormResult<Self> {
		let mut segments = Vec::new();
		let mut offset = 0;
		for (position, part) in raw.split("[]").enumerate() {
			if position > 0 {
				segments.push(PatternSegment::EveryIndex);
			}
			let start = offset;
			offset += part.len() + 2;

			let part = match part.chars().next() {
				Some('.') if position > 0 => &part[1..],
				Some(character) if position > 0 && character != '[' => {
					return Err(PathError::UnexpectedCharacter {
						path: raw.to_string(),
						character,
						position: start,
					}
					.into());
				}
				_ => part,
			};
			if part.is_empty() {
				continue;
			}
			let parsed = FieldPath::parse(part)?;
			segments.extend(parsed.segments().iter().cloned().map(PatternSegment::Exact));
		}
		if segments.is_empty() {
			return Err(PathError::Empty.into());
		}
		Ok(Self {
			raw: raw.to_string(),
			segments,
		})
	}

	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Concrete paths in `values` this pattern refers to
	///
	/// Exact segments are produced even when the slot is missing, so presence
	/// rules can report them. `[]` only expands over arrays that exist.
	pub fn expand(&self, values: &Value) -> Vec<FieldPath> {
		let mut paths = vec![FieldPath::root()];
		for segment in &self.segments {
			paths = match segment {
				PatternSegment::Exact(PathSegment::Key(key)) => {
					paths.into_iter().map(|p| p.child_key(key.clone())).collect()
				}
				PatternSegment::Exact(PathSegment::Index(index)) => {
					paths.into_iter().map(|p| p.child_index(*index)).collect()
				}
				PatternSegment::EveryIndex => paths
					.into_iter()
					.flat_map(|p| {
						let len = match path::get(values, &p) {
							Some(Value::Array(items)) => items.len(),
							_ => 0,
						};
						(0..len).map(move |index| p.child_index(index))
					})
					.collect(),
			};
		}
		paths
	}
}

/// Schema built from [`Rules`] attached to path patterns
#[derive(Debug, Clone, Default)]
pub struct RuleSchema {
	fields: Vec<(PathPattern, Rules)>,
}

impl RuleSchema {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach `rules` to `pattern`
	///
	/// # Errors
	///
	/// Returns an error when the pattern is not a valid path or a rule can
	/// never run (for example an unparsable regular expression).
	pub fn field(mut self, pattern: &str, rules: Rules) -> FormResult<Self> {
		rules.ensure_valid(pattern)?;
		self.fields.push((PathPattern::parse(pattern)?, rules));
		Ok(self)
	}

	/// Synchronous evaluation shared by the async trait method
	pub fn check(&self, values: &Value) -> SchemaResult {
		let mut result = SchemaResult::new();
		for (pattern, rules) in &self.fields {
			for field in pattern.expand(values) {
				for message in rules.check(path::get(values, &field)) {
					result.add(field.clone(), message);
				}
			}
		}
		result
	}
}

#[async_trait(?Send)]
impl Schema for RuleSchema {
	async fn validate(&self, values: &Value) -> SchemaResult {
		self.check(values)
	}
}
