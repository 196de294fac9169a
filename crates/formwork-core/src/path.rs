//! Path Resolver
//!
//! Addresses a value inside an arbitrary nested `serde_json::Value` tree using
//! dotted and bracketed paths such as `users[1].name`.
//!
//! ## Syntax
//!
//! - Dot separated names: `address.city`
//! - Bracketed indices: `users[0]`, `matrix[1][2]`
//! - All-digit dot segments are indices too: `users.0.name` is `users[0].name`
//!
//! Every path has a canonical display form (`users[0].name`), so paths parsed from
//! different spellings compare equal.
//!
//! ## Example
//!
//! ```
//! use formwork_core::path::{self, FieldPath};
//! use serde_json::json;
//!
//! let mut tree = json!({});
//! let path = FieldPath::parse("users[1].name").unwrap();
//!
//! assert!(path::set(&mut tree, &path, json!("Ada")));
//! assert_eq!(tree, json!({ "users": [null, { "name": "Ada" }] }));
//! assert_eq!(path::get(&tree, &path), Some(&json!("Ada")));
//! ```

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Malformed path syntax.
///
/// These indicate a caller bug rather than recoverable form state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
	#[error("Field path must not be empty")]
	Empty,
	#[error("Empty segment at byte {position} in field path `{path}`")]
	EmptySegment { path: String, position: usize },
	#[error("Unclosed bracket in field path `{path}`")]
	UnclosedBracket { path: String },
	#[error("Invalid array index `{segment}` in field path `{path}`")]
	InvalidIndex { path: String, segment: String },
	#[error("Unexpected character `{character}` at byte {position} in field path `{path}`")]
	UnexpectedCharacter {
		path: String,
		character: char,
		position: usize,
	},
}

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
	/// Object member name
	Key(String),
	/// Array position
	Index(usize),
}

impl PathSegment {
	/// Returns the index if this is an [`PathSegment::Index`] segment
	pub fn as_index(&self) -> Option<usize> {
		match self {
			Self::Index(index) => Some(*index),
			Self::Key(_) => None,
		}
	}
}

/// A parsed path into a value tree.
///
/// `FieldPath` is ordered and hashable so it can key error bags and registries.
/// The empty path ([`FieldPath::root`]) addresses the whole tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath {
	segments: Vec<PathSegment>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ParseState {
	Start,
	Key,
	AfterDot,
	AfterIndex,
}

impl FieldPath {
	/// Parse a path such as `users[1].name`
	///
	/// # Examples
	///
	/// ```
	/// use formwork_core::path::{FieldPath, PathSegment};
	///
	/// let path = FieldPath::parse("users.1.name").unwrap();
	/// assert_eq!(path.to_string(), "users[1].name");
	/// assert_eq!(path.segments()[1], PathSegment::Index(1));
	///
	/// assert!(FieldPath::parse("users[").is_err());
	/// ```
	pub fn parse(raw: &str) -> Result<Self, PathError> {
		if raw.is_empty() {
			return Err(PathError::Empty);
		}

		let mut segments = Vec::new();
		let mut key = String::new();
		let mut state = ParseState::Start;
		let mut chars = raw.char_indices();

		while let Some((position, character)) = chars.next() {
			match character {
				'.' => match state {
					ParseState::Key => {
						segments.push(Self::key_segment(raw, core::mem::take(&mut key))?);
						state = ParseState::AfterDot;
					}
					ParseState::AfterIndex => state = ParseState::AfterDot,
					ParseState::Start | ParseState::AfterDot => {
						return Err(PathError::EmptySegment {
							path: raw.to_string(),
							position,
						});
					}
				},
				'[' => {
					match state {
						ParseState::Key => {
							segments.push(Self::key_segment(raw, core::mem::take(&mut key))?);
						}
						ParseState::AfterDot => {
							return Err(PathError::EmptySegment {
								path: raw.to_string(),
								position,
							});
						}
						ParseState::Start | ParseState::AfterIndex => {}
					}

					let mut digits = String::new();
					let mut closed = false;
					for (_, inner) in chars.by_ref() {
						if inner == ']' {
							closed = true;
							break;
						}
						digits.push(inner);
					}
					if !closed {
						return Err(PathError::UnclosedBracket {
							path: raw.to_string(),
						});
					}
					let index = Self::parse_index(&digits).ok_or_else(|| PathError::InvalidIndex {
						path: raw.to_string(),
						segment: digits.clone(),
					})?;
					segments.push(PathSegment::Index(index));
					state = ParseState::AfterIndex;
				}
				']' => {
					return Err(PathError::UnexpectedCharacter {
						path: raw.to_string(),
						character,
						position,
					});
				}
				_ => {
					if state == ParseState::AfterIndex {
						return Err(PathError::UnexpectedCharacter {
							path: raw.to_string(),
							character,
							position,
						});
					}
					key.push(character);
					state = ParseState::Key;
				}
			}
		}

		match state {
			ParseState::Key => segments.push(Self::key_segment(raw, key)?),
			ParseState::AfterDot => {
				return Err(PathError::EmptySegment {
					path: raw.to_string(),
					position: raw.len(),
				});
			}
			ParseState::Start | ParseState::AfterIndex => {}
		}

		Ok(Self { segments })
	}

	fn parse_index(digits: &str) -> Option<usize> {
		if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
			return None;
		}
		digits.parse().ok()
	}

	fn key_segment(raw: &str, key: String) -> Result<PathSegment, PathError> {
		if key.bytes().all(|b| b.is_ascii_digit()) {
			return Self::parse_index(&key)
				.map(PathSegment::Index)
				.ok_or(PathError::InvalidIndex {
					path: raw.to_string(),
					segment: key,
				});
		}
		Ok(PathSegment::Key(key))
	}

	/// The empty path, addressing the whole tree
	pub fn root() -> Self {
		Self::default()
	}

	/// Build a path from already validated segments
	pub fn from_segments(segments: Vec<PathSegment>) -> Self {
		Self { segments }
	}

	pub fn segments(&self) -> &[PathSegment] {
		&self.segments
	}

	pub fn is_root(&self) -> bool {
		self.segments.is_empty()
	}

	pub fn len(&self) -> usize {
		self.segments.len()
	}

	pub fn is_empty(&self) -> bool {
		self.segments.is_empty()
	}

	pub fn last(&self) -> Option<&PathSegment> {
		self.segments.last()
	}

	/// Path of the enclosing container, `None` for the root
	pub fn parent(&self) -> Option<FieldPath> {
		let (_, parents) = self.segments.split_last()?;
		Some(Self::from_segments(parents.to_vec()))
	}

	/// Append an object member name
	pub fn child_key(&self, key: impl Into<String>) -> FieldPath {
		let mut segments = self.segments.clone();
		segments.push(PathSegment::Key(key.into()));
		Self { segments }
	}

	/// Append an array position
	///
	/// # Examples
	///
	/// ```
	/// use formwork_core::path::FieldPath;
	///
	/// let users = FieldPath::parse("users").unwrap();
	/// assert_eq!(users.child_index(2).to_string(), "users[2]");
	/// ```
	pub fn child_index(&self, index: usize) -> FieldPath {
		let mut segments = self.segments.clone();
		segments.push(PathSegment::Index(index));
		Self { segments }
	}

	/// Whether `prefix` is this path or one of its ancestors
	pub fn starts_with(&self, prefix: &FieldPath) -> bool {
		self.segments.starts_with(&prefix.segments)
	}

	/// The segments remaining after `prefix`, if `prefix` is an ancestor (or equal)
	pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<&[PathSegment]> {
		self.segments.strip_prefix(prefix.segments.as_slice())
	}

	/// Whether one path is an ancestor of (or equal to) the other
	pub fn is_related(&self, other: &FieldPath) -> bool {
		self.starts_with(other) || other.starts_with(self)
	}

	/// Copy of this path with the segment at `position` replaced
	pub fn with_segment(&self, position: usize, segment: PathSegment) -> FieldPath {
		let mut segments = self.segments.clone();
		if let Some(slot) = segments.get_mut(position) {
			*slot = segment;
		}
		Self { segments }
	}
}

impl fmt::Display for FieldPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (position, segment) in self.segments.iter().enumerate() {
			match segment {
				PathSegment::Key(key) if position == 0 => write!(f, "{}", key)?,
				PathSegment::Key(key) => write!(f, ".{}", key)?,
				PathSegment::Index(index) => write!(f, "[{}]", index)?,
			}
		}
		Ok(())
	}
}

impl FromStr for FieldPath {
	type Err = PathError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		Self::parse(raw)
	}
}

impl TryFrom<&str> for FieldPath {
	type Error = PathError;

	fn try_from(raw: &str) -> Result<Self, Self::Error> {
		Self::parse(raw)
	}
}

impl Serialize for FieldPath {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for FieldPath {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::parse(&raw).map_err(serde::de::Error::custom)
	}
}

/// Conversion used by APIs that accept either a parsed path or a string
pub trait IntoFieldPath {
	fn into_field_path(self) -> Result<FieldPath, PathError>;
}

impl IntoFieldPath for FieldPath {
	fn into_field_path(self) -> Result<FieldPath, PathError> {
		Ok(self)
	}
}

impl IntoFieldPath for &FieldPath {
	fn into_field_path(self) -> Result<FieldPath, PathError> {
		Ok(self.clone())
	}
}

impl IntoFieldPath for &str {
	fn into_field_path(self) -> Result<FieldPath, PathError> {
		FieldPath::parse(self)
	}
}

impl IntoFieldPath for String {
	fn into_field_path(self) -> Result<FieldPath, PathError> {
		FieldPath::parse(&self)
	}
}

impl IntoFieldPath for &String {
	fn into_field_path(self) -> Result<FieldPath, PathError> {
		FieldPath::parse(self)
	}
}

/// Read the value at `path`.
///
/// Never fails: a missing slot or a container of the wrong kind yields `None`.
pub fn get<'a>(tree: &'a Value, path: &FieldPath) -> Option<&'a Value> {
	path.segments
		.iter()
		.try_fold(tree, |node, segment| match (segment, node) {
			(PathSegment::Key(key), Value::Object(map)) => map.get(key),
			(PathSegment::Index(index), Value::Array(items)) => items.get(*index),
			_ => None,
		})
}

/// Mutable counterpart of [`get`]
pub fn get_mut<'a>(tree: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
	path.segments
		.iter()
		.try_fold(tree, |node, segment| match (segment, node) {
			(PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
			(PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index),
			_ => None,
		})
}

/// Largest number of `null` slots [`set`] pads an array with
pub const MAX_INDEX_GAP: usize = 1 << 16;

/// Write `value` at `path`, creating missing containers on the way.
///
/// Undefined (`null` or missing) slots become arrays before index segments and
/// objects before name segments; arrays are padded with `null` when writing past
/// their end. Returns `false` without touching the tree when an existing value
/// has the wrong kind for the next segment, or when an index lies more than
/// [`MAX_INDEX_GAP`] slots past the end of its array.
pub fn set(tree: &mut Value, path: &FieldPath, value: Value) -> bool {
	if !is_writable(tree, path) {
		return false;
	}
	let mut node = tree;
	for segment in &path.segments {
		node = match slot_mut(node, segment) {
			Some(slot) => slot,
			None => return false,
		};
	}
	*node = value;
	true
}

fn slot_mut<'a>(node: &'a mut Value, segment: &PathSegment) -> Option<&'a mut Value> {
	if node.is_null() {
		*node = match segment {
			PathSegment::Key(_) => Value::Object(Map::new()),
			PathSegment::Index(_) => Value::Array(Vec::new()),
		};
	}
	match (segment, node) {
		(PathSegment::Key(key), Value::Object(map)) => {
			Some(map.entry(key.clone()).or_insert(Value::Null))
		}
		(PathSegment::Index(index), Value::Array(items)) => {
			if items.len() <= *index {
				items.resize(index.checked_add(1)?, Value::Null);
			}
			items.get_mut(*index)
		}
		_ => None,
	}
}

/// Dry run of [`set`]: whether every segment can be written without mutating
fn is_writable(tree: &Value, path: &FieldPath) -> bool {
	let mut node = Some(tree);
	for segment in &path.segments {
		let existing = node.filter(|value| !value.is_null());
		node = match (segment, existing) {
			(PathSegment::Key(key), Some(Value::Object(map))) => map.get(key),
			(PathSegment::Index(index), Some(Value::Array(items))) => {
				if !within_gap(*index, items.len()) {
					return false;
				}
				items.get(*index)
			}
			(PathSegment::Key(_), None) => None,
			(PathSegment::Index(index), None) => {
				if !within_gap(*index, 0) {
					return false;
				}
				None
			}
			_ => return false,
		};
	}
	true
}

fn within_gap(index: usize, len: usize) -> bool {
	index.saturating_sub(len) <= MAX_INDEX_GAP
}

/// Delete the value at `path`: object members are removed, array slots are
/// spliced out so later items shift left.
pub fn remove(tree: &mut Value, path: &FieldPath) -> Option<Value> {
	let (last, parents) = path.segments.split_last()?;
	let parent = get_mut(tree, &FieldPath::from_segments(parents.to_vec()))?;
	match (last, parent) {
		(PathSegment::Key(key), Value::Object(map)) => map.remove(key),
		(PathSegment::Index(index), Value::Array(items)) if *index < items.len() => {
			Some(items.remove(*index))
		}
		_ => None,
	}
}

/// Whether the value counts as undefined (missing or `null`)
pub fn is_undefined(value: Option<&Value>) -> bool {
	matches!(value, None | Some(Value::Null))
}
