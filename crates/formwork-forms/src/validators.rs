//! Built-in field rules
//!
//! A small, serializable rule set used by [`crate::schema::RuleSchema`] and by
//! fields registered with their own [`Rules`]. Anything richer belongs in a
//! custom [`crate::schema::Schema`].
//!
//! Every rule except [`Rule::Required`] accepts an undefined or empty value, so
//! optional fields only need presence checks when they are actually required.
//!
//! ## Example
//!
//! ```
//! use formwork_forms::validators::Rules;
//! use serde_json::json;
//!
//! let rules = Rules::new().required().min_length(3);
//!
//! assert!(rules.check(Some(&json!("Ada"))).is_empty());
//! assert_eq!(
//!     rules.check(Some(&json!("Al"))),
//!     vec!["This field must be at least 3 characters long".to_string()]
//! );
//! assert_eq!(rules.check(None), vec!["This field is required".to_string()]);
//! ```

use core::fmt;
use std::borrow::Cow;
use std::sync::{LazyLock, OnceLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{FormError, FormResult};

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("EMAIL_REGEX: invalid regex pattern")
});

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^https?://[^\s/$.?#].[^\s]*$").expect("URL_REGEX: invalid regex pattern")
});

/// Regular expression source, compiled the first time it is needed
///
/// Clones share the compiled expression once it exists.
#[derive(Clone)]
pub struct Pattern {
	source: String,
	compiled: OnceLock<Result<Regex, String>>,
}

impl Pattern {
	pub fn new(source: impl Into<String>) -> Self {
		Self {
			source: source.into(),
			compiled: OnceLock::new(),
		}
	}

	pub fn as_str(&self) -> &str {
		&self.source
	}

	/// The compiled expression, or the reason it does not compile
	pub fn regex(&self) -> Result<&Regex, &str> {
		self.compiled
			.get_or_init(|| Regex::new(&self.source).map_err(|e| e.to_string()))
			.as_ref()
			.map_err(String::as_str)
	}
}

impl PartialEq for Pattern {
	fn eq(&self, other: &Self) -> bool {
		self.source == other.source
	}
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Pattern").field(&self.source).finish()
	}
}

impl From<&str> for Pattern {
	fn from(source: &str) -> Self {
		Self::new(source)
	}
}

impl From<String> for Pattern {
	fn from(source: String) -> Self {
		Self::new(source)
	}
}

impl Serialize for Pattern {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.source)
	}
}

impl<'de> Deserialize<'de> for Pattern {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		String::deserialize(deserializer).map(Self::new)
	}
}

/// A single validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Rule {
	/// Rejects undefined values, empty strings and empty arrays
	Required {
		#[serde(default)]
		message: Option<String>,
	},
	/// Minimum number of characters (strings) or items (arrays)
	MinLength {
		min: usize,
		#[serde(default)]
		message: Option<String>,
	},
	/// Maximum number of characters (strings) or items (arrays)
	MaxLength {
		max: usize,
		#[serde(default)]
		message: Option<String>,
	},
	Email {
		#[serde(default)]
		message: Option<String>,
	},
	Url {
		#[serde(default)]
		message: Option<String>,
	},
	/// Value must match the regular expression
	Pattern {
		pattern: Pattern,
		#[serde(default)]
		message: Option<String>,
	},
}

impl Rule {
	/// Validate a value, returning the error message on failure
	pub fn check(&self, value: Option<&Value>) -> Result<(), String> {
		if let Self::Required { message } = self {
			return if is_blank(value) {
				Err(message_or(message, "This field is required"))
			} else {
				Ok(())
			};
		}

		let Some(value) = value.filter(|v| !is_blank(Some(v))) else {
			return Ok(());
		};

		match self {
			Self::Required { .. } => Ok(()),
			Self::MinLength { min, message } => match length_of(value) {
				Some(len) if len >= *min => Ok(()),
				_ => Err(message_or(
					message,
					&format!("This field must be at least {} characters long", min),
				)),
			},
			Self::MaxLength { max, message } => match length_of(value) {
				Some(len) if len <= *max => Ok(()),
				_ => Err(message_or(
					message,
					&format!("This field must be at most {} characters long", max),
				)),
			},
			Self::Email { message } => {
				matches_regex(&EMAIL_REGEX, value, message, "Enter a valid email address")
			}
			Self::Url { message } => matches_regex(&URL_REGEX, value, message, "Enter a valid URL"),
			Self::Pattern { pattern, message } => {
				let regex = pattern
					.regex()
					.map_err(|reason| format!("Invalid pattern: {}", reason))?;
				matches_regex(regex, value, message, "This field has an invalid format")
			}
		}
	}
}

fn message_or(message: &Option<String>, default: &str) -> String {
	message.clone().unwrap_or_else(|| default.to_string())
}

fn is_blank(value: Option<&Value>) -> bool {
	match value {
		None | Some(Value::Null) => true,
		Some(Value::String(text)) => text.is_empty(),
		Some(Value::Array(items)) => items.is_empty(),
		Some(_) => false,
	}
}

fn as_text(value: &Value) -> Option<Cow<'_, str>> {
	match value {
		Value::String(text) => Some(Cow::Borrowed(text.as_str())),
		Value::Number(number) => Some(Cow::Owned(number.to_string())),
		Value::Bool(flag) => Some(Cow::Owned(flag.to_string())),
		_ => None,
	}
}

fn length_of(value: &Value) -> Option<usize> {
	match value {
		Value::Array(items) => Some(items.len()),
		other => as_text(other).map(|text| text.chars().count()),
	}
}

fn matches_regex(
	regex: &Regex,
	value: &Value,
	message: &Option<String>,
	default: &str,
) -> Result<(), String> {
	match as_text(value) {
		Some(text) if regex.is_match(&text) => Ok(()),
		_ => Err(message_or(message, default)),
	}
}

/// An ordered list of rules applied to one value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rules {
	rules: Vec<Rule>,
}

impl Rules {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn rule(mut self, rule: Rule) -> Self {
		self.rules.push(rule);
		self
	}

	pub fn required(self) -> Self {
		self.rule(Rule::Required { message: None })
	}

	pub fn min_length(self, min: usize) -> Self {
		self.rule(Rule::MinLength { min, message: None })
	}

	pub fn max_length(self, max: usize) -> Self {
		self.rule(Rule::MaxLength { max, message: None })
	}

	pub fn email(self) -> Self {
		self.rule(Rule::Email { message: None })
	}

	pub fn url(self) -> Self {
		self.rule(Rule::Url { message: None })
	}

	pub fn pattern(self, pattern: impl Into<Pattern>) -> Self {
		self.rule(Rule::Pattern {
			pattern: pattern.into(),
			message: None,
		})
	}

	pub fn rules(&self) -> &[Rule] {
		&self.rules
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	/// Run every rule and collect the failure messages in rule order
	pub fn check(&self, value: Option<&Value>) -> Vec<String> {
		self.rules
			.iter()
			.filter_map(|rule| rule.check(value).err())
			.collect()
	}

	/// Reject rules that can never run, such as unparsable patterns
	///
	/// Patterns are compiled here, so later checks reuse them.
	pub fn ensure_valid(&self, field: &str) -> FormResult<()> {
		for rule in &self.rules {
			if let Rule::Pattern { pattern, .. } = rule {
				pattern.regex().map_err(|reason| FormError::InvalidRule {
					field: field.to_string(),
					reason: reason.to_string(),
				})?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	#[case(None, false)]
	#[case(Some(json!(null)), false)]
	#[case(Some(json!("")), false)]
	#[case(Some(json!([])), false)]
	#[case(Some(json!("x")), true)]
	#[case(Some(json!(0)), true)]
	#[case(Some(json!(false)), true)]
	fn test_required(#[case] value: Option<Value>, #[case] ok: bool) {
		let rule = Rule::Required { message: None };
		assert_eq!(rule.check(value.as_ref()).is_ok(), ok);
	}

	#[rstest]
	fn test_email_validator() {
		let rules = Rules::new().email();

		assert!(rules.check(Some(&json!("user@example.com"))).is_empty());
		assert!(!rules.check(Some(&json!("bad-addr@"))).is_empty());
		assert!(!rules.check(Some(&json!("@example.com"))).is_empty());
		// Optional: empty passes unless required
		assert!(rules.check(Some(&json!(""))).is_empty());
	}

	#[rstest]
	fn test_url_validator() {
		let rules = Rules::new().url();

		assert!(rules.check(Some(&json!("https://example.com"))).is_empty());
		assert!(!rules.check(Some(&json!("ftp://example.com"))).is_empty());
	}

	#[rstest]
	fn test_length_rules_on_strings_and_arrays() {
		let rules = Rules::new().min_length(2).max_length(3);

		assert!(rules.check(Some(&json!("ab"))).is_empty());
		assert_eq!(rules.check(Some(&json!("a"))).len(), 1);
		assert_eq!(rules.check(Some(&json!("abcd"))).len(), 1);
		assert!(rules.check(Some(&json!([1, 2, 3]))).is_empty());
		assert_eq!(rules.check(Some(&json!([1, 2, 3, 4]))).len(), 1);
	}

	#[rstest]
	fn test_custom_message_and_pattern() {
		let rules = Rules::new().rule(Rule::Pattern {
			pattern: Pattern::new("^[A-Z]{3}$"),
			message: Some("Code must be 3 uppercase letters".to_string()),
		});

		assert!(rules.check(Some(&json!("ABC"))).is_empty());
		assert_eq!(
			rules.check(Some(&json!("abc"))),
			vec!["Code must be 3 uppercase letters".to_string()]
		);
	}

	#[rstest]
	fn test_ensure_valid_rejects_bad_pattern() {
		let rules = Rules::new().pattern("(unclosed");

		let err = rules.ensure_valid("code").unwrap_err();
		assert!(matches!(err, FormError::InvalidRule { ref field, .. } if field == "code"));
		assert!(Rules::new().email().ensure_valid("email").is_ok());
	}

	#[rstest]
	fn test_pattern_is_compiled_once_and_shared_by_clones() {
		let rules = Rules::new().pattern("^[0-9]+$");
		rules.ensure_valid("code").unwrap();
		let copy = rules.clone();

		let Rule::Pattern { pattern: original, .. } = &rules.rules()[0] else {
			panic!("expected a pattern rule");
		};
		let Rule::Pattern { pattern: cloned, .. } = &copy.rules()[0] else {
			panic!("expected a pattern rule");
		};
		assert!(core::ptr::eq(original.regex().unwrap(), original.regex().unwrap()));
		assert_eq!(cloned.regex().unwrap().as_str(), "^[0-9]+$");
		assert!(copy.check(Some(&json!("123"))).is_empty());
		assert_eq!(copy.check(Some(&json!("12a"))).len(), 1);
	}

	#[rstest]
	fn test_unparsable_pattern_fails_the_check() {
		let rules = Rules::new().pattern("(unclosed");

		let messages = rules.check(Some(&json!("x")));

		assert_eq!(messages.len(), 1);
		assert!(messages[0].starts_with("Invalid pattern: "));
	}

	#[rstest]
	fn test_rules_deserialize_from_json() {
		let rules: Rules = serde_json::from_value(json!([
			{ "type": "required" },
			{ "type": "min_length", "min": 2, "message": "Too short" }
		]))
		.unwrap();

		assert_eq!(rules.rules().len(), 2);
		assert_eq!(rules.check(Some(&json!("a"))), vec!["Too short".to_string()]);
	}
}
