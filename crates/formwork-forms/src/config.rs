//! Form configuration
//!
//! [`FormConfig`] carries everything a form needs before its first render. It
//! is plain data, so it can be built in code or deserialized from JSON:
//!
//! ```
//! use formwork_forms::config::FormConfig;
//! use serde_json::json;
//!
//! let config: FormConfig = serde_json::from_value(json!({
//!     "initial_values": { "users": ["one"] },
//!     "validate_on_mount": true
//! }))
//! .unwrap();
//!
//! assert!(config.validate_on_mount);
//! assert!(config.initial_errors.is_empty());
//! ```

use std::collections::BTreeMap;

use formwork_core::path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FormResult;

/// Initial state and behavior of a form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormConfig {
	/// Starting value tree, also recorded as the initial values
	pub initial_values: Value,
	/// Errors shown before any validation ran, keyed by field path
	pub initial_errors: BTreeMap<String, String>,
	/// Fields that start out touched, keyed by field path
	pub initial_touched: BTreeMap<String, bool>,
	/// Run a silent validation pass on the first flush
	pub validate_on_mount: bool,
}

impl FormConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn initial_values(mut self, values: Value) -> Self {
		self.initial_values = values;
		self
	}

	pub fn initial_error(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
		self.initial_errors.insert(path.into(), message.into());
		self
	}

	pub fn initial_touched(mut self, path: impl Into<String>) -> Self {
		self.initial_touched.insert(path.into(), true);
		self
	}

	pub fn validate_on_mount(mut self, enabled: bool) -> Self {
		self.validate_on_mount = enabled;
		self
	}

	/// Parse the keys of `initial_errors`
	pub(crate) fn parsed_errors(&self) -> FormResult<Vec<(FieldPath, String)>> {
		self.initial_errors
			.iter()
			.map(|(path, message)| -> FormResult<(FieldPath, String)> {
				Ok((FieldPath::parse(path)?, message.clone()))
			})
			.collect()
	}

	/// Parse the keys of `initial_touched`, keeping only the touched ones
	pub(crate) fn parsed_touched(&self) -> FormResult<Vec<FieldPath>> {
		self.initial_touched
			.iter()
			.filter(|(_, touched)| **touched)
			.map(|(path, _)| -> FormResult<FieldPath> { Ok(FieldPath::parse(path)?) })
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::FormError;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	fn test_defaults_when_fields_missing() {
		let config: FormConfig = serde_json::from_value(json!({})).unwrap();

		assert_eq!(config, FormConfig::default());
		assert!(config.initial_values.is_null());
		assert!(!config.validate_on_mount);
	}

	#[rstest]
	fn test_builder_methods() {
		let config = FormConfig::new()
			.initial_values(json!({ "email": "" }))
			.initial_error("email", "Required")
			.initial_touched("email")
			.validate_on_mount(true);

		assert_eq!(
			config.parsed_errors().unwrap(),
			vec![(FieldPath::parse("email").unwrap(), "Required".to_string())]
		);
		assert_eq!(
			config.parsed_touched().unwrap(),
			vec![FieldPath::parse("email").unwrap()]
		);
	}

	#[rstest]
	fn test_untouched_entries_are_skipped() {
		let mut config = FormConfig::new();
		config.initial_touched.insert("name".to_string(), false);

		assert!(config.parsed_touched().unwrap().is_empty());
	}

	#[rstest]
	fn test_malformed_path_is_reported() {
		let config = FormConfig::new().initial_error("users[x]", "Bad");

		assert!(matches!(config.parsed_errors(), Err(FormError::Path(_))));
	}
}
