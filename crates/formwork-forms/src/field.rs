//! Registered fields
//!
//! A [`FieldHandle`] is the mounted side of a field: it keeps the field
//! registered for as long as it lives and exposes the field's value, errors
//! and meta. Array item fields follow their item when the array is reordered;
//! if the item is removed the handle becomes detached and all of its writes
//! are ignored.

use core::fmt;

use formwork_core::path::FieldPath;
use serde_json::Value;

use crate::registry::FieldId;
use crate::store::{FieldValidation, Form};

/// Per-field state derived from the form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMeta {
	pub touched: bool,
	/// The value differs from the initial value
	pub dirty: bool,
	/// A non-silent validation has completed for the field
	pub validated: bool,
	/// A validation of the field is queued or in flight
	pub pending: bool,
	/// The field has no errors
	pub valid: bool,
	pub initial_value: Option<Value>,
}

/// Mounted field; deregisters itself when dropped
pub struct FieldHandle {
	form: Form,
	id: FieldId,
}

impl FieldHandle {
	pub(crate) fn new(form: &Form, id: FieldId) -> Self {
		Self {
			form: form.clone(),
			id,
		}
	}

	pub fn id(&self) -> FieldId {
		self.id
	}

	pub fn form(&self) -> &Form {
		&self.form
	}

	/// Current path, `None` once the field was detached
	pub fn path(&self) -> Option<FieldPath> {
		self.form.field_path(self.id)
	}

	pub fn is_detached(&self) -> bool {
		self.path().is_none()
	}

	pub fn value(&self) -> Option<Value> {
		self.path().and_then(|path| self.form.value_at(&path))
	}

	/// Write the value and schedule validation of this field
	pub fn set_value(&self, value: Value) {
		let Some(path) = self.path() else {
			tracing::debug!(id = ?self.id, "write to detached field ignored");
			return;
		};
		if let Err(error) = self.form.set_field_value(&path, value) {
			tracing::debug!(path = %path, %error, "field write failed");
		}
	}

	pub fn set_touched(&self, touched: bool) {
		if let Some(path) = self.path()
			&& let Err(error) = self.form.set_field_touched(&path, touched)
		{
			tracing::debug!(path = %path, %error, "touch failed");
		}
	}

	/// Mark the field touched and validate it
	pub async fn handle_blur(&self) -> Option<FieldValidation> {
		self.set_touched(true);
		self.validate().await
	}

	/// Validate this field, `None` when detached
	pub async fn validate(&self) -> Option<FieldValidation> {
		let path = self.path()?;
		let validation = self.form.validate_field(&path).ok()?;
		Some(validation.await)
	}

	pub fn errors(&self) -> Vec<String> {
		self.path()
			.map(|path| self.form.errors_at(&path))
			.unwrap_or_default()
	}

	/// First error message, for single-line display
	pub fn error_message(&self) -> Option<String> {
		self.errors().into_iter().next()
	}

	pub fn meta(&self) -> FieldMeta {
		self.path()
			.map(|path| self.form.meta_at(&path))
			.unwrap_or_default()
	}
}

impl Drop for FieldHandle {
	fn drop(&mut self) {
		self.form.unregister_field(self.id);
	}
}

impl fmt::Debug for FieldHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FieldHandle")
			.field("id", &self.id)
			.field("path", &self.path())
			.finish()
	}
}
