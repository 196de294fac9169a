//! Error types for form operations

use formwork_core::path::PathError;

/// Errors surfaced by the form store.
///
/// Only caller bugs end up here. Failed validation is reported through error
/// lists and misuse of a field array through [`crate::warning::FormWarning`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
	#[error(transparent)]
	Path(#[from] PathError),
	#[error("No form context is active; `{operation}` requires an enclosing form")]
	NoFormContext { operation: &'static str },
	#[error("Invalid rule for `{field}`: {reason}")]
	InvalidRule { field: String, reason: String },
}

pub type FormResult<T> = Result<T, FormError>;
