//! # Formwork
//!
//! Form-state management for Rust: field values, validity and dirty/touched
//! status, exposed as observable state a UI layer re-renders from.
//!
//! The centerpiece is the field-array engine. It keeps a reorderable list of
//! fields in sync with an array anywhere in the form's value tree, gives every
//! item a key that survives inserts, removals and moves, and carries errors and
//! field state along with the items.
//!
//! ## Feature Flags
//!
//! - `forms` (default) - Form store, field registry and field-array engine
//!
//! The path resolver and reactive primitives in [`core`] are always available.
//!
//! ## Quick Example
//!
//! ```rust
//! use formwork::prelude::*;
//!
//! # futures_block_on(async {
//! let form = Form::builder()
//!     .initial_values(json!({ "users": ["ada@example.com"] }))
//!     .schema(RuleSchema::new().field("users[]", Rules::new().email())?)
//!     .build()?;
//!
//! let users = form.field_array("users")?;
//! users.push(json!("bad-addr@"));
//! users.move_item(1, 0);
//!
//! form.flush().await;
//! assert!(!form.meta().valid);
//! assert_eq!(form.field_errors("users[0]")?.len(), 1);
//! # Ok::<(), FormError>(())
//! # }).unwrap();
//! # fn futures_block_on<F: std::future::Future>(future: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(future)
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: `FieldPath` parsing, value-tree `get`/`set`/`remove`,
//!   path-prefix subscriptions and the explicit task queue
//! - [`forms`]: the `Form` store, `FieldArray`, `FieldHandle`, schemas,
//!   built-in rules, form context and warnings

pub mod core;
#[cfg(feature = "forms")]
pub mod forms;

// Re-export path types
pub use formwork_core::{FieldPath, PathError, PathSegment};

// Re-export forms (forms feature)
#[cfg(feature = "forms")]
pub use formwork_forms::{
	Change, ChangeKind, EntryKey, FieldArray, FieldEntry, FieldHandle, FieldMeta, FieldValidation,
	FnSchema, Form, FormBuilder, FormConfig, FormError, FormMeta, FormResult, FormScope,
	FormWarning, Rule, RuleSchema, Rules, Schema, SchemaResult, provide_form_context, use_field,
	use_field_array, use_form_context,
};

// Re-export common external dependencies
pub use async_trait::async_trait;
pub use serde_json::{Value, json};

/// Commonly used types
pub mod prelude {
	pub use crate::{FieldPath, Value, async_trait, json};

	#[cfg(feature = "forms")]
	pub use crate::{
		FieldArray, FieldEntry, FieldHandle, FieldMeta, FnSchema, Form, FormConfig, FormError,
		FormMeta, FormResult, Rules, RuleSchema, Schema, SchemaResult, provide_form_context,
		use_field, use_field_array,
	};
}
