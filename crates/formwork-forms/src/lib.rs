//! Formwork Forms - form state and field arrays
//!
//! Tracks field values, validity and dirty/touched status for a form and
//! exposes them as observable state a UI re-renders from.
//!
//! ## Architecture
//!
//! - [`store`]: the [`Form`] store holding values, initial values, errors and
//!   field meta, plus the silent validation trigger
//! - [`field_array`]: the reconciliation engine keeping keyed entries in sync
//!   with an array inside the form
//! - [`field`]: mounted fields and their [`FieldMeta`]
//! - [`schema`]: the pluggable [`Schema`] seam, with [`RuleSchema`] and
//!   [`FnSchema`]
//! - [`validators`]: built-in rules
//! - [`context`]: providing a form to nested code
//! - [`warning`]: non-fatal misuse reports
//! - [`config`]: serializable form configuration
//!
//! ## Example
//!
//! ```
//! use formwork_forms::{Form, RuleSchema, Rules};
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let form = Form::builder()
//!     .initial_values(json!({ "users": ["one@example.com"] }))
//!     .schema(RuleSchema::new().field("users[]", Rules::new().required().email()).unwrap())
//!     .build()
//!     .unwrap();
//!
//! let users = form.field_array("users").unwrap();
//! users.push(json!(""));
//! assert!(form.meta().valid);
//!
//! form.flush().await;
//! assert!(!form.meta().valid);
//! assert_eq!(
//!     form.field_errors("users[1]").unwrap(),
//!     vec!["This field is required".to_string()]
//! );
//! # });
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod field;
pub mod field_array;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validators;
pub mod warning;

pub use config::FormConfig;
pub use context::{FormScope, provide_form_context, use_field, use_field_array, use_form_context};
pub use error::{FormError, FormResult};
pub use field::{FieldHandle, FieldMeta};
pub use field_array::{EntryKey, FieldArray, FieldEntry};
pub use registry::FieldId;
pub use schema::{FnSchema, PathPattern, RuleSchema, Schema, SchemaResult};
pub use store::{Change, ChangeKind, FieldValidation, Form, FormBuilder, FormMeta, Subscription, WeakForm};
pub use validators::{Pattern, Rule, Rules};
pub use warning::{FormWarning, WarningCapture};

pub use formwork_core::path::{FieldPath, PathError};
