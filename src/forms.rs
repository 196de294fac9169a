//! Form state, field registry and field arrays
//!
//! This module provides access to formwork-forms: the [`Form`] store, keyed
//! [`FieldArray`]s, registered fields, schemas and built-in rules.
//!
//! ## Example
//!
//! ```rust
//! use formwork::forms::Form;
//! use serde_json::json;
//!
//! let form = Form::with_initial(json!({ "tags": [] }));
//! let tags = form.field_array("tags").unwrap();
//! tags.push(json!("rust"));
//! assert_eq!(tags.len(), 1);
//! ```

pub use formwork_forms::*;
