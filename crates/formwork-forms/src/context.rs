//! Form context
//!
//! Components deep inside a form find it through a thread-local stack instead
//! of threading a [`Form`] through every call. [`provide_form_context`] pushes
//! a form for the lifetime of the returned [`FormScope`]; the `use_*` hooks
//! read the innermost one.
//!
//! ## Example
//!
//! ```
//! use formwork_forms::context::{provide_form_context, use_field_array};
//! use formwork_forms::store::Form;
//! use serde_json::json;
//!
//! let form = Form::with_initial(json!({ "users": [] }));
//! {
//!     let _scope = provide_form_context(&form);
//!     let users = use_field_array("users").unwrap();
//!     users.push(json!("one"));
//! }
//! assert_eq!(form.get_value("users").unwrap(), Some(json!(["one"])));
//!
//! // Outside any scope the array is detached and mutations are ignored
//! let users = use_field_array("users").unwrap();
//! users.push(json!("two"));
//! assert!(users.is_detached());
//! ```

use core::cell::RefCell;

use formwork_core::path::IntoFieldPath;

use crate::error::{FormError, FormResult};
use crate::field::FieldHandle;
use crate::field_array::FieldArray;
use crate::store::Form;

thread_local! {
	static FORM_STACK: RefCell<Vec<Form>> = const { RefCell::new(Vec::new()) };
}

/// Guard returned by [`provide_form_context`]
#[must_use = "the form is only provided while the scope is alive"]
pub struct FormScope {
	form: Form,
}

impl Drop for FormScope {
	fn drop(&mut self) {
		FORM_STACK.with(|stack| {
			let mut stack = stack.borrow_mut();
			if let Some(position) = stack.iter().rposition(|form| *form == self.form) {
				stack.remove(position);
			}
		});
	}
}

/// Make `form` the current form until the returned scope is dropped
pub fn provide_form_context(form: &Form) -> FormScope {
	FORM_STACK.with(|stack| stack.borrow_mut().push(form.clone()));
	FormScope { form: form.clone() }
}

/// The innermost provided form, if any
pub fn use_form_context() -> Option<Form> {
	FORM_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Acquire the field array at `path` of the current form
///
/// Without a provided form the returned handle is detached: it reports no
/// entries and its mutators emit a warning instead of writing.
///
/// # Errors
///
/// Fails only when `path` is malformed.
pub fn use_field_array(path: impl IntoFieldPath) -> FormResult<FieldArray> {
	let path = path.into_field_path()?;
	Ok(match use_form_context() {
		Some(form) => FieldArray::attach(&form, path),
		None => FieldArray::detached(path),
	})
}

/// Register a field at `path` of the current form
///
/// # Errors
///
/// Fails when `path` is malformed or no form is provided.
pub fn use_field(path: impl IntoFieldPath) -> FormResult<FieldHandle> {
	let path = path.into_field_path()?;
	let form = use_form_context().ok_or(FormError::NoFormContext {
		operation: "use_field",
	})?;
	form.register_field(path)
}
