//! Non-fatal warning channel
//!
//! Misusing a field array (mutating it without a form, or writing through an
//! entry that was already removed) must never corrupt form state. The offending
//! operation becomes a no-op and a [`FormWarning`] is emitted instead.
//!
//! Warnings are logged through `tracing` and delivered to every live
//! [`WarningCapture`] on the current thread:
//!
//! ```
//! use formwork_forms::warning::{self, FormWarning};
//!
//! let capture = warning::capture();
//! warning::emit(FormWarning::NoFormContext {
//!     path: "users".to_string(),
//!     operation: "push",
//! });
//! assert_eq!(capture.warnings().len(), 1);
//! ```

use core::cell::RefCell;
use std::rc::{Rc, Weak};

/// Recoverable misuse reported by the field-array engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormWarning {
	#[error("Field array `{path}` is not inside a form; `{operation}` was ignored")]
	NoFormContext {
		path: String,
		operation: &'static str,
	},
	#[error("Attempting to update a non-existent array item (key {key}) of `{path}`")]
	StaleEntry { path: String, key: u64 },
}

type Sink = Rc<RefCell<Vec<FormWarning>>>;

thread_local! {
	static LISTENERS: RefCell<Vec<Weak<RefCell<Vec<FormWarning>>>>> = const { RefCell::new(Vec::new()) };
}

/// Report a warning
pub fn emit(warning: FormWarning) {
	tracing::warn!(%warning, "form misuse");

	let sinks: Vec<Sink> = LISTENERS.with(|listeners| {
		let mut listeners = listeners.borrow_mut();
		listeners.retain(|listener| listener.strong_count() > 0);
		listeners.iter().filter_map(Weak::upgrade).collect()
	});
	for sink in sinks {
		sink.borrow_mut().push(warning.clone());
	}
}

/// Start collecting warnings emitted on this thread until the capture is dropped
pub fn capture() -> WarningCapture {
	let sink: Sink = Rc::new(RefCell::new(Vec::new()));
	LISTENERS.with(|listeners| listeners.borrow_mut().push(Rc::downgrade(&sink)));
	WarningCapture { sink }
}

/// Collector returned by [`capture`]
pub struct WarningCapture {
	sink: Sink,
}

impl WarningCapture {
	/// Warnings received so far
	pub fn warnings(&self) -> Vec<FormWarning> {
		self.sink.borrow().clone()
	}

	/// Drain the received warnings
	pub fn take(&self) -> Vec<FormWarning> {
		core::mem::take(&mut *self.sink.borrow_mut())
	}

	pub fn is_empty(&self) -> bool {
		self.sink.borrow().is_empty()
	}
}
