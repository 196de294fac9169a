//! Field-array reconciliation engine
//!
//! A [`FieldArray`] keeps a reorderable list of entries in sync with the array
//! stored at one path of a form. Every entry carries a key that identifies the
//! item across inserts, removals and moves, so a UI can keep per-item state
//! (focus, local widgets) attached to the right row.
//!
//! Each mutator is one synchronous transition:
//!
//! 1. the entry list is updated (fresh key on insert)
//! 2. the value tree and the initial-values tree are spliced in lockstep
//! 3. errors, touched/validated state and registered fields under the array
//!    follow their items
//! 4. inserts schedule the form's silent validation pass
//!
//! All handles acquired for the same path of one form share a single binding,
//! and the binding listens to the form so writes made through other APIs are
//! reconciled by position.
//!
//! ## Example
//!
//! ```
//! use formwork_forms::store::Form;
//! use serde_json::json;
//!
//! let form = Form::with_initial(json!({ "users": ["one"] }));
//! let users = form.field_array("users").unwrap();
//!
//! users.push(json!("two"));
//! users.move_item(1, 0);
//!
//! assert_eq!(users.values(), vec![json!("two"), json!("one")]);
//! assert_eq!(form.get_value("users").unwrap(), Some(json!(["two", "one"])));
//! ```

use core::cell::{Cell, RefCell};
use core::fmt;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use formwork_core::path::{FieldPath, PathSegment};
use formwork_core::reactive::SubscriptionId;
use serde_json::Value;

use crate::store::{ChangeKind, Form, WeakForm};
use crate::warning::{self, FormWarning};

/// Stable identity of an array item
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey(u64);

impl EntryKey {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for EntryKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Structural array mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArrayOp {
	Insert(usize),
	Remove(usize),
	Move { from: usize, to: usize },
	Swap(usize, usize),
}

impl ArrayOp {
	/// Where the item previously at `index` ends up; `None` if it was removed
	pub(crate) fn remap(&self, index: usize) -> Option<usize> {
		match *self {
			Self::Insert(at) if index >= at => Some(index + 1),
			Self::Insert(_) => Some(index),
			Self::Remove(at) if index == at => None,
			Self::Remove(at) if index > at => Some(index - 1),
			Self::Remove(_) => Some(index),
			Self::Move { from, to } if index == from => Some(to),
			Self::Move { from, to } if from < to && index > from && index <= to => Some(index - 1),
			Self::Move { from, to } if to < from && index >= to && index < from => Some(index + 1),
			Self::Move { .. } => Some(index),
			Self::Swap(a, b) if index == a => Some(b),
			Self::Swap(a, b) if index == b => Some(a),
			Self::Swap(..) => Some(index),
		}
	}

	/// Re-key `path` if it lies under an item of the array at `array_path`
	pub(crate) fn remap_path(&self, array_path: &FieldPath, path: &FieldPath) -> Option<FieldPath> {
		let position = array_path.len();
		if path.len() <= position || !path.starts_with(array_path) {
			return Some(path.clone());
		}
		match path.segments()[position] {
			PathSegment::Index(index) => self
				.remap(index)
				.map(|next| path.with_segment(position, PathSegment::Index(next))),
			PathSegment::Key(_) => Some(path.clone()),
		}
	}

	/// Reorder `items` for a removal, move or swap whose positions exist
	///
	/// Inserts and out-of-range positions leave `items` untouched.
	pub(crate) fn reorder<T>(&self, items: &mut Vec<T>) {
		let len = items.len();
		match *self {
			Self::Remove(at) if at < len => {
				items.remove(at);
			}
			Self::Move { from, to } if from < len && to < len => {
				let item = items.remove(from);
				items.insert(to, item);
			}
			Self::Swap(a, b) if a < len && b < len => items.swap(a, b),
			_ => {}
		}
	}

	/// Apply the mutation to a value array, padding it with `null` where it is
	/// shorter than the positions involved
	pub(crate) fn apply(&self, items: &mut Vec<Value>, inserted: Option<Value>) {
		let needed = match *self {
			Self::Insert(at) => at,
			Self::Remove(_) => 0,
			Self::Move { from, to } => from.max(to) + 1,
			Self::Swap(a, b) => a.max(b) + 1,
		};
		if items.len() < needed {
			items.resize(needed, Value::Null);
		}
		match *self {
			Self::Insert(at) => items.insert(at, inserted.unwrap_or(Value::Null)),
			_ => self.reorder(items),
		}
	}
}

#[derive(Debug)]
struct EntryState {
	key: EntryKey,
	/// Last value seen for the item; kept after removal
	value: RefCell<Value>,
}

/// Entry list shared by every handle on one path
pub(crate) struct ArrayBinding {
	path: FieldPath,
	entries: RefCell<Vec<Rc<EntryState>>>,
	next_key: Cell<u64>,
	subscription: Cell<Option<SubscriptionId>>,
}

impl ArrayBinding {
	fn new(path: FieldPath) -> Self {
		Self {
			path,
			entries: RefCell::new(Vec::new()),
			next_key: Cell::new(0),
			subscription: Cell::new(None),
		}
	}

	fn fresh_entry(&self, value: Value) -> Rc<EntryState> {
		let key = EntryKey(self.next_key.get());
		self.next_key.set(key.0 + 1);
		Rc::new(EntryState {
			key,
			value: RefCell::new(value),
		})
	}

	fn len(&self) -> usize {
		self.entries.borrow().len()
	}

	fn position_of(&self, key: EntryKey) -> Option<usize> {
		self.entries.borrow().iter().position(|entry| entry.key == key)
	}

	/// Reconcile the entries with the array currently stored in `form`
	///
	/// Existing positions keep their keys, extra items get fresh keys and
	/// surplus entries are dropped. Anything but an array empties the list.
	fn sync(&self, form: &Form) {
		let items = match form.value_at(&self.path) {
			Some(Value::Array(items)) => items,
			_ => Vec::new(),
		};
		let mut entries = self.entries.borrow_mut();
		let before = entries.len();
		entries.truncate(items.len());
		for (entry, item) in entries.iter().zip(&items) {
			*entry.value.borrow_mut() = item.clone();
		}
		for item in items.into_iter().skip(before) {
			let entry = self.fresh_entry(item);
			entries.push(entry);
		}
		if entries.len() != before {
			tracing::debug!(path = %self.path, before, after = entries.len(), "entries reconciled");
		}
	}
}

/// Reference-counted bindings of one form, keyed by path
#[derive(Default)]
pub(crate) struct ArrayRegistry {
	bindings: RefCell<BTreeMap<FieldPath, (Rc<ArrayBinding>, usize)>>,
}

impl ArrayRegistry {
	fn acquire(&self, form: &Form, path: &FieldPath) -> Rc<ArrayBinding> {
		if let Some((binding, count)) = self.bindings.borrow_mut().get_mut(path) {
			*count += 1;
			return binding.clone();
		}

		let binding = Rc::new(ArrayBinding::new(path.clone()));
		binding.sync(form);

		let (weak_binding, weak_form) = (Rc::downgrade(&binding), form.downgrade());
		let id = form.subscribe_raw(path.clone(), move |change| {
			if change.kind != ChangeKind::Value {
				return;
			}
			if let (Some(binding), Some(form)) = (weak_binding.upgrade(), weak_form.upgrade()) {
				binding.sync(&form);
			}
		});
		binding.subscription.set(Some(id));

		tracing::debug!(path = %path, "array binding created");
		self.bindings
			.borrow_mut()
			.insert(path.clone(), (binding.clone(), 1));
		binding
	}

	fn release(&self, form: &Form, path: &FieldPath) {
		let released = {
			let mut bindings = self.bindings.borrow_mut();
			let remaining = match bindings.get_mut(path) {
				Some((_, count)) => {
					*count -= 1;
					*count
				}
				None => return,
			};
			if remaining == 0 {
				bindings.remove(path).map(|(binding, _)| binding)
			} else {
				None
			}
		};
		if let Some(binding) = released {
			if let Some(id) = binding.subscription.take() {
				form.unsubscribe_raw(id);
			}
			tracing::debug!(path = %path, "array binding dropped");
		}
	}

	#[cfg(test)]
	fn handle_count(&self, path: &FieldPath) -> usize {
		self.bindings
			.borrow()
			.get(path)
			.map_or(0, |(_, count)| *count)
	}
}

struct Attached {
	form: Form,
	binding: Rc<ArrayBinding>,
}

/// Handle on the array at one path of a form
///
/// Obtained from [`Form::field_array`] or
/// [`crate::context::use_field_array`]. A handle created without an enclosing
/// form is detached: it has no entries and every mutator only emits
/// [`FormWarning::NoFormContext`].
pub struct FieldArray {
	path: FieldPath,
	attached: Option<Attached>,
}

impl FieldArray {
	pub(crate) fn attach(form: &Form, path: FieldPath) -> Self {
		let binding = form.inner().arrays.acquire(form, &path);
		Self {
			path,
			attached: Some(Attached {
				form: form.clone(),
				binding,
			}),
		}
	}

	pub(crate) fn detached(path: FieldPath) -> Self {
		Self {
			path,
			attached: None,
		}
	}

	pub fn path(&self) -> &FieldPath {
		&self.path
	}

	pub fn is_detached(&self) -> bool {
		self.attached.is_none()
	}

	/// The form and binding, or a warning when there is no form
	fn target(&self, operation: &'static str) -> Option<&Attached> {
		if self.attached.is_none() {
			warning::emit(FormWarning::NoFormContext {
				path: self.path.to_string(),
				operation,
			});
		}
		self.attached.as_ref()
	}

	/// Length of the bound array, `None` when the path holds something else
	fn bound_len(&self, attached: &Attached, operation: &'static str) -> Option<usize> {
		match attached.form.value_at(&self.path) {
			Some(Value::Array(items)) => Some(items.len()),
			None => Some(0),
			Some(other) => {
				tracing::debug!(
					path = %self.path,
					operation,
					kind = value_kind(&other),
					"field array path does not hold an array; ignored"
				);
				None
			}
		}
	}

	fn insert_at(&self, index: Option<usize>, value: Value, operation: &'static str) {
		let Some(attached) = self.target(operation) else {
			return;
		};
		let Some(len) = self.bound_len(attached, operation) else {
			return;
		};
		let index = index.map_or(len, |index| index.min(len));

		let entry = attached.binding.fresh_entry(value.clone());
		let key = entry.key;
		{
			let mut entries = attached.binding.entries.borrow_mut();
			let position = index.min(entries.len());
			entries.insert(position, entry);
		}
		if !attached
			.form
			.apply_array_op(&self.path, &ArrayOp::Insert(index), Some(value))
		{
			attached.binding.sync(&attached.form);
			return;
		}
		tracing::debug!(path = %self.path, operation, index, %key, "array item inserted");
		attached.form.schedule_silent_validation();
	}

	/// Append an item
	pub fn push(&self, value: Value) {
		self.insert_at(None, value, "push");
	}

	/// Insert an item at the front
	pub fn prepend(&self, value: Value) {
		self.insert_at(Some(0), value, "prepend");
	}

	/// Insert an item at `index`, clamped to the current length
	pub fn insert(&self, index: usize, value: Value) {
		self.insert_at(Some(index), value, "insert");
	}

	fn restructure(&self, op: ArrayOp, operation: &'static str) {
		let Some(attached) = self.target(operation) else {
			return;
		};
		let Some(len) = self.bound_len(attached, operation) else {
			return;
		};
		let in_range = match op {
			ArrayOp::Remove(index) => index < len,
			ArrayOp::Move { from, to } => from != to && from < len && to < len,
			ArrayOp::Swap(a, b) => a != b && a < len && b < len,
			ArrayOp::Insert(_) => false,
		};
		if !in_range {
			tracing::debug!(path = %self.path, ?op, len, "array operation out of range; ignored");
			return;
		}

		op.reorder(&mut *attached.binding.entries.borrow_mut());
		attached.form.apply_array_op(&self.path, &op, None);
		tracing::debug!(path = %self.path, ?op, "array restructured");
	}

	/// Remove the item at `index`
	///
	/// Fields bound to the removed item are detached; errors and field state of
	/// later items shift left with them.
	pub fn remove(&self, index: usize) {
		self.restructure(ArrayOp::Remove(index), "remove");
	}

	/// Move the item at `from` to `to`, keeping its key
	pub fn move_item(&self, from: usize, to: usize) {
		self.restructure(ArrayOp::Move { from, to }, "move");
	}

	pub fn swap(&self, a: usize, b: usize) {
		self.restructure(ArrayOp::Swap(a, b), "swap");
	}

	/// Set the value of the item at `index` and validate that field
	pub fn update(&self, index: usize, value: Value) {
		let Some(attached) = self.target("update") else {
			return;
		};
		let Some(len) = self.bound_len(attached, "update") else {
			return;
		};
		if index >= len {
			tracing::debug!(path = %self.path, index, len, "update out of range; ignored");
			return;
		}
		let field = self.path.child_index(index);
		if let Err(error) = attached.form.set_field_value(&field, value) {
			tracing::debug!(path = %field, %error, "update failed");
		}
	}

	/// Replace the whole array
	///
	/// Entries are reconciled by position and the initial values are left
	/// alone.
	pub fn replace(&self, values: Vec<Value>) {
		let Some(attached) = self.target("replace") else {
			return;
		};
		if self.bound_len(attached, "replace").is_none() {
			return;
		}
		attached.form.write_value(&self.path, Value::Array(values));
		attached.form.schedule_silent_validation();
	}

	/// Current entries in array order
	pub fn entries(&self) -> Vec<FieldEntry> {
		let Some(attached) = &self.attached else {
			return Vec::new();
		};
		attached
			.binding
			.entries
			.borrow()
			.iter()
			.map(|state| FieldEntry {
				state: state.clone(),
				binding: Rc::downgrade(&attached.binding),
				form: attached.form.downgrade(),
				array_path: self.path.clone(),
			})
			.collect()
	}

	pub fn len(&self) -> usize {
		self.attached
			.as_ref()
			.map_or(0, |attached| attached.binding.len())
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<EntryKey> {
		self.attached.as_ref().map_or_else(Vec::new, |attached| {
			attached
				.binding
				.entries
				.borrow()
				.iter()
				.map(|entry| entry.key)
				.collect()
		})
	}

	pub fn values(&self) -> Vec<Value> {
		self.attached.as_ref().map_or_else(Vec::new, |attached| {
			attached
				.binding
				.entries
				.borrow()
				.iter()
				.map(|entry| entry.value.borrow().clone())
				.collect()
		})
	}
}

impl Clone for FieldArray {
	fn clone(&self) -> Self {
		match &self.attached {
			Some(attached) => Self::attach(&attached.form, self.path.clone()),
			None => Self::detached(self.path.clone()),
		}
	}
}

impl Drop for FieldArray {
	fn drop(&mut self) {
		if let Some(attached) = &self.attached {
			attached.form.inner().arrays.release(&attached.form, &self.path);
		}
	}
}

impl fmt::Debug for FieldArray {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FieldArray")
			.field("path", &self.path)
			.field("keys", &self.keys())
			.finish()
	}
}

/// One item of a [`FieldArray`]
///
/// An entry can outlive its item. Once the item is removed the entry is stale:
/// reads return the last known value and writes are ignored with a
/// [`FormWarning::StaleEntry`].
#[derive(Clone)]
pub struct FieldEntry {
	state: Rc<EntryState>,
	binding: Weak<ArrayBinding>,
	form: WeakForm,
	array_path: FieldPath,
}

impl FieldEntry {
	pub fn key(&self) -> EntryKey {
		self.state.key
	}

	/// Current position, `None` once the item was removed
	pub fn index(&self) -> Option<usize> {
		self.binding.upgrade()?.position_of(self.state.key)
	}

	pub fn is_first(&self) -> bool {
		self.index() == Some(0)
	}

	pub fn is_last(&self) -> bool {
		match (self.index(), self.binding.upgrade()) {
			(Some(index), Some(binding)) => index + 1 == binding.len(),
			_ => false,
		}
	}

	/// Field path of the item at its current position
	pub fn path(&self) -> Option<FieldPath> {
		self.index().map(|index| self.array_path.child_index(index))
	}

	pub fn is_stale(&self) -> bool {
		self.index().is_none()
	}

	/// Value of the item, read from the form while the item is live
	pub fn value(&self) -> Value {
		if let (Some(path), Some(form)) = (self.path(), self.form.upgrade()) {
			return form.value_at(&path).unwrap_or(Value::Null);
		}
		self.state.value.borrow().clone()
	}

	/// Write the item's value and validate that field
	pub fn set_value(&self, value: Value) {
		let target = self.path().zip(self.form.upgrade());
		let Some((path, form)) = target else {
			warning::emit(FormWarning::StaleEntry {
				path: self.array_path.to_string(),
				key: self.state.key.get(),
			});
			return;
		};
		if let Err(error) = form.set_field_value(&path, value) {
			tracing::debug!(path = %path, %error, "entry write failed");
		}
	}
}

impl fmt::Debug for FieldEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FieldEntry")
			.field("key", &self.state.key)
			.field("value", &self.state.value.borrow())
			.finish()
	}
}

fn value_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	fn path(raw: &str) -> FieldPath {
		FieldPath::parse(raw).unwrap()
	}

	#[rstest]
	#[case(ArrayOp::Insert(1), vec![Some(0), Some(2), Some(3)])]
	#[case(ArrayOp::Remove(1), vec![Some(0), None, Some(1)])]
	#[case(ArrayOp::Move { from: 0, to: 2 }, vec![Some(2), Some(0), Some(1)])]
	#[case(ArrayOp::Move { from: 2, to: 0 }, vec![Some(1), Some(2), Some(0)])]
	#[case(ArrayOp::Swap(0, 2), vec![Some(2), Some(1), Some(0)])]
	fn test_array_op_remap(#[case] op: ArrayOp, #[case] expected: Vec<Option<usize>>) {
		let remapped: Vec<_> = (0..3).map(|index| op.remap(index)).collect();
		assert_eq!(remapped, expected);
	}

	#[rstest]
	#[case(ArrayOp::Insert(1), vec!["a", "x", "b", "c"])]
	#[case(ArrayOp::Remove(0), vec!["b", "c"])]
	#[case(ArrayOp::Move { from: 0, to: 2 }, vec!["b", "c", "a"])]
	#[case(ArrayOp::Swap(0, 1), vec!["b", "a", "c"])]
	fn test_array_op_apply_agrees_with_remap(#[case] op: ArrayOp, #[case] expected: Vec<&str>) {
		let original = vec![json!("a"), json!("b"), json!("c")];
		let mut items = original.clone();

		op.apply(&mut items, Some(json!("x")));

		assert_eq!(items, expected.into_iter().map(Value::from).collect::<Vec<_>>());
		for (index, item) in original.iter().enumerate() {
			if let Some(next) = op.remap(index) {
				assert_eq!(items[next], *item);
			}
		}
	}

	#[rstest]
	fn test_apply_pads_short_arrays() {
		let mut items = vec![json!(1)];

		ArrayOp::Insert(3).apply(&mut items, Some(json!(4)));

		assert_eq!(items, vec![json!(1), json!(null), json!(null), json!(4)]);
	}

	#[rstest]
	fn test_remap_path_only_touches_items_of_the_array() {
		let op = ArrayOp::Remove(0);
		let users = path("users");

		assert_eq!(op.remap_path(&users, &path("users[1].name")), Some(path("users[0].name")));
		assert_eq!(op.remap_path(&users, &path("users[0].name")), None);
		assert_eq!(op.remap_path(&users, &path("users")), Some(path("users")));
		assert_eq!(op.remap_path(&users, &path("teams[1]")), Some(path("teams[1]")));
	}

	#[rstest]
	fn test_bindings_are_shared_and_released() {
		let form = Form::with_initial(json!({ "users": [] }));
		let users = path("users");

		let first = form.field_array("users").unwrap();
		let second = first.clone();
		assert_eq!(form.inner().arrays.handle_count(&users), 2);

		drop(first);
		assert_eq!(form.inner().arrays.handle_count(&users), 1);
		drop(second);
		assert_eq!(form.inner().arrays.handle_count(&users), 0);

		// The binding stops listening once released
		form.set_value("users", json!(["late"])).unwrap();
		let third = form.field_array("users").unwrap();
		assert_eq!(third.values(), vec![json!("late")]);
	}

	#[rstest]
	fn test_external_write_reconciles_by_position() {
		let form = Form::with_initial(json!({ "users": ["a", "b", "c"] }));
		let users = form.field_array("users").unwrap();
		let keys = users.keys();

		form.set_value("users", json!(["x", "y"])).unwrap();
		assert_eq!(users.keys(), keys[..2].to_vec());
		assert_eq!(users.values(), vec![json!("x"), json!("y")]);

		form.set_value("users", json!(["x", "y", "z", "w"])).unwrap();
		let grown = users.keys();
		assert_eq!(grown[..2], keys[..2]);
		assert!(grown[2..].iter().all(|key| !keys.contains(key)));

		form.set_value("users", json!("scalar")).unwrap();
		assert!(users.is_empty());
	}

	#[rstest]
	fn test_entry_position_helpers() {
		let form = Form::with_initial(json!({ "users": ["a", "b"] }));
		let users = form.field_array("users").unwrap();
		let entries = users.entries();

		assert!(entries[0].is_first() && !entries[0].is_last());
		assert!(entries[1].is_last());
		assert_eq!(entries[1].path(), Some(path("users[1]")));

		users.remove(0);
		assert!(entries[1].is_first() && entries[1].is_last());
		assert!(entries[0].is_stale());
		assert_eq!(entries[0].value(), json!("a"));
	}

	#[rstest]
	fn test_replace_keeps_initial_values() {
		let form = Form::with_initial(json!({ "users": ["a"] }));
		let users = form.field_array("users").unwrap();

		users.replace(vec![json!("b"), json!("c")]);

		assert_eq!(users.len(), 2);
		assert_eq!(form.get_initial_value("users").unwrap(), Some(json!(["a"])));
		assert_eq!(form.pending_tasks(), 1);
	}
}
