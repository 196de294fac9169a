//! Form value and error store
//!
//! [`Form`] is the single source of truth for one form instance. It owns:
//!
//! - the value tree and the parallel initial-values tree
//! - the error bag, touched and validated sets and pending validations
//! - the field registry and the shared array bindings
//! - the explicit task queue that stands in for the "next tick"
//!
//! All writes are synchronous and notify subscribers of the changed path.
//! Validation is asynchronous; scheduled validations run when the owner calls
//! [`Form::flush`].
//!
//! ## Example
//!
//! ```
//! use formwork_forms::schema::RuleSchema;
//! use formwork_forms::store::Form;
//! use formwork_forms::validators::Rules;
//! use serde_json::json;
//!
//! # futures::executor::block_on(async {
//! let form = Form::builder()
//!     .initial_values(json!({ "email": "" }))
//!     .schema(RuleSchema::new().field("email", Rules::new().required()).unwrap())
//!     .build()
//!     .unwrap();
//!
//! form.set_field_value("email", json!("ada@example.com")).unwrap();
//! assert!(form.field_meta("email").unwrap().pending);
//!
//! form.flush().await;
//! let meta = form.field_meta("email").unwrap();
//! assert!(meta.dirty && meta.valid && !meta.pending);
//! # });
//! ```

use core::cell::{Cell, RefCell};
use core::future::Future;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::{Rc, Weak};

use formwork_core::path::{self, FieldPath, IntoFieldPath};
use formwork_core::reactive::{SubscriptionId, Subscriptions, TaskQueue};
use serde_json::{Map, Value};

use crate::config::FormConfig;
use crate::error::FormResult;
use crate::field::{FieldHandle, FieldMeta};
use crate::field_array::{ArrayOp, ArrayRegistry, FieldArray};
use crate::registry::{FieldId, FieldRegistry};
use crate::schema::Schema;
use crate::validators::Rules;

/// What kind of state changed at a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
	Value,
	InitialValue,
	Errors,
	Meta,
}

/// Event delivered to [`Form::subscribe`] callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
	pub path: FieldPath,
	pub kind: ChangeKind,
}

/// Aggregate state of the whole form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormMeta {
	/// Any field was touched
	pub touched: bool,
	/// The value tree differs from the initial values
	pub dirty: bool,
	/// No counted error is present
	pub valid: bool,
	/// A validation is queued or in flight
	pub pending: bool,
}

/// Outcome of [`Form::validate_field`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValidation {
	/// Messages produced by this validation
	pub errors: Vec<String>,
	/// Whether the result was written to the error bag; `false` when a newer
	/// validation, a reset or the removal of the field superseded it
	pub applied: bool,
}

impl FieldValidation {
	pub fn is_valid(&self) -> bool {
		self.errors.is_empty()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorSource {
	Validation,
	Manual,
}

#[derive(Debug, Clone)]
struct ErrorEntry {
	messages: Vec<String>,
	source: ErrorSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValidationMode {
	/// Marks registered fields validated
	Force,
	/// Only updates errors and validity
	Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskKey {
	SilentValidation,
	Field(u64),
}

#[derive(Debug, Default)]
struct FormState {
	values: Value,
	initial_values: Value,
	errors: BTreeMap<FieldPath, ErrorEntry>,
	touched: BTreeSet<FieldPath>,
	validated: BTreeSet<FieldPath>,
	/// Paths the schema reported in its latest pass
	schema_reported: BTreeSet<FieldPath>,
	/// Queued field validations, path to task token
	queued: BTreeMap<FieldPath, u64>,
	/// In-flight field validations, sequence number to current path
	in_flight: BTreeMap<u64, FieldPath>,
	form_in_flight: usize,
	/// Sequence number of the newest result applied per path
	applied: BTreeMap<FieldPath, u64>,
	reset_seq: u64,
	structure_version: u64,
	registry: FieldRegistry,
}

impl FormState {
	fn counts_toward_validity(&self, path: &FieldPath, entry: &ErrorEntry) -> bool {
		!entry.messages.is_empty()
			&& (entry.source == ErrorSource::Validation
				|| self.registry.is_registered(path)
				|| self.schema_reported.contains(path))
	}

	fn is_valid(&self) -> bool {
		!self
			.errors
			.iter()
			.any(|(path, entry)| self.counts_toward_validity(path, entry))
	}

	fn is_stale(&self, path: &FieldPath, seq: u64) -> bool {
		seq <= self.reset_seq || self.applied.get(path).is_some_and(|newest| *newest > seq)
	}

	fn field_pending(&self, path: &FieldPath) -> bool {
		self.queued.contains_key(path) || self.in_flight.values().any(|p| p == path)
	}

	/// Returns the registrants detached because their item was removed
	fn remap(&mut self, array_path: &FieldPath, op: &ArrayOp) -> Vec<FieldId> {
		remap_keys(&mut self.errors, array_path, op);
		remap_keys(&mut self.queued, array_path, op);
		remap_keys(&mut self.applied, array_path, op);
		remap_members(&mut self.touched, array_path, op);
		remap_members(&mut self.validated, array_path, op);
		remap_members(&mut self.schema_reported, array_path, op);

		let mut orphaned = Vec::new();
		for (seq, path) in &mut self.in_flight {
			match op.remap_path(array_path, path) {
				Some(next) => *path = next,
				None => orphaned.push(*seq),
			}
		}
		for seq in orphaned {
			self.in_flight.remove(&seq);
		}

		self.structure_version += 1;
		self.registry.remap(array_path, op)
	}
}

fn remap_keys<V>(map: &mut BTreeMap<FieldPath, V>, array_path: &FieldPath, op: &ArrayOp) {
	let affected: Vec<FieldPath> = map
		.keys()
		.filter(|path| path.len() > array_path.len() && path.starts_with(array_path))
		.cloned()
		.collect();
	let mut moved = Vec::with_capacity(affected.len());
	for path in affected {
		if let Some(value) = map.remove(&path)
			&& let Some(next) = op.remap_path(array_path, &path)
		{
			moved.push((next, value));
		}
	}
	map.extend(moved);
}

fn remap_members(set: &mut BTreeSet<FieldPath>, array_path: &FieldPath, op: &ArrayOp) {
	let affected: Vec<FieldPath> = set
		.iter()
		.filter(|path| path.len() > array_path.len() && path.starts_with(array_path))
		.cloned()
		.collect();
	for path in affected {
		set.remove(&path);
		if let Some(next) = op.remap_path(array_path, &path) {
			set.insert(next);
		}
	}
}

/// Structural equality where a missing value equals `null`
pub(crate) fn same_value(a: Option<&Value>, b: Option<&Value>) -> bool {
	match (a, b) {
		(a, b) if path::is_undefined(a) && path::is_undefined(b) => true,
		(Some(Value::Object(a)), Some(Value::Object(b))) => a
			.keys()
			.chain(b.keys())
			.all(|key| same_value(a.get(key), b.get(key))),
		(Some(Value::Array(a)), Some(Value::Array(b))) => {
			a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_value(Some(a), Some(b)))
		}
		(a, b) => a == b,
	}
}

/// Snapshot taken when a validation is issued
struct Issued {
	seq: u64,
	structure_version: u64,
	values: Value,
	rules: Vec<(FieldPath, Rules)>,
}

pub(crate) struct FormInner {
	state: RefCell<FormState>,
	schema: Option<Rc<dyn Schema>>,
	subscriptions: Subscriptions<Change>,
	tasks: TaskQueue<TaskKey>,
	pub(crate) arrays: ArrayRegistry,
	sequence: Cell<u64>,
}

/// Handle to one form instance
///
/// Cloning is cheap and every clone refers to the same form.
#[derive(Clone)]
pub struct Form {
	inner: Rc<FormInner>,
}

/// Non-owning reference to a [`Form`]
#[derive(Clone, Default)]
pub struct WeakForm {
	inner: Weak<FormInner>,
}

impl WeakForm {
	pub fn upgrade(&self) -> Option<Form> {
		self.inner.upgrade().map(|inner| Form { inner })
	}
}

impl PartialEq for Form {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for Form {}

impl core::fmt::Debug for Form {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let state = self.inner.state.borrow();
		f.debug_struct("Form")
			.field("values", &state.values)
			.field("fields", &state.registry.len())
			.field("pending_tasks", &self.inner.tasks.len())
			.finish()
	}
}

impl Default for Form {
	fn default() -> Self {
		Self::new()
	}
}

impl Form {
	/// Create an empty form without a schema
	pub fn new() -> Self {
		Self::with_initial(Value::Object(Map::new()))
	}

	/// Create a form whose values and initial values are `values`
	pub fn with_initial(values: Value) -> Self {
		Self::from_parts(values, None)
	}

	/// Create a form from a [`FormConfig`]
	///
	/// # Errors
	///
	/// Fails when a path in `initial_errors` or `initial_touched` is malformed.
	pub fn with_config(config: FormConfig) -> FormResult<Self> {
		Self::builder().config(config).build()
	}

	pub fn builder() -> FormBuilder {
		FormBuilder::default()
	}

	fn from_parts(values: Value, schema: Option<Rc<dyn Schema>>) -> Self {
		let state = FormState {
			initial_values: values.clone(),
			values,
			..FormState::default()
		};
		Self {
			inner: Rc::new(FormInner {
				state: RefCell::new(state),
				schema,
				subscriptions: Subscriptions::new(),
				tasks: TaskQueue::new(),
				arrays: ArrayRegistry::default(),
				sequence: Cell::new(0),
			}),
		}
	}

	pub fn downgrade(&self) -> WeakForm {
		WeakForm {
			inner: Rc::downgrade(&self.inner),
		}
	}

	pub(crate) fn inner(&self) -> &FormInner {
		&self.inner
	}

	fn next_seq(&self) -> u64 {
		let seq = self.inner.sequence.get() + 1;
		self.inner.sequence.set(seq);
		seq
	}

	fn notify(&self, path: &FieldPath, kind: ChangeKind) {
		self.inner.subscriptions.notify(
			path,
			&Change {
				path: path.clone(),
				kind,
			},
		);
	}

	// Reads

	/// Current value at `path`, `None` when undefined
	pub fn get_value(&self, path: impl IntoFieldPath) -> FormResult<Option<Value>> {
		Ok(self.value_at(&path.into_field_path()?))
	}

	pub(crate) fn value_at(&self, path: &FieldPath) -> Option<Value> {
		path::get(&self.inner.state.borrow().values, path)
			.filter(|value| !value.is_null())
			.cloned()
	}

	/// Snapshot of the whole value tree
	pub fn values(&self) -> Value {
		self.inner.state.borrow().values.clone()
	}

	pub fn get_initial_value(&self, path: impl IntoFieldPath) -> FormResult<Option<Value>> {
		Ok(self.initial_value_at(&path.into_field_path()?))
	}

	pub(crate) fn initial_value_at(&self, path: &FieldPath) -> Option<Value> {
		path::get(&self.inner.state.borrow().initial_values, path)
			.filter(|value| !value.is_null())
			.cloned()
	}

	pub fn initial_values(&self) -> Value {
		self.inner.state.borrow().initial_values.clone()
	}

	/// Every non-empty error list, including manual errors on unregistered paths
	pub fn errors(&self) -> BTreeMap<FieldPath, Vec<String>> {
		self.inner
			.state
			.borrow()
			.errors
			.iter()
			.filter(|(_, entry)| !entry.messages.is_empty())
			.map(|(path, entry)| (path.clone(), entry.messages.clone()))
			.collect()
	}

	pub fn field_errors(&self, path: impl IntoFieldPath) -> FormResult<Vec<String>> {
		Ok(self.errors_at(&path.into_field_path()?))
	}

	pub(crate) fn errors_at(&self, path: &FieldPath) -> Vec<String> {
		self.inner
			.state
			.borrow()
			.errors
			.get(path)
			.map(|entry| entry.messages.clone())
			.unwrap_or_default()
	}

	pub fn meta(&self) -> FormMeta {
		let state = self.inner.state.borrow();
		FormMeta {
			touched: !state.touched.is_empty(),
			dirty: !same_value(Some(&state.values), Some(&state.initial_values)),
			valid: state.is_valid(),
			pending: !self.inner.tasks.is_empty()
				|| !state.in_flight.is_empty()
				|| state.form_in_flight > 0,
		}
	}

	pub fn field_meta(&self, path: impl IntoFieldPath) -> FormResult<FieldMeta> {
		Ok(self.meta_at(&path.into_field_path()?))
	}

	pub(crate) fn meta_at(&self, path: &FieldPath) -> FieldMeta {
		let state = self.inner.state.borrow();
		let value = path::get(&state.values, path);
		let initial = path::get(&state.initial_values, path);
		FieldMeta {
			touched: state.touched.contains(path),
			dirty: !same_value(value, initial),
			validated: state.validated.contains(path),
			pending: state.field_pending(path),
			valid: state
				.errors
				.get(path)
				.is_none_or(|entry| entry.messages.is_empty()),
			initial_value: initial.filter(|value| !value.is_null()).cloned(),
		}
	}

	/// Number of queued tasks that [`Form::flush`] would run
	pub fn pending_tasks(&self) -> usize {
		self.inner.tasks.len()
	}

	// Writes

	/// Write `value` at `path` and notify subscribers, without validating
	pub fn set_value(&self, path: impl IntoFieldPath, value: Value) -> FormResult<()> {
		self.write_value(&path.into_field_path()?, value);
		Ok(())
	}

	pub(crate) fn write_value(&self, path: &FieldPath, value: Value) -> bool {
		let written = path::set(&mut self.inner.state.borrow_mut().values, path, value);
		if written {
			self.notify(path, ChangeKind::Value);
		} else {
			tracing::debug!(path = %path, "value write ignored: container has the wrong kind");
		}
		written
	}

	pub fn set_initial_value(&self, path: impl IntoFieldPath, value: Value) -> FormResult<()> {
		let path = path.into_field_path()?;
		let written = path::set(&mut self.inner.state.borrow_mut().initial_values, &path, value);
		if written {
			self.notify(&path, ChangeKind::InitialValue);
		}
		Ok(())
	}

	/// Write `value` at `path` and schedule validation of that field
	///
	/// The field is pending from now until the validation completes.
	pub fn set_field_value(&self, path: impl IntoFieldPath, value: Value) -> FormResult<()> {
		let path = path.into_field_path()?;
		if self.write_value(&path, value) {
			self.schedule_field_validation(path);
		}
		Ok(())
	}

	/// Several writes; validation is scheduled for every path whose value changed
	///
	/// All paths are parsed before anything is written.
	pub fn set_values<I, P>(&self, entries: I) -> FormResult<()>
	where
		I: IntoIterator<Item = (P, Value)>,
		P: IntoFieldPath,
	{
		let entries = entries
			.into_iter()
			.map(|(path, value)| -> FormResult<(FieldPath, Value)> {
				Ok((path.into_field_path()?, value))
			})
			.collect::<FormResult<Vec<_>>>()?;

		for (path, value) in entries {
			let unchanged = same_value(path::get(&self.inner.state.borrow().values, &path), Some(&value));
			if unchanged {
				continue;
			}
			if self.write_value(&path, value) {
				self.schedule_field_validation(path);
			}
		}
		Ok(())
	}

	/// Overwrite the errors at `path` with one message, or clear them
	pub fn set_field_error(&self, path: impl IntoFieldPath, message: Option<String>) -> FormResult<()> {
		let path = path.into_field_path()?;
		{
			let mut state = self.inner.state.borrow_mut();
			match message {
				Some(message) => {
					state.errors.insert(
						path.clone(),
						ErrorEntry {
							messages: vec![message],
							source: ErrorSource::Manual,
						},
					);
				}
				None => {
					state.errors.remove(&path);
				}
			}
		}
		self.notify(&path, ChangeKind::Errors);
		Ok(())
	}

	pub fn set_field_touched(&self, path: impl IntoFieldPath, touched: bool) -> FormResult<()> {
		let path = path.into_field_path()?;
		let changed = {
			let mut state = self.inner.state.borrow_mut();
			if touched {
				state.touched.insert(path.clone())
			} else {
				state.touched.remove(&path)
			}
		};
		if changed {
			self.notify(&path, ChangeKind::Meta);
		}
		Ok(())
	}

	/// Restore the initial values and clear errors, touched and validated state
	///
	/// Validations still in flight are discarded when they complete.
	pub fn reset(&self) {
		let initial = self.initial_values();
		self.reset_to(initial);
	}

	/// Like [`Form::reset`], but `values` also become the new initial values
	pub fn reset_to(&self, values: Value) {
		let seq = self.next_seq();
		{
			let mut state = self.inner.state.borrow_mut();
			state.initial_values = values.clone();
			state.values = values;
			state.errors.clear();
			state.touched.clear();
			state.validated.clear();
			state.schema_reported.clear();
			state.queued.clear();
			state.in_flight.clear();
			state.applied.clear();
			state.reset_seq = seq;
		}
		tracing::debug!("form reset");
		let root = FieldPath::root();
		self.notify(&root, ChangeKind::Value);
		self.notify(&root, ChangeKind::InitialValue);
		self.notify(&root, ChangeKind::Errors);
	}

	/// Observe changes related to `prefix` until the returned guard is dropped
	pub fn subscribe<F>(&self, prefix: impl IntoFieldPath, callback: F) -> FormResult<Subscription>
	where
		F: Fn(&Change) + 'static,
	{
		let id = self
			.inner
			.subscriptions
			.subscribe(prefix.into_field_path()?, callback);
		Ok(Subscription {
			form: self.downgrade(),
			id,
		})
	}

	pub(crate) fn subscribe_raw<F>(&self, prefix: FieldPath, callback: F) -> SubscriptionId
	where
		F: Fn(&Change) + 'static,
	{
		self.inner.subscriptions.subscribe(prefix, callback)
	}

	pub(crate) fn unsubscribe_raw(&self, id: SubscriptionId) -> bool {
		self.inner.subscriptions.unsubscribe(id)
	}

	// Fields and arrays

	/// Acquire the field array bound to `path`
	pub fn field_array(&self, path: impl IntoFieldPath) -> FormResult<FieldArray> {
		Ok(FieldArray::attach(self, path.into_field_path()?))
	}

	/// Register a field at `path`; it is deregistered when the handle drops
	pub fn register_field(&self, path: impl IntoFieldPath) -> FormResult<FieldHandle> {
		self.register_field_with_rules(path, Rules::new())
	}

	/// Register a field carrying its own rules, evaluated alongside the schema
	///
	/// # Errors
	///
	/// Fails when the path is malformed or a rule can never run.
	pub fn register_field_with_rules(
		&self,
		path: impl IntoFieldPath,
		rules: Rules,
	) -> FormResult<FieldHandle> {
		let path = path.into_field_path()?;
		rules.ensure_valid(&path.to_string())?;
		let id = self
			.inner
			.state
			.borrow_mut()
			.registry
			.register(path.clone(), rules);
		self.notify(&path, ChangeKind::Meta);
		Ok(FieldHandle::new(self, id))
	}

	pub(crate) fn field_path(&self, id: FieldId) -> Option<FieldPath> {
		self.inner.state.borrow().registry.path_of(id).cloned()
	}

	/// Remove a registrant; the last one at a path takes its non-schema errors along
	pub(crate) fn unregister_field(&self, id: FieldId) {
		let cleared = {
			let mut state = self.inner.state.borrow_mut();
			let Some(path) = state.registry.unregister(id) else {
				return;
			};
			if state.registry.is_registered(&path) || state.schema_reported.contains(&path) {
				None
			} else {
				state.errors.remove(&path).map(|_| path)
			}
		};
		if let Some(path) = cleared {
			self.notify(&path, ChangeKind::Errors);
		}
	}

	/// Apply a structural change to the array at `path`
	///
	/// The value tree and the initial tree are spliced in lockstep, then every
	/// path-keyed piece of state under the array follows its item. Returns
	/// `false` when the value at `path` is neither an array nor undefined.
	pub(crate) fn apply_array_op(&self, path: &FieldPath, op: &ArrayOp, inserted: Option<Value>) -> bool {
		let detached = {
			let mut state = self.inner.state.borrow_mut();
			if !splice_tree(&mut state.values, path, op, inserted.clone(), true) {
				return false;
			}
			let materialize = !matches!(op, ArrayOp::Remove(_));
			if !splice_tree(&mut state.initial_values, path, op, inserted, materialize) {
				tracing::debug!(path = %path, "initial value is not an array; mirror skipped");
			}
			state.remap(path, op)
		};
		tracing::debug!(path = %path, ?op, "array mutated");
		self.notify(path, ChangeKind::Value);
		self.notify(path, ChangeKind::InitialValue);
		self.notify(path, ChangeKind::Errors);
		if !detached.is_empty() {
			tracing::debug!(path = %path, ?detached, "registered fields detached");
			self.notify(path, ChangeKind::Meta);
		}
		true
	}

	// Validation

	/// Queue validation of one field, coalescing with one already queued
	fn schedule_field_validation(&self, path: FieldPath) {
		let token = {
			let mut state = self.inner.state.borrow_mut();
			if state.queued.contains_key(&path) {
				return;
			}
			let token = self.next_seq();
			state.queued.insert(path.clone(), token);
			token
		};

		let weak = self.downgrade();
		self.inner
			.tasks
			.schedule(TaskKey::Field(token), move || async move {
				if let Some(form) = weak.upgrade() {
					form.run_queued_field_validation(token).await;
				}
			});
		self.notify(&path, ChangeKind::Meta);
	}

	async fn run_queued_field_validation(&self, token: u64) {
		let path = {
			let mut state = self.inner.state.borrow_mut();
			let path = state
				.queued
				.iter()
				.find(|(_, queued)| **queued == token)
				.map(|(path, _)| path.clone());
			if let Some(path) = &path {
				state.queued.remove(path);
			}
			path
		};
		// Cleared by a reset or removed together with its item
		let Some(path) = path else {
			return;
		};
		let issued = self.issue_field_validation(&path);
		self.run_field_validation(path, issued).await;
	}

	/// Schedule the single-slot silent validation pass
	///
	/// Scheduling while a pass is already queued is a no-op; the pass
	/// evaluates the tree as it is when it runs.
	pub(crate) fn schedule_silent_validation(&self) {
		let weak = self.downgrade();
		self.inner
			.tasks
			.schedule(TaskKey::SilentValidation, move || async move {
				if let Some(form) = weak.upgrade() {
					let issued = form.issue_form_validation();
					form.run_form_validation(issued, ValidationMode::Silent).await;
				}
			});
	}

	/// Run every queued task, including tasks queued while flushing
	///
	/// Returns the number of tasks that ran.
	pub async fn flush(&self) -> usize {
		self.inner.tasks.run_until_idle().await
	}

	/// Validate the whole form and mark every registered field validated
	///
	/// The snapshot is taken when this is called, not when the future is
	/// first polled.
	pub fn validate(&self) -> impl Future<Output = bool> + 'static {
		let issued = self.issue_form_validation();
		let form = self.clone();
		async move { form.run_form_validation(issued, ValidationMode::Force).await }
	}

	/// Validate one field
	pub fn validate_field(
		&self,
		path: impl IntoFieldPath,
	) -> FormResult<impl Future<Output = FieldValidation> + 'static> {
		let path = path.into_field_path()?;
		let issued = self.issue_field_validation(&path);
		let form = self.clone();
		Ok(async move { form.run_field_validation(path, issued).await })
	}

	fn snapshot(&self, rules: Vec<(FieldPath, Rules)>) -> Issued {
		let seq = self.next_seq();
		let state = self.inner.state.borrow();
		Issued {
			seq,
			structure_version: state.structure_version,
			values: state.values.clone(),
			rules,
		}
	}

	fn issue_field_validation(&self, path: &FieldPath) -> Issued {
		let rules = {
			let state = self.inner.state.borrow();
			state
				.registry
				.rules_at(path)
				.into_iter()
				.map(|rules| (path.clone(), rules))
				.collect()
		};
		let issued = self.snapshot(rules);
		self.inner
			.state
			.borrow_mut()
			.in_flight
			.insert(issued.seq, path.clone());
		self.notify(path, ChangeKind::Meta);
		issued
	}

	fn issue_form_validation(&self) -> Issued {
		let rules = self.inner.state.borrow().registry.ruled_fields();
		let issued = self.snapshot(rules);
		self.inner.state.borrow_mut().form_in_flight += 1;
		issued
	}

	/// Evaluate schema and field rules against the snapshot
	///
	/// Returns every message keyed by path, plus the paths the schema itself
	/// reported.
	async fn evaluate(&self, issued: &Issued) -> (BTreeMap<FieldPath, Vec<String>>, BTreeSet<FieldPath>) {
		let mut errors = match self.inner.schema.clone() {
			Some(schema) => schema.validate(&issued.values).await.into_map(),
			None => BTreeMap::new(),
		};
		errors.retain(|_, messages| !messages.is_empty());
		let reported: BTreeSet<FieldPath> = errors.keys().cloned().collect();

		for (path, rules) in &issued.rules {
			let messages = rules.check(path::get(&issued.values, path));
			if !messages.is_empty() {
				errors.entry(path.clone()).or_default().extend(messages);
			}
		}
		(errors, reported)
	}

	async fn run_field_validation(&self, requested: FieldPath, issued: Issued) -> FieldValidation {
		let (mut errors, reported) = self.evaluate(&issued).await;
		let messages = errors.remove(&requested).unwrap_or_default();

		let applied_at = {
			let mut state = self.inner.state.borrow_mut();
			match state.in_flight.remove(&issued.seq) {
				Some(path) if !state.is_stale(&path, issued.seq) => {
					if messages.is_empty() {
						state.errors.remove(&path);
					} else {
						state.errors.insert(
							path.clone(),
							ErrorEntry {
								messages: messages.clone(),
								source: ErrorSource::Validation,
							},
						);
					}
					if reported.contains(&requested) {
						state.schema_reported.insert(path.clone());
					} else {
						state.schema_reported.remove(&path);
					}
					state.applied.insert(path.clone(), issued.seq);
					state.validated.insert(path.clone());
					Ok(path)
				}
				Some(path) => Err(Some(path)),
				None => Err(None),
			}
		};

		match applied_at {
			Ok(path) => {
				self.notify(&path, ChangeKind::Errors);
				FieldValidation {
					errors: messages,
					applied: true,
				}
			}
			Err(path) => {
				tracing::debug!(field = %requested, seq = issued.seq, "stale field validation discarded");
				if let Some(path) = path {
					self.notify(&path, ChangeKind::Meta);
				}
				FieldValidation {
					errors: messages,
					applied: false,
				}
			}
		}
	}

	async fn run_form_validation(&self, issued: Issued, mode: ValidationMode) -> bool {
		let (errors, reported) = self.evaluate(&issued).await;
		let valid = errors.is_empty();

		let outcome = {
			let mut state = self.inner.state.borrow_mut();
			state.form_in_flight = state.form_in_flight.saturating_sub(1);

			if issued.seq <= state.reset_seq {
				FormOutcome::Discarded
			} else if issued.structure_version != state.structure_version {
				FormOutcome::Restructured
			} else {
				let registered = state.registry.paths();
				let mut scope: BTreeSet<FieldPath> = errors.keys().cloned().collect();
				scope.extend(registered.iter().cloned());
				scope.extend(
					state
						.errors
						.iter()
						.filter(|(_, entry)| entry.source == ErrorSource::Validation)
						.map(|(path, _)| path.clone()),
				);

				for path in scope {
					if state.is_stale(&path, issued.seq) {
						continue;
					}
					match errors.get(&path) {
						Some(messages) => {
							state.errors.insert(
								path.clone(),
								ErrorEntry {
									messages: messages.clone(),
									source: ErrorSource::Validation,
								},
							);
						}
						None => {
							let keep_manual = state
								.errors
								.get(&path)
								.is_some_and(|entry| entry.source == ErrorSource::Manual)
								&& !registered.contains(&path);
							if !keep_manual {
								state.errors.remove(&path);
							}
						}
					}
					state.applied.insert(path, issued.seq);
				}
				state.schema_reported = reported;
				if mode == ValidationMode::Force {
					state.validated.extend(registered);
				}
				FormOutcome::Applied
			}
		};

		match outcome {
			FormOutcome::Applied => {
				tracing::debug!(seq = issued.seq, ?mode, valid, "form validation applied");
				self.notify(&FieldPath::root(), ChangeKind::Errors);
			}
			FormOutcome::Discarded => {
				tracing::debug!(seq = issued.seq, "form validation discarded after reset");
			}
			FormOutcome::Restructured => {
				// Positions in the result no longer match the tree
				tracing::debug!(seq = issued.seq, "arrays changed during validation; revalidating");
				self.schedule_silent_validation();
			}
		}
		valid
	}
}

enum FormOutcome {
	Applied,
	Discarded,
	Restructured,
}

/// Apply `op` to the array at `path` inside `tree`
///
/// An undefined slot becomes an empty array first when `materialize` is set.
fn splice_tree(
	tree: &mut Value,
	path: &FieldPath,
	op: &ArrayOp,
	inserted: Option<Value>,
	materialize: bool,
) -> bool {
	let slot = path::get(tree, path);
	let is_array = matches!(slot, Some(Value::Array(_)));
	if !is_array {
		if !path::is_undefined(slot) {
			return false;
		}
		if !materialize {
			return true;
		}
		if !path::set(tree, path, Value::Array(Vec::new())) {
			return false;
		}
	}

	match path::get_mut(tree, path) {
		Some(Value::Array(items)) => {
			op.apply(items, inserted);
			true
		}
		_ => false,
	}
}

/// Subscription guard returned by [`Form::subscribe`]
pub struct Subscription {
	form: WeakForm,
	id: SubscriptionId,
}

impl Subscription {
	pub fn id(&self) -> SubscriptionId {
		self.id
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(form) = self.form.upgrade() {
			form.unsubscribe_raw(self.id);
		}
	}
}

/// Builder for [`Form`]
#[derive(Default)]
pub struct FormBuilder {
	config: FormConfig,
	schema: Option<Rc<dyn Schema>>,
}

impl FormBuilder {
	pub fn initial_values(mut self, values: Value) -> Self {
		self.config.initial_values = values;
		self
	}

	pub fn schema(mut self, schema: impl Schema + 'static) -> Self {
		self.schema = Some(Rc::new(schema));
		self
	}

	/// Share one schema instance between forms
	pub fn shared_schema(mut self, schema: Rc<dyn Schema>) -> Self {
		self.schema = Some(schema);
		self
	}

	pub fn validate_on_mount(mut self, enabled: bool) -> Self {
		self.config.validate_on_mount = enabled;
		self
	}

	/// Replace the whole configuration
	pub fn config(mut self, config: FormConfig) -> Self {
		self.config = config;
		self
	}

	/// # Errors
	///
	/// Fails when a path in the configuration is malformed.
	pub fn build(self) -> FormResult<Form> {
		let initial_errors = self.config.parsed_errors()?;
		let initial_touched = self.config.parsed_touched()?;
		let values = match self.config.initial_values {
			Value::Null => Value::Object(Map::new()),
			values => values,
		};

		let form = Form::from_parts(values, self.schema);
		{
			let mut state = form.inner.state.borrow_mut();
			for (path, message) in initial_errors {
				state.errors.insert(
					path,
					ErrorEntry {
						messages: vec![message],
						source: ErrorSource::Validation,
					},
				);
			}
			state.touched.extend(initial_touched);
		}
		if self.config.validate_on_mount {
			form.schedule_silent_validation();
		}
		Ok(form)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::schema::{FnSchema, SchemaResult};
	use rstest::rstest;
	use serde_json::json;

	fn path(raw: &str) -> FieldPath {
		FieldPath::parse(raw).unwrap()
	}

	fn require_name() -> FnSchema<impl Fn(&Value) -> SchemaResult> {
		FnSchema::new(|values: &Value| {
			let mut result = SchemaResult::new();
			if values.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
				result.add(FieldPath::parse("name").unwrap(), "Name is required");
			}
			result
		})
	}

	#[rstest]
	fn test_set_field_value_marks_dirty_and_pending() {
		let form = Form::with_initial(json!({ "name": "Ada" }));

		form.set_field_value("name", json!("Grace")).unwrap();

		let meta = form.field_meta("name").unwrap();
		assert!(meta.dirty);
		assert!(meta.pending);
		assert_eq!(meta.initial_value, Some(json!("Ada")));
		assert!(form.meta().dirty);
		assert_eq!(form.pending_tasks(), 1);
	}

	#[tokio::test]
	async fn test_flush_runs_field_validation() {
		let form = Form::builder()
			.initial_values(json!({ "name": "Ada" }))
			.schema(require_name())
			.build()
			.unwrap();

		form.set_field_value("name", json!("")).unwrap();
		form.set_field_value("name", json!("")).unwrap();
		assert_eq!(form.pending_tasks(), 1);

		assert_eq!(form.flush().await, 1);

		let meta = form.field_meta("name").unwrap();
		assert!(!meta.pending);
		assert!(meta.validated);
		assert!(!meta.valid);
		assert_eq!(form.field_errors("name").unwrap(), vec!["Name is required".to_string()]);
		assert!(!form.meta().valid);
	}

	#[rstest]
	fn test_set_values_parses_all_paths_first() {
		let form = Form::new();

		let result = form.set_values(vec![("a", json!(1)), ("b[", json!(2))]);

		assert!(result.is_err());
		assert_eq!(form.values(), json!({}));
	}

	#[rstest]
	fn test_set_values_schedules_only_changed_paths() {
		let form = Form::with_initial(json!({ "a": 1, "b": 2 }));

		form.set_values(vec![("a", json!(1)), ("b", json!(3))]).unwrap();

		assert_eq!(form.pending_tasks(), 1);
		assert!(form.field_meta("b").unwrap().pending);
		assert!(!form.field_meta("a").unwrap().pending);
	}

	#[rstest]
	fn test_manual_error_on_unregistered_path_does_not_affect_validity() {
		let form = Form::new();

		form.set_field_error("server", Some("Try again".to_string())).unwrap();

		assert_eq!(form.errors().len(), 1);
		assert!(form.meta().valid);

		let _field = form.register_field("server").unwrap();
		assert!(!form.meta().valid);
	}

	#[rstest]
	fn test_dropping_last_registrant_clears_errors() {
		let form = Form::new();
		let first = form.register_field("email").unwrap();
		let second = form.register_field("email").unwrap();
		form.set_field_error("email", Some("Taken".to_string())).unwrap();

		drop(first);
		assert_eq!(form.field_errors("email").unwrap().len(), 1);

		drop(second);
		assert!(form.field_errors("email").unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_validate_marks_registered_fields_validated() {
		let form = Form::builder().schema(require_name()).build().unwrap();
		let _name = form.register_field("name").unwrap();

		let valid = form.validate().await;

		assert!(!valid);
		assert!(form.field_meta("name").unwrap().validated);
		assert!(!form.meta().valid);
	}

	#[tokio::test]
	async fn test_silent_validation_never_marks_validated() {
		let form = Form::builder()
			.schema(require_name())
			.validate_on_mount(true)
			.build()
			.unwrap();
		let _name = form.register_field("name").unwrap();

		form.flush().await;

		let meta = form.field_meta("name").unwrap();
		assert!(!meta.validated);
		assert!(!meta.touched);
		assert!(!meta.valid);
	}

	#[tokio::test]
	async fn test_field_rules_run_with_schema() {
		let form = Form::with_initial(json!({ "email": "nope" }));
		let _email = form
			.register_field_with_rules("email", Rules::new().email())
			.unwrap();

		let result = form.validate_field("email").unwrap().await;

		assert!(result.applied);
		assert_eq!(result.errors, vec!["Enter a valid email address".to_string()]);
	}

	#[tokio::test]
	async fn test_reset_discards_in_flight_results() {
		let form = Form::builder().schema(require_name()).build().unwrap();

		let pending = form.validate_field("name").unwrap();
		form.reset();
		let result = pending.await;

		assert!(!result.applied);
		assert!(form.errors().is_empty());
	}

	#[rstest]
	fn test_reset_to_replaces_initial_values() {
		let form = Form::with_initial(json!({ "a": 1 }));
		form.set_value("a", json!(2)).unwrap();
		form.set_field_touched("a", true).unwrap();

		form.reset_to(json!({ "a": 3 }));

		assert_eq!(form.values(), json!({ "a": 3 }));
		assert_eq!(form.initial_values(), json!({ "a": 3 }));
		assert!(!form.meta().dirty);
		assert!(!form.meta().touched);
	}

	#[rstest]
	fn test_subscription_guard_unsubscribes_on_drop() {
		let form = Form::new();
		let seen = Rc::new(RefCell::new(Vec::new()));
		let sink = seen.clone();
		let subscription = form
			.subscribe("users", move |change: &Change| sink.borrow_mut().push(change.clone()))
			.unwrap();

		form.set_value("users[0]", json!("one")).unwrap();
		form.set_value("title", json!("x")).unwrap();
		drop(subscription);
		form.set_value("users[1]", json!("two")).unwrap();

		assert_eq!(
			*seen.borrow(),
			vec![Change {
				path: path("users[0]"),
				kind: ChangeKind::Value
			}]
		);
	}

	#[rstest]
	fn test_write_into_scalar_is_ignored() {
		let form = Form::with_initial(json!({ "name": "Ada" }));

		form.set_field_value("name.first", json!("x")).unwrap();

		assert_eq!(form.values(), json!({ "name": "Ada" }));
		assert_eq!(form.pending_tasks(), 0);
	}

	#[rstest]
	fn test_detaching_fields_notifies_meta() {
		let form = Form::with_initial(json!({ "users": ["a", "b", "c"] }));
		let users = form.field_array("users").unwrap();
		let _first = form.register_field("users[0]").unwrap();
		let kinds = Rc::new(RefCell::new(Vec::new()));
		let sink = kinds.clone();
		let _subscription = form
			.subscribe("users", move |change: &Change| sink.borrow_mut().push(change.kind))
			.unwrap();

		users.swap(1, 2);
		assert!(!kinds.borrow().contains(&ChangeKind::Meta));

		users.remove(0);
		assert!(kinds.borrow().contains(&ChangeKind::Meta));
	}

	#[rstest]
	fn test_write_at_unreachable_index_keeps_array() {
		let form = Form::with_initial(json!({ "users": ["a", "b"] }));

		form.set_value("users[18446744073709551615]", json!("x")).unwrap();
		form.set_field_value("users[18446744073709551615]", json!("x")).unwrap();

		assert_eq!(form.values(), json!({ "users": ["a", "b"] }));
		assert_eq!(form.pending_tasks(), 0);
	}

	#[rstest]
	fn test_config_initial_errors_and_touched() {
		let config = FormConfig::new()
			.initial_values(json!({ "email": "" }))
			.initial_error("email", "Required")
			.initial_touched("email");

		let form = Form::with_config(config).unwrap();

		assert_eq!(form.field_errors("email").unwrap(), vec!["Required".to_string()]);
		assert!(form.field_meta("email").unwrap().touched);
		assert!(!form.meta().valid);
	}

	#[rstest]
	#[case(None, Some(json!(null)), true)]
	#[case(Some(json!({ "a": null })), Some(json!({})), true)]
	#[case(Some(json!([1, null])), Some(json!([1])), false)]
	#[case(Some(json!({ "a": [1] })), Some(json!({ "a": [1] })), true)]
	#[case(Some(json!("a")), Some(json!("b")), false)]
	fn test_same_value(#[case] a: Option<Value>, #[case] b: Option<Value>, #[case] expected: bool) {
		assert_eq!(same_value(a.as_ref(), b.as_ref()), expected);
	}
}
