//! Path-prefix subscriptions
//!
//! A [`Subscriptions`] registry maps path prefixes to callbacks. Notifying a path
//! invokes every callback whose prefix is related to it, meaning the prefix is an
//! ancestor of the changed path (a field inside the subscribed subtree changed) or
//! a descendant of it (the subtree containing the subscribed field was replaced).
//!
//! ## Example
//!
//! ```
//! use formwork_core::path::FieldPath;
//! use formwork_core::reactive::Subscriptions;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let subscriptions: Subscriptions<&'static str> = Subscriptions::new();
//! let hits = Rc::new(Cell::new(0));
//!
//! let counter = hits.clone();
//! subscriptions.subscribe(FieldPath::parse("users").unwrap(), move |_| {
//!     counter.set(counter.get() + 1);
//! });
//!
//! subscriptions.notify(&FieldPath::parse("users[0].name").unwrap(), &"value");
//! subscriptions.notify(&FieldPath::parse("email").unwrap(), &"value");
//! assert_eq!(hits.get(), 1);
//! ```

use core::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::path::FieldPath;

/// Identifier returned by [`Subscriptions::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Shared callback invoked with the change event
pub type Callback<E> = Rc<dyn Fn(&E)>;

struct Subscriber<E> {
	prefix: FieldPath,
	callback: Callback<E>,
}

/// Registry of path-prefix subscribers
pub struct Subscriptions<E> {
	next_id: Cell<u64>,
	subscribers: RefCell<BTreeMap<SubscriptionId, Subscriber<E>>>,
}

impl<E> Subscriptions<E> {
	pub fn new() -> Self {
		Self {
			next_id: Cell::new(0),
			subscribers: RefCell::new(BTreeMap::new()),
		}
	}

	/// Register `callback` for changes related to `prefix`
	///
	/// Callbacks run in registration order.
	pub fn subscribe<F>(&self, prefix: FieldPath, callback: F) -> SubscriptionId
	where
		F: Fn(&E) + 'static,
	{
		let id = SubscriptionId(self.next_id.get());
		self.next_id.set(id.0 + 1);
		self.subscribers.borrow_mut().insert(
			id,
			Subscriber {
				prefix,
				callback: Rc::new(callback),
			},
		);
		id
	}

	/// Remove a subscriber, returning whether it was registered
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		self.subscribers.borrow_mut().remove(&id).is_some()
	}

	/// Invoke every subscriber related to `path` and return how many ran
	///
	/// Matching callbacks are collected before any of them runs, so a callback
	/// may subscribe, unsubscribe or trigger nested notifications.
	pub fn notify(&self, path: &FieldPath, event: &E) -> usize {
		let matching: Vec<Callback<E>> = self
			.subscribers
			.borrow()
			.values()
			.filter(|subscriber| subscriber.prefix.is_related(path))
			.map(|subscriber| subscriber.callback.clone())
			.collect();

		tracing::trace!(path = %path, subscribers = matching.len(), "notifying subscribers");
		for callback in &matching {
			callback(event);
		}
		matching.len()
	}

	pub fn len(&self) -> usize {
		self.subscribers.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.subscribers.borrow().is_empty()
	}
}

impl<E> Default for Subscriptions<E> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn path(raw: &str) -> FieldPath {
		FieldPath::parse(raw).unwrap()
	}

	fn recorder(
		subscriptions: &Subscriptions<String>,
		prefix: &str,
	) -> (SubscriptionId, Rc<RefCell<Vec<String>>>) {
		let seen = Rc::new(RefCell::new(Vec::new()));
		let sink = seen.clone();
		let id = subscriptions.subscribe(path(prefix), move |event: &String| {
			sink.borrow_mut().push(event.clone());
		});
		(id, seen)
	}

	#[rstest]
	#[case("users", "users[0].name", true)]
	#[case("users[0].name", "users", true)]
	#[case("users", "users", true)]
	#[case("users[1]", "users[0]", false)]
	#[case("users", "email", false)]
	fn test_notify_matches_related_paths(
		#[case] prefix: &str,
		#[case] changed: &str,
		#[case] expected: bool,
	) {
		let subscriptions = Subscriptions::new();
		let (_, seen) = recorder(&subscriptions, prefix);

		let ran = subscriptions.notify(&path(changed), &"change".to_string());

		assert_eq!(ran == 1, expected);
		assert_eq!(seen.borrow().len() == 1, expected);
	}

	#[rstest]
	fn test_unsubscribe_stops_delivery() {
		let subscriptions = Subscriptions::new();
		let (id, seen) = recorder(&subscriptions, "users");

		assert!(subscriptions.unsubscribe(id));
		assert!(!subscriptions.unsubscribe(id));
		subscriptions.notify(&path("users"), &"change".to_string());

		assert!(seen.borrow().is_empty());
		assert!(subscriptions.is_empty());
	}

	#[rstest]
	fn test_callback_may_reenter_registry() {
		let subscriptions: Rc<Subscriptions<String>> = Rc::new(Subscriptions::new());
		let registry = subscriptions.clone();
		subscriptions.subscribe(path("users"), move |_| {
			registry.subscribe(path("late"), |_| {});
		});

		subscriptions.notify(&path("users"), &"change".to_string());

		assert_eq!(subscriptions.len(), 2);
	}
}
