//! Deferred Task Queue
//!
//! `TaskQueue<K>` models the "next tick" as an explicit queue of keyed,
//! single-slot tasks:
//!
//! - Scheduling a key that is already pending is a no-op, so repeated requests
//!   made in the same synchronous block coalesce into one run
//! - A task is a factory: the future is only created when the task is run, so it
//!   observes the state at run time rather than at scheduling time
//! - Nothing runs on its own. The owner drives the queue with
//!   [`TaskQueue::run_until_idle`], mirroring how updates are flushed manually
//!   when no platform scheduler is installed
//!
//! ## Example
//!
//! ```
//! use formwork_core::reactive::TaskQueue;
//! use std::cell::Cell;
//! use std::rc::Rc;
//!
//! let queue: TaskQueue<&'static str> = TaskQueue::new();
//! let runs = Rc::new(Cell::new(0));
//!
//! for _ in 0..3 {
//!     let runs = runs.clone();
//!     queue.schedule("validate", move || async move { runs.set(runs.get() + 1) });
//! }
//!
//! futures::executor::block_on(queue.run_until_idle());
//! assert_eq!(runs.get(), 1);
//! ```

use core::cell::RefCell;
use core::fmt;
use core::future::Future;
use std::collections::VecDeque;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

/// A deferred unit of work, turned into a future when it runs
pub type Task = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()>>;

/// Keyed single-slot task queue
pub struct TaskQueue<K> {
	queue: RefCell<VecDeque<(K, Task)>>,
}

impl<K> TaskQueue<K>
where
	K: PartialEq + fmt::Debug,
{
	pub fn new() -> Self {
		Self {
			queue: RefCell::new(VecDeque::new()),
		}
	}

	/// Schedule `task` under `key`
	///
	/// Returns `false` when a task with the same key is already pending; the
	/// pending task is kept and `task` is dropped.
	pub fn schedule<F, Fut>(&self, key: K, task: F) -> bool
	where
		F: FnOnce() -> Fut + 'static,
		Fut: Future<Output = ()> + 'static,
	{
		let mut queue = self.queue.borrow_mut();
		if queue.iter().any(|(pending, _)| *pending == key) {
			tracing::trace!(?key, "task already pending");
			return false;
		}

		tracing::debug!(?key, "task scheduled");
		queue.push_back((key, Box::new(move || task().boxed_local())));
		true
	}

	pub fn is_pending(&self, key: &K) -> bool {
		self.queue.borrow().iter().any(|(pending, _)| pending == key)
	}

	/// Remove the oldest pending task
	pub fn pop(&self) -> Option<(K, Task)> {
		self.queue.borrow_mut().pop_front()
	}

	pub fn len(&self) -> usize {
		self.queue.borrow().len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.borrow().is_empty()
	}

	/// Run tasks in scheduling order until the queue is empty
	///
	/// Tasks scheduled while this runs are picked up in the same call. Returns the
	/// number of tasks that ran.
	pub async fn run_until_idle(&self) -> usize {
		let mut ran = 0;
		while let Some((key, task)) = self.pop() {
			tracing::trace!(?key, "running task");
			task().await;
			ran += 1;
		}
		ran
	}
}

impl<K> Default for TaskQueue<K>
where
	K: PartialEq + fmt::Debug,
{
	fn default() -> Self {
		Self::new()
	}
}
