//! Reactive primitives
//!
//! Formwork replaces framework-managed reactivity with two explicit building blocks:
//!
//! 1. **Subscriptions**: callbacks registered against a path prefix and invoked
//!    whenever a related path changes
//! 2. **Task Queue**: keyed, single-slot deferred tasks that coalesce repeated
//!    scheduling into one run against the then-current state
//!
//! Both are single-threaded (`Rc`/`RefCell`) and never hold a borrow while user
//! code runs, so callbacks and tasks may freely re-enter the owner.

pub mod scheduler;
pub mod subscription;

pub use scheduler::{Task, TaskQueue};
pub use subscription::{Callback, SubscriptionId, Subscriptions};
