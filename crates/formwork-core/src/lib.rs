//! Core primitives for Formwork
//!
//! This crate holds the pieces of Formwork that know nothing about forms:
//!
//! - [`path`]: parsing and resolving `users[1].name` style paths inside a
//!   `serde_json::Value` tree
//! - [`reactive`]: path-prefix subscriptions and the explicit deferred task queue
//!
//! `formwork-forms` builds the form store, field registry and field-array engine
//! on top of them.

pub mod path;
pub mod reactive;

pub use path::{FieldPath, IntoFieldPath, PathError, PathSegment};
pub use reactive::{Callback, SubscriptionId, Subscriptions, Task, TaskQueue};
