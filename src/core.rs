//! Path addressing and reactive primitives module.
//!
//! This module provides access to field paths, value-tree resolution,
//! path-prefix subscriptions and the deferred task queue.
//!
//! # Examples
//!
//! ```rust
//! use formwork::core::path::{self, FieldPath};
//! use serde_json::json;
//!
//! let tree = json!({ "users": [{ "name": "Ada" }] });
//! let name = FieldPath::parse("users[0].name").unwrap();
//! assert_eq!(path::get(&tree, &name), Some(&json!("Ada")));
//! ```

pub use formwork_core::*;
