//! Field registry
//!
//! Tracks which fields are mounted, where they currently live and which
//! field-level [`Rules`] they carry. Several registrants may share a path; the
//! path stays registered until the last of them is gone.
//!
//! Paths inside arrays are positional. When an array is reordered the registry
//! re-keys its fields, and fields whose item was removed are detached.

use std::collections::{BTreeMap, BTreeSet};

use formwork_core::path::FieldPath;

use crate::field_array::ArrayOp;
use crate::validators::Rules;

/// Identifier of one registrant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(u64);

#[derive(Debug, Clone)]
pub(crate) struct RegisteredField {
	pub(crate) path: FieldPath,
	pub(crate) rules: Rules,
}

#[derive(Debug, Default)]
pub(crate) struct FieldRegistry {
	next_id: u64,
	fields: BTreeMap<FieldId, RegisteredField>,
}

impl FieldRegistry {
	pub(crate) fn register(&mut self, path: FieldPath, rules: Rules) -> FieldId {
		let id = FieldId(self.next_id);
		self.next_id += 1;
		tracing::debug!(field = %path, id = id.0, "field registered");
		self.fields.insert(id, RegisteredField { path, rules });
		id
	}

	/// Remove a registrant, returning its last path
	///
	/// Detached registrants are already gone and yield `None`.
	pub(crate) fn unregister(&mut self, id: FieldId) -> Option<FieldPath> {
		let field = self.fields.remove(&id)?;
		tracing::debug!(field = %field.path, id = id.0, "field unregistered");
		Some(field.path)
	}

	pub(crate) fn path_of(&self, id: FieldId) -> Option<&FieldPath> {
		self.fields.get(&id).map(|field| &field.path)
	}

	pub(crate) fn is_registered(&self, path: &FieldPath) -> bool {
		self.fields.values().any(|field| field.path == *path)
	}

	pub(crate) fn paths(&self) -> BTreeSet<FieldPath> {
		self.fields.values().map(|field| field.path.clone()).collect()
	}

	/// Non-empty rule sets of every registrant at `path`
	pub(crate) fn rules_at(&self, path: &FieldPath) -> Vec<Rules> {
		self.fields
			.values()
			.filter(|field| field.path == *path && !field.rules.is_empty())
			.map(|field| field.rules.clone())
			.collect()
	}

	/// Every registrant carrying rules, with its path
	pub(crate) fn ruled_fields(&self) -> Vec<(FieldPath, Rules)> {
		self.fields
			.values()
			.filter(|field| !field.rules.is_empty())
			.map(|field| (field.path.clone(), field.rules.clone()))
			.collect()
	}

	/// Follow a structural change of the array at `array_path`
	///
	/// Returns the registrants that were detached because their item was removed.
	pub(crate) fn remap(&mut self, array_path: &FieldPath, op: &ArrayOp) -> Vec<FieldId> {
		let mut detached = Vec::new();
		for (id, field) in &mut self.fields {
			match op.remap_path(array_path, &field.path) {
				Some(path) => field.path = path,
				None => detached.push(*id),
			}
		}
		for id in &detached {
			if let Some(field) = self.fields.remove(id) {
				tracing::debug!(field = %field.path, id = id.0, "field detached");
			}
		}
		detached
	}

	pub(crate) fn len(&self) -> usize {
		self.fields.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn path(raw: &str) -> FieldPath {
		FieldPath::parse(raw).unwrap()
	}

	#[rstest]
	fn test_multiple_registrants_per_path() {
		let mut registry = FieldRegistry::default();
		let first = registry.register(path("email"), Rules::new());
		let second = registry.register(path("email"), Rules::new().email());

		assert_eq!(registry.len(), 2);
		assert_eq!(registry.rules_at(&path("email")).len(), 1);

		assert_eq!(registry.unregister(first), Some(path("email")));
		assert!(registry.is_registered(&path("email")));
		assert_eq!(registry.unregister(second), Some(path("email")));
		assert!(!registry.is_registered(&path("email")));
		assert_eq!(registry.unregister(second), None);
	}

	#[rstest]
	fn test_remap_follows_moves_and_detaches_removed() {
		let mut registry = FieldRegistry::default();
		let first = registry.register(path("users[0].name"), Rules::new());
		let second = registry.register(path("users[1].name"), Rules::new());
		let other = registry.register(path("title"), Rules::new());

		let detached = registry.remap(&path("users"), &ArrayOp::Remove(0));

		assert_eq!(detached, vec![first]);
		assert_eq!(registry.path_of(first), None);
		assert_eq!(registry.path_of(second), Some(&path("users[0].name")));
		assert_eq!(registry.path_of(other), Some(&path("title")));
	}

	#[rstest]
	fn test_ruled_fields_skips_empty_rules() {
		let mut registry = FieldRegistry::default();
		registry.register(path("a"), Rules::new());
		registry.register(path("b"), Rules::new().required());

		assert_eq!(registry.ruled_fields(), vec![(path("b"), Rules::new().required())]);
	}
}
