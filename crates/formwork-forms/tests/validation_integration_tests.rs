//! Validation Integration Tests
//!
//! Covers the asynchronous side of the store: scheduling, coalescing,
//! out-of-order completions, mount validation and configuration.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use formwork_forms::{
	ChangeKind, FieldPath, Form, FormConfig, RuleSchema, Rules, Schema, SchemaResult,
};
use rstest::rstest;
use serde_json::{Value, json};

/// Schema that yields `delay` times before reporting an empty `name`
struct SlowSchema;

#[async_trait(?Send)]
impl Schema for SlowSchema {
	async fn validate(&self, values: &Value) -> SchemaResult {
		let delay = values.get("delay").and_then(Value::as_u64).unwrap_or(0);
		for _ in 0..delay {
			tokio::task::yield_now().await;
		}
		let mut result = SchemaResult::new();
		if values.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
			result.add(FieldPath::parse("name").unwrap(), "Name is required");
		}
		result
	}
}

// ============================================================================
// Out-of-order completions
// ============================================================================

/// Tests that an older field validation finishing last is discarded
#[tokio::test]
async fn test_older_field_validation_does_not_overwrite_newer() {
	let form = Form::builder()
		.initial_values(json!({ "name": "", "delay": 5 }))
		.schema(SlowSchema)
		.build()
		.unwrap();

	let older = form.validate_field("name").unwrap();
	form.set_value("name", json!("Ada")).unwrap();
	form.set_value("delay", json!(0)).unwrap();
	let newer = form.validate_field("name").unwrap();

	let (older, newer) = futures::join!(older, newer);

	assert!(newer.applied && newer.is_valid());
	assert!(!older.applied && !older.is_valid());
	assert!(form.field_errors("name").unwrap().is_empty());
	assert!(form.meta().valid);
	assert!(!form.field_meta("name").unwrap().pending);
}

/// Tests that an older whole-form pass cannot overwrite a newer field result
#[tokio::test]
async fn test_older_form_validation_is_discarded_per_path() {
	let form = Form::builder()
		.initial_values(json!({ "name": "", "delay": 3 }))
		.schema(SlowSchema)
		.build()
		.unwrap();
	let _name = form.register_field("name").unwrap();

	let whole = form.validate();
	form.set_values(vec![("name", json!("Ada")), ("delay", json!(0))]).unwrap();
	let field = form.validate_field("name").unwrap();

	let (valid, field) = futures::join!(whole, field);

	assert!(!valid);
	assert!(field.applied);
	assert!(form.field_errors("name").unwrap().is_empty());
}

/// Tests that results of validations issued before a reset are dropped
#[tokio::test]
async fn test_reset_drops_in_flight_validation() {
	let form = Form::builder()
		.initial_values(json!({ "name": "", "delay": 2 }))
		.schema(SlowSchema)
		.build()
		.unwrap();

	let pending = form.validate();
	form.reset();

	assert!(!pending.await);
	assert!(form.errors().is_empty());
	assert!(!form.meta().pending);
}

// ============================================================================
// Scheduling
// ============================================================================

/// Tests that repeated writes to one field queue a single validation
#[tokio::test]
async fn test_repeated_writes_coalesce() {
	let form = Form::builder().schema(SlowSchema).build().unwrap();

	form.set_field_value("name", json!("A")).unwrap();
	form.set_field_value("name", json!("")).unwrap();
	form.set_field_value("email", json!("x")).unwrap();

	assert_eq!(form.pending_tasks(), 2);
	assert_eq!(form.flush().await, 2);
	assert_eq!(
		form.field_errors("name").unwrap(),
		vec!["Name is required".to_string()]
	);
}

/// Tests that mount validation runs silently on the first flush
#[tokio::test]
async fn test_validate_on_mount_from_config() {
	let config: FormConfig = serde_json::from_value(json!({
		"initial_values": { "users": ["", "ok@example.com"] },
		"validate_on_mount": true
	}))
	.unwrap();
	let form = Form::builder()
		.config(config)
		.schema(RuleSchema::new().field("users[]", Rules::new().required()).unwrap())
		.build()
		.unwrap();
	assert_eq!(form.pending_tasks(), 1);

	form.flush().await;

	assert!(!form.meta().valid);
	assert!(!form.field_meta("users[0]").unwrap().validated);
}

/// Tests that subscribers see pending and error changes of a validation
#[tokio::test]
async fn test_subscribers_observe_validation() {
	let form = Form::builder().schema(SlowSchema).build().unwrap();
	let kinds = Rc::new(RefCell::new(Vec::new()));
	let sink = kinds.clone();
	let _subscription = form
		.subscribe("name", move |change| sink.borrow_mut().push(change.kind))
		.unwrap();

	form.set_field_value("name", json!("")).unwrap();
	form.flush().await;

	let kinds = kinds.borrow();
	assert_eq!(kinds.first(), Some(&ChangeKind::Value));
	assert!(kinds.contains(&ChangeKind::Meta));
	assert_eq!(kinds.last(), Some(&ChangeKind::Errors));
}

// ============================================================================
// Manual errors
// ============================================================================

/// Tests that whole-form validation keeps manual errors on unregistered paths
#[tokio::test]
async fn test_validation_keeps_unregistered_manual_errors() {
	let form = Form::builder()
		.initial_values(json!({ "name": "Ada" }))
		.schema(SlowSchema)
		.build()
		.unwrap();
	form.set_field_error("server", Some("Unavailable".to_string())).unwrap();

	assert!(form.validate().await);

	assert_eq!(
		form.field_errors("server").unwrap(),
		vec!["Unavailable".to_string()]
	);
	assert!(form.meta().valid);
}

/// Tests that malformed paths are reported as errors
#[rstest]
#[case("users[")]
#[case("users..name")]
#[case("")]
fn test_malformed_paths_are_errors(#[case] raw: &str) {
	let form = Form::new();

	assert!(form.set_field_value(raw, json!(1)).is_err());
	assert!(form.field_array(raw).is_err());
	assert!(form.register_field(raw).is_err());
}
