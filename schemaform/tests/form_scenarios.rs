/// Scenario tests: drive a mounted form the way a renderer would (changes,
/// focus, blur, item edits) and check the value, field state and errors the
/// controller settles on. Timers and slow validators run on paused time.
use pretty_assertions::assert_eq;
use schemaform::coerce::{RawInput, ValueParser};
use schemaform::context::{FormOptions, Formatters};
use schemaform::field::{FieldProps, ShowError};
use schemaform::schema::{SchemaNode, SchemaType};
use schemaform::validate::{BoxError, CustomValidator};
use schemaform::widget::{FormType, MonthRangeWidget};
use schemaform::{ErrorEntry, FormConfig, FormController, FormError, FormSnapshot};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn mount(schema: Value, default_value: Value) -> FormController {
    let mut config = FormConfig::new(schema);
    config.default_value = default_value;
    FormController::mount(config).unwrap()
}

fn keys(value: &Value) -> BTreeSet<String> {
    value
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
}

// ── Shape ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_root_value_keeps_declared_shape() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "default": ""},
                "count": {"type": "integer", "default": 0},
                "nested": {
                    "type": "object",
                    "properties": {"flag": {"type": "boolean", "default": false}}
                }
            }
        }),
        json!({"stray": 1}),
    );
    let declared: BTreeSet<String> = ["name", "count", "nested"].iter().map(|s| s.to_string()).collect();
    assert_eq!(keys(&form.value()), declared);

    let inputs = [
        ("name", json!("alice")),
        ("count", json!("12")),
        ("nested.flag", json!("on")),
        ("nested", json!({"flag": false, "junk": true})),
        ("count", json!("not a number")),
    ];
    for (path, raw) in inputs {
        form.change(path, raw).unwrap();
        let value = form.value();
        assert_eq!(keys(&value), declared, "after changing {path}");
        assert_eq!(keys(&value["nested"]), BTreeSet::from(["flag".to_string()]));
    }
    form.settle().await.unwrap();
    assert_eq!(
        form.value(),
        json!({"name": "alice", "count": 12, "nested": {"flag": false}})
    );
}

// ── getValue ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_value_is_idempotent() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {"name": {"type": "string", "maxLength": 2}}
        }),
        json!({}),
    );
    form.change("name", json!("toolong")).unwrap();
    let first = form.get_value().await.unwrap();
    let second = form.get_value().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.errors.len(), 1);
    form.settle().await.unwrap();
}

#[tokio::test]
async fn test_required_field_missing() {
    let form = mount(
        json!({
            "type": "object",
            "properties": {"age": {"type": "integer"}},
            "required": ["age"]
        }),
        json!({}),
    );
    let snapshot = form.get_value().await.unwrap();
    assert_eq!(snapshot.value, json!({}));
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].data_path.as_str(), "age");
    assert_eq!(snapshot.errors[0].keyword, "required");
}

#[tokio::test]
async fn test_required_names_from_options() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {
            "address": {"type": "object", "properties": {"city": {"type": "string"}}}
        }
    }));
    config.options.required = vec!["address.city".into()];
    let form = FormController::mount(config).unwrap();
    let snapshot = form.get_value().await.unwrap();
    assert_eq!(snapshot.errors[0].data_path.as_str(), "address.city");
    assert!(form.tree().node(&"address.city".into()).unwrap().is_required());
}

#[tokio::test]
async fn test_handle_reads_latest_value_from_another_task() {
    let mut form = mount(
        json!({"type": "object", "properties": {"n": {"type": "number"}}}),
        json!({}),
    );
    let handle = form.handle();
    form.change("n", json!("2.5")).unwrap();
    let snapshot = tokio::spawn(async move { handle.get_value().await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.value, json!({"n": 2.5}));
    assert!(snapshot.is_valid());
}

#[tokio::test]
async fn test_submit_hands_snapshot_to_callback() {
    let submitted = Arc::new(Mutex::new(None));
    let sink = submitted.clone();
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"age": {"type": "integer"}},
        "required": ["age"]
    }));
    config.callbacks.on_submit = Some(Box::new(move |snapshot: &FormSnapshot| {
        *sink.lock().unwrap() = Some(snapshot.clone());
    }));
    let mut form = FormController::mount(config).unwrap();
    let snapshot = form.submit().await.unwrap();
    assert!(!snapshot.is_valid());
    assert_eq!(submitted.lock().unwrap().as_ref(), Some(&snapshot));
}

// ── Field state ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dirty_never_reverts() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}, "other": {"type": "string"}}
        }),
        json!({}),
    );
    assert!(!form.ui_state("name").unwrap().is_dirty);
    form.change("name", json!("x")).unwrap();
    assert!(form.ui_state("name").unwrap().is_dirty);

    form.change("name", Value::Null).unwrap();
    form.set_value("name", json!("restored")).unwrap();
    form.change("other", json!("y")).unwrap();
    form.settle().await.unwrap();
    assert!(form.ui_state("name").unwrap().is_dirty);
    assert!(form.ui_state("").unwrap().is_dirty);
}

fn debounced(ms: u64) -> FormController {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"name": {"type": "string"}}
    }));
    config.options = FormOptions {
        blur_debounce_ms: ms,
        ..FormOptions::default()
    };
    FormController::mount(config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_blur_commits_touched_after_debounce() {
    let mut form = debounced(50);
    form.focus("name").unwrap();
    form.blur("name").unwrap();
    let ui = form.ui_state("name").unwrap();
    assert!(ui.is_focused && !ui.is_touched);
    form.settle().await.unwrap();
    let ui = form.ui_state("name").unwrap();
    assert!(!ui.is_focused && ui.is_touched);
}

#[tokio::test(start_paused = true)]
async fn test_refocus_inside_debounce_keeps_focus() {
    let mut form = debounced(50);
    form.focus("name").unwrap();
    form.blur("name").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    form.focus("name").unwrap();
    form.settle().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    form.settle().await.unwrap();
    let ui = form.ui_state("name").unwrap();
    assert!(ui.is_focused && !ui.is_touched);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timer_never_lands() {
    let mut form = debounced(50);
    form.focus("name").unwrap();
    form.blur("name").unwrap();
    // The first timer has fired and queued its event, but a newer blur is pending.
    tokio::time::sleep(Duration::from_millis(60)).await;
    form.focus("name").unwrap();
    form.blur("name").unwrap();
    assert!(form.ui_state("name").unwrap().is_focused);
    form.settle().await.unwrap();
    let ui = form.ui_state("name").unwrap();
    assert!(!ui.is_focused && ui.is_touched);
}

#[test]
fn test_blur_without_runtime() {
    let mut form = debounced(0);
    form.focus("name").unwrap();
    assert!(matches!(form.blur("name"), Err(FormError::NoRuntime)));
}

// ── Validation ordering ─────────────────────────────────────────────────

fn slow_for_slow() -> Arc<dyn CustomValidator> {
    Arc::new(|value: Option<Value>| async move {
        let text = value
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let delay = if text == "slow" { 100 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok::<_, BoxError>(vec![format!("rejected {text}")])
    })
}

#[tokio::test(start_paused = true)]
async fn test_superseded_validation_is_discarded() {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"code": {"type": "string"}}
    }));
    config.custom_validators.insert("code".into(), slow_for_slow());
    config.callbacks.on_change_with_errors = Some(Box::new(move |value: &Value, errors: Option<&[ErrorEntry]>| {
        let messages: Vec<String> = errors
            .unwrap_or_default()
            .iter()
            .map(|e| e.message.clone())
            .collect();
        sink.lock().unwrap().push((value.clone(), messages));
    }));
    let mut form = FormController::mount(config).unwrap();

    form.change("code", json!("slow")).unwrap();
    assert!(form.process_next().await.unwrap());
    form.change("code", json!("fast")).unwrap();
    assert!(form.process_next().await.unwrap());
    form.settle().await.unwrap();

    assert_eq!(form.settled_value(), &json!({"code": "fast"}));
    assert_eq!(form.errors()[0].message, "rejected fast");
    assert_eq!(
        *delivered.lock().unwrap(),
        vec![(json!({"code": "fast"}), vec!["rejected fast".to_string()])]
    );
}

#[tokio::test]
async fn test_burst_of_changes_validates_once() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let changes = Arc::new(Mutex::new(0));
    let change_counter = changes.clone();
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"code": {"type": "string"}}
    }));
    config.custom_validators.insert(
        "code".into(),
        Arc::new(move |_: Option<Value>| {
            *counter.lock().unwrap() += 1;
            async { Ok::<Vec<String>, BoxError>(Vec::new()) }
        }),
    );
    config.callbacks.on_change = Some(Box::new(move |_: &Value| *change_counter.lock().unwrap() += 1));
    let mut form = FormController::mount(config).unwrap();
    for text in ["a", "ab", "abc"] {
        form.change("code", json!(text)).unwrap();
    }
    assert_eq!(*changes.lock().unwrap(), 0);
    form.settle().await.unwrap();
    assert_eq!(*changes.lock().unwrap(), 3);
    assert_eq!(*calls.lock().unwrap(), 1);
    assert_eq!(form.settled_value(), &json!({"code": "abc"}));
}

#[tokio::test]
async fn test_failing_custom_validator_surfaces() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"code": {"type": "string"}}
    }));
    config.custom_validators.insert(
        "code".into(),
        Arc::new(|_: Option<Value>| async { Err::<Vec<String>, BoxError>("backend down".into()) }),
    );
    let mut form = FormController::mount(config).unwrap();
    form.change("code", json!("x")).unwrap();
    let err = form.settle().await.unwrap_err();
    assert!(matches!(err, FormError::Validation(_)));
}

// ── Rendering ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_enum_defaults_to_first_option() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {"choice": {"type": "string", "enum": ["a", "b", "c"]}}
        }),
        json!({}),
    );
    let props = form.props("choice").unwrap();
    assert_eq!(props.value, None);
    assert_eq!(props.default_candidate(), Some(&json!("a")));
    let labels: Vec<&str> = props.enum_options.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_enum_alias_and_formatter() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {
            "choice": {
                "type": "string",
                "enum": ["a", "b"],
                "options": {"alias": {"a": "Alpha"}}
            }
        }
    }));
    config.formatters = Formatters {
        enum_label: Arc::new(|value: &Value, _: &FieldProps| format!("<{}>", value.as_str().unwrap_or_default())),
        ..Formatters::default()
    };
    let mut form = FormController::mount(config).unwrap();
    let props = form.props("choice").unwrap();
    let labels: Vec<&str> = props.enum_options.iter().map(|o| o.label.as_str()).collect();
    assert_eq!(labels, vec!["Alpha", "<b>"]);
}

#[tokio::test]
async fn test_conditional_visibility_preserves_value() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {
                "a": {"type": "string"},
                "b": {"type": "string", "show": "$.a === 'x'"}
            }
        }),
        json!({"a": "x"}),
    );
    assert!(!form.props("b").unwrap().is_hidden);
    form.change("b", json!("kept")).unwrap();

    form.change("a", json!("y")).unwrap();
    assert!(form.props("b").unwrap().is_hidden);
    let rendered: Vec<String> = form.render().iter().map(|p| p.name.clone()).collect();
    assert_eq!(rendered, vec!["a"]);
    assert_eq!(form.value()["b"], json!("kept"));

    form.change("a", json!("x")).unwrap();
    let props = form.props("b").unwrap();
    assert!(!props.is_hidden);
    assert_eq!(props.value, Some(json!("kept")));
    form.settle().await.unwrap();
}

#[tokio::test]
async fn test_array_item_removal_reindexes() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {"items": {"type": "array", "items": {"type": "string"}}}
        }),
        json!({"items": ["a", "b", "c"]}),
    );
    form.change("items.1", json!("B")).unwrap();
    assert!(form.ui_state("items.1").unwrap().is_dirty);

    form.remove_item("items", 1).unwrap();
    assert_eq!(form.value(), json!({"items": ["a", "c"]}));
    let paths: Vec<String> = form
        .render()
        .iter()
        .map(|p| p.data_path.to_string())
        .collect();
    assert_eq!(paths, vec!["items", "items.0", "items.1"]);
    let second = form.props("items.1").unwrap();
    assert_eq!(second.value, Some(json!("c")));
    assert!(!second.is_dirty);
    assert!(form.ui_state("items.2").is_none());
    form.settle().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removed_item_cancels_pending_blur() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"tags": {"type": "array", "items": {"type": "string"}}}
    }));
    config.default_value = json!({"tags": ["a", "b"]});
    config.options.blur_debounce_ms = 50;
    let mut form = FormController::mount(config).unwrap();

    form.focus("tags.1").unwrap();
    form.blur("tags.1").unwrap();
    assert!(form.tree().has_pending_timers());

    form.remove_item("tags", 1).unwrap();
    assert!(!form.tree().has_pending_timers());

    tokio::time::sleep(Duration::from_millis(100)).await;
    form.settle().await.unwrap();
    assert_eq!(form.value(), json!({"tags": ["a"]}));
    assert!(form.ui_state("tags.1").is_none());
    let first = form.ui_state("tags.0").unwrap();
    assert!(!first.is_focused && !first.is_touched);
}

#[tokio::test]
async fn test_oversized_integer_keeps_previous_value() {
    let mut form = mount(
        json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
        json!({"n": 5}),
    );
    form.change("n", json!("100000000000000000000")).unwrap();
    form.settle().await.unwrap();
    assert_eq!(form.value(), json!({"n": 5}));
}

#[tokio::test]
async fn test_error_display_policy_and_formatting() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"name": {"type": "string", "title": "Name", "minLength": 3}},
        "required": ["name"]
    }));
    config.options.show_error = ShowError::IfDirty;
    config.formatters = Formatters {
        label: Arc::new(|label: &str, props: &FieldProps| {
            if props.is_required {
                format!("{label} *")
            } else {
                label.to_string()
            }
        }),
        error_message: Arc::new(|error: &ErrorEntry, props: &FieldProps| format!("{}: {}", props.label, error.keyword)),
        ..Formatters::default()
    };
    let mut form = FormController::mount(config).unwrap();
    let props = form.props("name").unwrap();
    assert_eq!(props.formatted_label, "Name *");

    form.change("name", json!("ab")).unwrap();
    form.settle().await.unwrap();
    let props = form.props("name").unwrap();
    assert!(props.show_error_message);
    assert_eq!(
        props.error.as_ref().and_then(|e| e.formatted_message.as_deref()),
        Some("Name: minLength")
    );
}

#[tokio::test]
async fn test_props_are_memoized_until_inputs_change() {
    let mut form = mount(
        json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        json!({}),
    );
    let first = form.props("name").unwrap();
    let again = form.props("name").unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    form.set_formatters(Formatters::default());
    let rebuilt = form.props("name").unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));
}

// ── Input plumbing ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_widget_pre_parse_runs_before_coercion() {
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {
            "period": {"type": "array", "format": "month-range", "items": {"type": "string"}}
        }
    }));
    config.form_types.register(
        FormType::new(SchemaType::Array, Arc::new(MonthRangeWidget::new())).with_format("month-range"),
    );
    let mut form = FormController::mount(config).unwrap();
    form.change("period", json!(["2024-03-15", "2024-05-01"])).unwrap();
    assert_eq!(form.value(), json!({"period": ["2024-03", "2024-05"]}));
    assert_eq!(form.props("period").unwrap().widget.as_deref(), Some("month-range"));
    form.settle().await.unwrap();
}

#[tokio::test]
async fn test_custom_value_parser() {
    let parser: ValueParser = Arc::new(|raw: RawInput, _previous: Option<&Value>, _schema: &SchemaNode| {
        raw.into_value()
            .and_then(|v| v.as_str().map(|s| Value::String(s.to_uppercase())))
    });
    let mut config = FormConfig::new(json!({
        "type": "object",
        "properties": {"code": {"type": "string"}}
    }));
    config.parse_value = Some(parser);
    let mut form = FormController::mount(config).unwrap();
    form.change("code", RawInput::Event { value: json!("abc") }).unwrap();
    assert_eq!(form.value(), json!({"code": "ABC"}));
    form.settle().await.unwrap();
}

#[tokio::test]
async fn test_push_item_uses_item_default() {
    let mut form = mount(
        json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string", "default": "new"}}
            }
        }),
        json!({}),
    );
    form.push_item("tags", RawInput::Absent).unwrap();
    form.push_item("tags", json!("two")).unwrap();
    assert_eq!(form.value(), json!({"tags": ["new", "two"]}));
    assert!(form.ui_state("tags").unwrap().is_dirty);
    form.settle().await.unwrap();
}

#[tokio::test]
async fn test_ambient_context() {
    let mut config = FormConfig::new(json!({"type": "object", "properties": {}}));
    config.context = json!({"locale": "nb"});
    let mut form = FormController::mount(config).unwrap();
    assert_eq!(form.context().get_context()["locale"], json!("nb"));
    form.set_context(json!({"locale": "en"}));
    assert_eq!(form.context().get_context()["locale"], json!("en"));
}
