/// Widget registry ("form types"): maps a schema type, optionally narrowed by
/// `format`, to the control that edits it. The engine only needs a widget's
/// name and its input pre-processing; everything visual lives outside.
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::coerce::RawInput;
use crate::schema::{SchemaNode, SchemaType};

pub trait Widget: Send + Sync {
    fn name(&self) -> &str;

    /// Runs on raw input before coercion. Identity by default.
    fn pre_parse(&self, raw: RawInput) -> RawInput {
        raw
    }
}

/// A widget with no input pre-processing.
#[derive(Debug, Clone)]
pub struct NamedWidget(pub String);

impl Widget for NamedWidget {
    fn name(&self) -> &str {
        &self.0
    }
}

/// Month range picker: accepts a pair of dates and keeps only `YYYY-MM`.
/// Anything that is not a two-element array becomes `[null, null]`; an
/// unparseable end becomes `null`.
pub struct MonthRangeWidget {
    month: Regex,
}

impl MonthRangeWidget {
    pub fn new() -> Self {
        Self {
            month: Regex::new(r"^(\d{4})-(\d{2})").unwrap(),
        }
    }

    fn month_of(&self, value: &Value) -> Value {
        value
            .as_str()
            .and_then(|s| self.month.captures(s))
            .and_then(|caps| {
                let month: u32 = caps[2].parse().ok()?;
                (1..=12)
                    .contains(&month)
                    .then(|| Value::String(format!("{}-{}", &caps[1], &caps[2])))
            })
            .unwrap_or(Value::Null)
    }
}

impl Default for MonthRangeWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl Widget for MonthRangeWidget {
    fn name(&self) -> &str {
        "month-range"
    }

    fn pre_parse(&self, raw: RawInput) -> RawInput {
        let pair = match raw.into_value() {
            Some(Value::Array(items)) if items.len() == 2 => {
                items.iter().map(|v| self.month_of(v)).collect()
            }
            _ => vec![Value::Null, Value::Null],
        };
        RawInput::Value(Value::Array(pair))
    }
}

#[derive(Clone)]
pub struct FormType {
    pub schema_type: SchemaType,
    pub format: Option<String>,
    pub widget: Arc<dyn Widget>,
}

impl FormType {
    pub fn new(schema_type: SchemaType, widget: Arc<dyn Widget>) -> Self {
        Self {
            schema_type,
            format: None,
            widget,
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }
}

impl fmt::Debug for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormType")
            .field("schema_type", &self.schema_type)
            .field("format", &self.format)
            .field("widget", &self.widget.name())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WidgetRegistry {
    form_types: Vec<FormType>,
}

impl WidgetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later registrations shadow earlier ones for the same key.
    pub fn register(&mut self, form_type: FormType) {
        self.form_types.push(form_type);
    }

    /// Exact `(type, format)` match first, then a format-less entry for the type.
    pub fn resolve(&self, schema: &SchemaNode) -> Option<&Arc<dyn Widget>> {
        let by_format = schema.format.as_deref().and_then(|format| {
            self.form_types
                .iter()
                .rev()
                .find(|ft| ft.schema_type == schema.schema_type && ft.format.as_deref() == Some(format))
        });
        by_format
            .or_else(|| {
                self.form_types
                    .iter()
                    .rev()
                    .find(|ft| ft.schema_type == schema.schema_type && ft.format.is_none())
            })
            .map(|ft| &ft.widget)
    }

    pub fn len(&self) -> usize {
        self.form_types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.form_types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> WidgetRegistry {
        let mut r = WidgetRegistry::new();
        r.register(FormType::new(
            SchemaType::String,
            Arc::new(NamedWidget("input".into())),
        ));
        r.register(
            FormType::new(SchemaType::Array, Arc::new(MonthRangeWidget::new()))
                .with_format("month-range"),
        );
        r
    }

    #[test]
    fn test_resolve_by_type() {
        let r = registry();
        let schema = SchemaNode::new(SchemaType::String);
        assert_eq!(r.resolve(&schema).map(|w| w.name()), Some("input"));
    }

    #[test]
    fn test_resolve_prefers_format() {
        let r = registry();
        let mut schema = SchemaNode::new(SchemaType::Array);
        schema.format = Some("month-range".into());
        assert_eq!(r.resolve(&schema).map(|w| w.name()), Some("month-range"));
    }

    #[test]
    fn test_unknown_format_falls_back_to_type() {
        let r = registry();
        let mut schema = SchemaNode::new(SchemaType::String);
        schema.format = Some("email".into());
        assert_eq!(r.resolve(&schema).map(|w| w.name()), Some("input"));
        assert!(r.resolve(&SchemaNode::new(SchemaType::Boolean)).is_none());
    }

    #[test]
    fn test_later_registration_shadows() {
        let mut r = registry();
        r.register(FormType::new(
            SchemaType::String,
            Arc::new(NamedWidget("textarea".into())),
        ));
        let schema = SchemaNode::new(SchemaType::String);
        assert_eq!(r.resolve(&schema).map(|w| w.name()), Some("textarea"));
    }

    #[test]
    fn test_month_range_pre_parse() {
        let w = MonthRangeWidget::new();
        let raw = RawInput::Value(json!(["2024-03-15", "2024-13-01"]));
        assert_eq!(w.pre_parse(raw), RawInput::Value(json!(["2024-03", null])));
        assert_eq!(
            w.pre_parse(RawInput::Value(json!("2024-03"))),
            RawInput::Value(json!([null, null]))
        );
    }
}
