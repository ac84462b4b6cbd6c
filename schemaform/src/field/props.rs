/// Render-ready props for one field: everything a widget needs, derived from
/// the node's state and the shared context.
use serde::Serialize;
use serde_json::{Map, Value};

use super::{FieldNode, UiState};
use crate::context::{enum_text, Choice, FormContext, Size};
use crate::path::DataPath;
use crate::schema::SchemaType;
use crate::validate::ErrorEntry;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumOption {
    pub value: Value,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldProps {
    pub name: String,
    pub data_path: DataPath,
    pub label: String,
    pub formatted_label: String,
    pub description: Option<String>,
    pub value: Option<Value>,
    pub default_value: Option<Value>,
    pub schema_type: &'static str,
    pub is_required: bool,
    pub is_primitive: bool,
    pub read_only: bool,
    pub is_dirty: bool,
    pub is_focused: bool,
    pub is_touched: bool,
    pub errors: Vec<ErrorEntry>,
    /// The first error, carrying its formatted message.
    pub error: Option<ErrorEntry>,
    pub show_error_message: bool,
    pub is_hidden: bool,
    pub size: &'static str,
    /// Enum options in declaration order.
    pub enum_options: Vec<EnumOption>,
    pub widget: Option<String>,
    pub ui: Map<String, Value>,
}

impl FieldProps {
    pub fn ui_state(&self) -> UiState {
        UiState {
            is_dirty: self.is_dirty,
            is_focused: self.is_focused,
            is_touched: self.is_touched,
        }
    }

    /// What a widget should display when the field has no value: the initial
    /// value if any, else the first enum option. The field value itself is
    /// left unset until the user picks something.
    pub fn default_candidate(&self) -> Option<&Value> {
        self.value
            .as_ref()
            .or(self.default_value.as_ref())
            .or_else(|| self.enum_options.first().map(|option| &option.value))
    }

    pub(super) fn build(node: &FieldNode, ctx: &FormContext) -> Self {
        let schema = node.schema();
        let ui = node.ui_state();
        let label = schema
            .title
            .clone()
            .unwrap_or_else(|| node.key().to_string());
        let size = schema
            .ui
            .get("size")
            .and_then(Value::as_str)
            .map_or(ctx.size, |s| Size::preferred(Some(s)));
        let read_only = schema.read_only
            || schema
                .ui
                .get("readOnly")
                .and_then(Value::as_bool)
                .unwrap_or(false);

        let mut props = FieldProps {
            name: node.key().to_string(),
            data_path: node.data_path().clone(),
            formatted_label: label.clone(),
            label,
            description: schema.description.clone(),
            value: node.value().cloned(),
            default_value: node.default_value().cloned(),
            schema_type: schema.schema_type.as_str(),
            is_required: node.is_required(),
            is_primitive: schema.schema_type.is_primitive() && schema.schema_type != SchemaType::Null,
            read_only,
            is_dirty: ui.is_dirty,
            is_focused: ui.is_focused,
            is_touched: ui.is_touched,
            errors: node.errors().to_vec(),
            error: None,
            show_error_message: !node.errors().is_empty() && ctx.show_error.allows(&ui),
            is_hidden: !node.is_visible(),
            size: size.as_str(),
            enum_options: Vec::new(),
            widget: ctx.registry.resolve(schema).map(|w| w.name().to_string()),
            ui: schema.ui.clone(),
        };

        props.formatted_label = (ctx.formatters.label)(&props.label, &props);

        let formatted: Vec<ErrorEntry> = props
            .errors
            .iter()
            .map(|error| {
                let mut error = error.clone();
                error.formatted_message = Some((ctx.formatters.error_message)(&error, &props));
                error
            })
            .collect();
        props.error = formatted.first().cloned();
        props.errors = formatted;

        if let Some(values) = &schema.enum_values {
            let aliases = schema.options.get("alias").and_then(Value::as_object);
            props.enum_options = values
                .iter()
                .map(|value| {
                    let alias = aliases
                        .and_then(|a| a.get(&enum_text(value)))
                        .and_then(Value::as_str);
                    EnumOption {
                        value: value.clone(),
                        label: match alias {
                            Some(alias) => alias.to_string(),
                            None => (ctx.formatters.enum_label)(value, &props),
                        },
                    }
                })
                .collect();
        }

        props
    }
}
