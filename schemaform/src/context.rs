/// Shared form context: read-mostly configuration handed down the field tree
/// by reference. Only the controller builds or replaces it.
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::FormError;
use crate::field::{FieldProps, ShowError};
use crate::path::FlatSnapshot;
use crate::schema::SchemaNode;
use crate::validate::ErrorEntry;
use crate::widget::WidgetRegistry;

/// A closed set of presentation choices. Unrecognized input falls back to
/// the first element of `ALL`.
pub trait Choice: Sized + Copy + PartialEq + 'static {
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;

    fn preferred(raw: Option<&str>) -> Self {
        raw.and_then(|r| Self::ALL.iter().copied().find(|c| c.as_str() == r))
            .unwrap_or(Self::ALL[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Vertical,
    Horizontal,
}

impl Choice for Layout {
    const ALL: &'static [Self] = &[Layout::Vertical, Layout::Horizontal];

    fn as_str(&self) -> &'static str {
        match self {
            Layout::Vertical => "vertical",
            Layout::Horizontal => "horizontal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelAlign {
    Right,
    Center,
    Left,
}

impl Choice for LabelAlign {
    const ALL: &'static [Self] = &[LabelAlign::Right, LabelAlign::Center, LabelAlign::Left];

    fn as_str(&self) -> &'static str {
        match self {
            LabelAlign::Right => "right",
            LabelAlign::Center => "center",
            LabelAlign::Left => "left",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Default,
    Small,
    Large,
}

impl Choice for Size {
    const ALL: &'static [Self] = &[Size::Default, Size::Small, Size::Large];

    fn as_str(&self) -> &'static str {
        match self {
            Size::Default => "default",
            Size::Small => "small",
            Size::Large => "large",
        }
    }
}

/// Form-wide options, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormOptions {
    pub layout: Option<String>,
    pub label_align: Option<String>,
    pub size: Option<String>,
    pub show_error: ShowError,
    /// Delay before a blur is committed, absorbing focus moving between the
    /// sub-controls of one widget. Zero means "next turn of the event loop".
    pub blur_debounce_ms: u64,
    /// Extra required field names, dotted for nested fields.
    pub required: Vec<String>,
}

impl FormOptions {
    pub fn from_value(value: Value) -> Result<Self, FormError> {
        Ok(serde_json::from_value(value)?)
    }
}

pub type LabelFormatter = Arc<dyn Fn(&str, &FieldProps) -> String + Send + Sync>;
pub type ErrorMessageFormatter = Arc<dyn Fn(&ErrorEntry, &FieldProps) -> String + Send + Sync>;
pub type EnumFormatter = Arc<dyn Fn(&Value, &FieldProps) -> String + Send + Sync>;

/// User-overridable text formatting. The defaults pass text through.
#[derive(Clone)]
pub struct Formatters {
    pub label: LabelFormatter,
    pub error_message: ErrorMessageFormatter,
    pub enum_label: EnumFormatter,
}

impl Default for Formatters {
    fn default() -> Self {
        Self {
            label: Arc::new(|label: &str, _: &FieldProps| label.to_string()),
            error_message: Arc::new(|error: &ErrorEntry, _: &FieldProps| error.message.clone()),
            enum_label: Arc::new(|value: &Value, _: &FieldProps| enum_text(value)),
        }
    }
}

impl fmt::Debug for Formatters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formatters").finish_non_exhaustive()
    }
}

/// Raw text of an enum value: strings unquoted, everything else as JSON.
pub fn enum_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct FormContext {
    pub registry: Arc<WidgetRegistry>,
    pub schema: Arc<SchemaNode>,
    pub layout: Layout,
    pub label_align: LabelAlign,
    pub size: Size,
    pub show_error: ShowError,
    pub formatters: Formatters,
    /// Bumped whenever `formatters` is replaced; part of every props memo key.
    pub formatters_revision: u64,
    pub flattened: Arc<FlatSnapshot>,
    ambient: Arc<Value>,
}

impl FormContext {
    pub fn new(
        registry: Arc<WidgetRegistry>,
        schema: Arc<SchemaNode>,
        options: &FormOptions,
        formatters: Formatters,
        ambient: Value,
    ) -> Self {
        Self {
            registry,
            schema,
            layout: Layout::preferred(options.layout.as_deref()),
            label_align: LabelAlign::preferred(options.label_align.as_deref()),
            size: Size::preferred(options.size.as_deref()),
            show_error: options.show_error,
            formatters,
            formatters_revision: 0,
            flattened: Arc::new(FlatSnapshot::default()),
            ambient: Arc::new(ambient),
        }
    }

    /// Caller-supplied ambient data; `{}` when none was given.
    pub fn get_context(&self) -> &Value {
        &self.ambient
    }

    pub fn set_ambient(&mut self, ambient: Value) {
        self.ambient = Arc::new(ambient);
    }

    pub fn set_formatters(&mut self, formatters: Formatters) {
        self.formatters = formatters;
        self.formatters_revision += 1;
    }
}
