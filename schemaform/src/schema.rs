/// Schema node types: the typed, compiled form of one field description.
/// These are immutable once compiled and shared between field nodes via `Arc`.
use serde_json::{Map, Value};

/// The field type keywords a schema node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl SchemaType {
    pub fn parse(s: &str) -> Option<SchemaType> {
        match s {
            "string" => Some(SchemaType::String),
            "number" => Some(SchemaType::Number),
            "integer" => Some(SchemaType::Integer),
            "boolean" => Some(SchemaType::Boolean),
            "array" => Some(SchemaType::Array),
            "object" => Some(SchemaType::Object),
            "null" => Some(SchemaType::Null),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
            SchemaType::Null => "null",
        }
    }

    /// Primitive types render as a single control; containers render children.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            SchemaType::String | SchemaType::Number | SchemaType::Integer | SchemaType::Boolean
        )
    }

    /// True when `value` is an instance of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
            SchemaType::Null => value.is_null(),
        }
    }
}

/// Value constraints checked by the validator on top of the type keyword.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
}

/// How a node decides whether it is rendered.
#[derive(Debug, Clone, PartialEq)]
pub enum ShowSpec {
    /// `"show": true | false`
    Flag(bool),
    /// `"show": "$.a === 'x'"`
    Expr(String),
}

/// One field description. Nodes form a tree; `$ref` indirection is expanded
/// at compile time so there are no cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub schema_type: SchemaType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<Value>>,
    /// Declared properties in declaration order (object nodes only).
    pub properties: Vec<(String, SchemaNode)>,
    /// Names of required properties (object nodes only).
    pub required: Vec<String>,
    pub items: Option<Box<SchemaNode>>,
    pub read_only: bool,
    pub format: Option<String>,
    pub constraints: Constraints,
    pub show: Option<ShowSpec>,
    /// Presentation hints for the renderer (`size`, `label`, `grid`, ...).
    pub ui: Map<String, Value>,
    /// Widget options, e.g. `alias` for enum labels.
    pub options: Map<String, Value>,
    /// Unknown keys, passed through untouched.
    pub extra: Map<String, Value>,
}

impl SchemaNode {
    /// A bare node of the given type with nothing else set.
    pub fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            title: None,
            description: None,
            default: None,
            enum_values: None,
            properties: Vec::new(),
            required: Vec::new(),
            items: None,
            read_only: false,
            format: None,
            constraints: Constraints::default(),
            show: None,
            ui: Map::new(),
            options: Map::new(),
            extra: Map::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<&SchemaNode> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, node)| node)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut SchemaNode> {
        self.properties
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, node)| node)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Serialize back to the JSON shape accepted by `compiler::compile`.
    pub fn to_json(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("type".into(), Value::String(self.schema_type.as_str().into()));
        if let Some(title) = &self.title {
            obj.insert("title".into(), Value::String(title.clone()));
        }
        if let Some(desc) = &self.description {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        if let Some(default) = &self.default {
            obj.insert("default".into(), default.clone());
        }
        if let Some(values) = &self.enum_values {
            obj.insert("enum".into(), Value::Array(values.clone()));
        }
        if !self.properties.is_empty() {
            let props: Map<String, Value> = self
                .properties
                .iter()
                .map(|(key, node)| (key.clone(), node.to_json()))
                .collect();
            obj.insert("properties".into(), Value::Object(props));
        }
        if !self.required.is_empty() {
            let names = self.required.iter().cloned().map(Value::String).collect();
            obj.insert("required".into(), Value::Array(names));
        }
        if let Some(items) = &self.items {
            obj.insert("items".into(), items.to_json());
        }
        if self.read_only {
            obj.insert("readOnly".into(), Value::Bool(true));
        }
        if let Some(format) = &self.format {
            obj.insert("format".into(), Value::String(format.clone()));
        }
        let c = &self.constraints;
        let numeric = [
            ("minLength", c.min_length),
            ("maxLength", c.max_length),
            ("minItems", c.min_items),
            ("maxItems", c.max_items),
        ];
        for (key, limit) in numeric {
            if let Some(limit) = limit {
                obj.insert(key.into(), Value::from(limit));
            }
        }
        if let Some(min) = c.minimum {
            obj.insert("minimum".into(), Value::from(min));
        }
        if let Some(max) = c.maximum {
            obj.insert("maximum".into(), Value::from(max));
        }
        if let Some(pattern) = &c.pattern {
            obj.insert("pattern".into(), Value::String(pattern.clone()));
        }
        match &self.show {
            Some(ShowSpec::Flag(flag)) => {
                obj.insert("show".into(), Value::Bool(*flag));
            }
            Some(ShowSpec::Expr(src)) => {
                obj.insert("show".into(), Value::String(src.clone()));
            }
            None => {}
        }
        if !self.ui.is_empty() {
            obj.insert("ui".into(), Value::Object(self.ui.clone()));
        }
        if !self.options.is_empty() {
            obj.insert("options".into(), Value::Object(self.options.clone()));
        }
        Value::Object(obj)
    }
}
