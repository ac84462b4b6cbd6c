/// Validator: checks a root value against the normalized schema, then runs
/// the caller's custom validators. Produces a flat list of errors keyed by
/// data path; an empty list means the value is valid.
use crate::path::DataPath;
use crate::schema::SchemaNode;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub data_path: DataPath,
    pub keyword: String,
    pub message: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_message: Option<String>,
}

impl ErrorEntry {
    pub fn new(data_path: DataPath, keyword: &str, message: impl Into<String>, params: Value) -> Self {
        Self {
            data_path,
            keyword: keyword.to_string(),
            message: message.into(),
            params: match params {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            formatted_message: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("custom validator for '{path}' failed: {source}")]
    Custom { path: DataPath, source: BoxError },
    #[error("validation task did not complete: {0}")]
    Aborted(String),
}

/// A user-supplied check run against the value at one data path.
///
/// Returns the messages to report (empty when valid). Returning `Err` fails
/// the whole validation pass.
#[async_trait]
pub trait CustomValidator: Send + Sync {
    async fn validate(&self, value: Option<Value>) -> Result<Vec<String>, BoxError>;
}

#[async_trait]
impl<F, Fut> CustomValidator for F
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<String>, BoxError>> + Send + 'static,
{
    async fn validate(&self, value: Option<Value>) -> Result<Vec<String>, BoxError> {
        (self)(value).await
    }
}

/// Custom validators keyed by data path.
pub type CustomValidators = BTreeMap<String, Arc<dyn CustomValidator>>;

pub struct Validator {
    schema: Arc<SchemaNode>,
    custom: CustomValidators,
    patterns: HashMap<String, Regex>,
}

impl Validator {
    pub fn new(schema: Arc<SchemaNode>, custom: CustomValidators) -> Self {
        let mut patterns = HashMap::new();
        collect_patterns(&schema, &mut patterns);
        Self {
            schema,
            custom,
            patterns,
        }
    }

    pub fn schema(&self) -> &Arc<SchemaNode> {
        &self.schema
    }

    /// Validate `value`. Schema errors come first in traversal order, then
    /// custom validator messages in key order.
    pub async fn validate(&self, value: &Value) -> Result<Vec<ErrorEntry>, ValidationError> {
        let mut errors = Vec::new();
        self.check_node(&self.schema, Some(value), &DataPath::root(), &mut errors);

        for (key, validator) in &self.custom {
            let path = DataPath::parse(key);
            let field_value = path.lookup(value).cloned();
            let messages = validator
                .validate(field_value)
                .await
                .map_err(|source| ValidationError::Custom {
                    path: path.clone(),
                    source,
                })?;
            for message in messages {
                errors.push(ErrorEntry::new(path.clone(), "custom", message, json!({})));
            }
        }
        Ok(errors)
    }

    fn check_node(
        &self,
        schema: &SchemaNode,
        value: Option<&Value>,
        path: &DataPath,
        errors: &mut Vec<ErrorEntry>,
    ) {
        let Some(value) = value else {
            return;
        };

        if !schema.schema_type.accepts(value) {
            let ty = schema.schema_type.as_str();
            errors.push(ErrorEntry::new(
                path.clone(),
                "type",
                format!("should be {ty}"),
                json!({"type": ty}),
            ));
            return;
        }

        if let Some(allowed) = &schema.enum_values {
            if !allowed.contains(value) {
                errors.push(ErrorEntry::new(
                    path.clone(),
                    "enum",
                    "should be equal to one of the allowed values",
                    json!({"allowedValues": allowed}),
                ));
            }
        }

        match value {
            Value::String(s) => self.check_string(schema, s, path, errors),
            Value::Number(n) => check_number(schema, n.as_f64(), path, errors),
            Value::Array(items) => {
                check_items_len(schema, items.len() as u64, path, errors);
                if let Some(item_schema) = &schema.items {
                    for (i, item) in items.iter().enumerate() {
                        self.check_node(item_schema, Some(item), &path.index(i), errors);
                    }
                }
            }
            Value::Object(map) => {
                for (key, prop_schema) in &schema.properties {
                    let child_path = path.child(key);
                    match map.get(key) {
                        Some(child) => self.check_node(prop_schema, Some(child), &child_path, errors),
                        None if schema.is_required(key) => {
                            errors.push(required_error(child_path, key));
                        }
                        None => {}
                    }
                }
                // Required names with no declared property.
                for key in &schema.required {
                    if schema.property(key).is_none() && !map.contains_key(key) {
                        errors.push(required_error(path.child(key), key));
                    }
                }
            }
            _ => {}
        }
    }

    fn check_string(
        &self,
        schema: &SchemaNode,
        s: &str,
        path: &DataPath,
        errors: &mut Vec<ErrorEntry>,
    ) {
        let c = &schema.constraints;
        let len = s.chars().count() as u64;
        if let Some(min) = c.min_length {
            if len < min {
                errors.push(ErrorEntry::new(
                    path.clone(),
                    "minLength",
                    format!("should NOT be shorter than {min} characters"),
                    json!({"limit": min}),
                ));
            }
        }
        if let Some(max) = c.max_length {
            if len > max {
                errors.push(ErrorEntry::new(
                    path.clone(),
                    "maxLength",
                    format!("should NOT be longer than {max} characters"),
                    json!({"limit": max}),
                ));
            }
        }
        if let Some(pattern) = &c.pattern {
            let matched = self.patterns.get(pattern).map_or(true, |re| re.is_match(s));
            if !matched {
                errors.push(ErrorEntry::new(
                    path.clone(),
                    "pattern",
                    format!("should match pattern \"{pattern}\""),
                    json!({"pattern": pattern}),
                ));
            }
        }
    }
}

fn required_error(path: DataPath, key: &str) -> ErrorEntry {
    ErrorEntry::new(
        path,
        "required",
        format!("should have required property '{key}'"),
        json!({"missingProperty": key}),
    )
}

fn check_number(schema: &SchemaNode, n: Option<f64>, path: &DataPath, errors: &mut Vec<ErrorEntry>) {
    let Some(n) = n else {
        return;
    };
    let c = &schema.constraints;
    if let Some(min) = c.minimum {
        if n < min {
            errors.push(ErrorEntry::new(
                path.clone(),
                "minimum",
                format!("should be >= {min}"),
                json!({"comparison": ">=", "limit": min}),
            ));
        }
    }
    if let Some(max) = c.maximum {
        if n > max {
            errors.push(ErrorEntry::new(
                path.clone(),
                "maximum",
                format!("should be <= {max}"),
                json!({"comparison": "<=", "limit": max}),
            ));
        }
    }
}

fn check_items_len(schema: &SchemaNode, len: u64, path: &DataPath, errors: &mut Vec<ErrorEntry>) {
    let c = &schema.constraints;
    if let Some(min) = c.min_items {
        if len < min {
            errors.push(ErrorEntry::new(
                path.clone(),
                "minItems",
                format!("should NOT have fewer than {min} items"),
                json!({"limit": min}),
            ));
        }
    }
    if let Some(max) = c.max_items {
        if len > max {
            errors.push(ErrorEntry::new(
                path.clone(),
                "maxItems",
                format!("should NOT have more than {max} items"),
                json!({"limit": max}),
            ));
        }
    }
}

fn collect_patterns(schema: &SchemaNode, out: &mut HashMap<String, Regex>) {
    if let Some(pattern) = &schema.constraints.pattern {
        if !out.contains_key(pattern) {
            // The compiler already rejected invalid patterns.
            if let Ok(re) = Regex::new(pattern) {
                out.insert(pattern.clone(), re);
            }
        }
    }
    for (_, child) in &schema.properties {
        collect_patterns(child, out);
    }
    if let Some(items) = &schema.items {
        collect_patterns(items, out);
    }
}
