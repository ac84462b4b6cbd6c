/// Schema compiler: parses a raw JSON schema into the typed `SchemaNode` tree.
/// Malformed schemas are rejected here, before any field node is mounted.
use crate::schema::{Constraints, SchemaNode, SchemaType, ShowSpec};
use serde_json::{Map, Value};
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("schema must be a JSON object")]
    NotAnObject,
    #[error("schema at '{0}' has no 'type'")]
    MissingType(String),
    #[error("type must be a string")]
    TypeNotString,
    #[error("unknown type keyword: '{0}'")]
    UnknownType(String),
    #[error("$ref must be a string")]
    RefNotString,
    #[error("$ref '{0}' not found in definitions")]
    RefNotFound(String),
    #[error("$ref '{0}' is recursive")]
    RecursiveRef(String),
    #[error("enum must be a non-empty array")]
    InvalidEnum,
    #[error("enum contains duplicate values")]
    EnumDuplicates,
    #[error("properties must be a JSON object")]
    PropertiesNotObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
    #[error("invalid value for '{0}'")]
    InvalidKeyword(String),
    #[error("show must be a boolean or an expression string")]
    InvalidShow,
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Keys consumed by the compiler; everything else lands in `SchemaNode::extra`.
const KNOWN_KEYS: &[&str] = &[
    "type",
    "title",
    "description",
    "default",
    "enum",
    "properties",
    "required",
    "items",
    "readOnly",
    "format",
    "minLength",
    "maxLength",
    "minimum",
    "maximum",
    "pattern",
    "minItems",
    "maxItems",
    "show",
    "ui",
    "options",
    "$ref",
    "definitions",
    "$defs",
];

/// Compile a schema from a JSON value.
pub fn compile(schema: &Value) -> Result<SchemaNode, CompileError> {
    let obj = schema.as_object().ok_or(CompileError::NotAnObject)?;
    let mut compiler = Compiler {
        definitions: obj.get("definitions").and_then(Value::as_object),
        defs: obj.get("$defs").and_then(Value::as_object),
        stack: Vec::new(),
    };
    compiler.node(schema, "")
}

struct Compiler<'a> {
    definitions: Option<&'a Map<String, Value>>,
    defs: Option<&'a Map<String, Value>>,
    /// Refs currently being expanded, for cycle detection.
    stack: Vec<String>,
}

impl<'a> Compiler<'a> {
    fn node(&mut self, json: &'a Value, at: &str) -> Result<SchemaNode, CompileError> {
        let obj = json.as_object().ok_or(CompileError::NotAnObject)?;

        if let Some(reference) = obj.get("$ref") {
            return self.reference(obj, reference, at);
        }

        let schema_type = match obj.get("type") {
            None => return Err(CompileError::MissingType(at.to_string())),
            Some(Value::String(s)) => {
                SchemaType::parse(s).ok_or_else(|| CompileError::UnknownType(s.clone()))?
            }
            Some(_) => return Err(CompileError::TypeNotString),
        };

        let mut node = SchemaNode::new(schema_type);
        node.title = string_keyword(obj, "title")?;
        node.description = string_keyword(obj, "description")?;
        node.format = string_keyword(obj, "format")?;
        node.default = obj.get("default").cloned();
        node.enum_values = compile_enum(obj)?;
        node.read_only = match obj.get("readOnly") {
            None => false,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| CompileError::InvalidKeyword("readOnly".into()))?,
        };
        node.constraints = compile_constraints(obj)?;
        node.ui = map_keyword(obj, "ui")?;
        node.options = map_keyword(obj, "options")?;
        node.show = compile_show(obj.get("show").or_else(|| node.ui.get("show")))?;

        if let Some(props) = obj.get("properties") {
            let props = props.as_object().ok_or(CompileError::PropertiesNotObject)?;
            for (key, child) in props {
                let child_at = join(at, key);
                let compiled = self.node(child, &child_at)?;
                node.properties.push((key.clone(), compiled));
            }
        }

        if let Some(required) = obj.get("required") {
            let arr = required.as_array().ok_or(CompileError::InvalidRequired)?;
            for name in arr {
                let name = name.as_str().ok_or(CompileError::InvalidRequired)?;
                if !node.is_required(name) {
                    node.required.push(name.to_string());
                }
            }
        }

        if let Some(items) = obj.get("items") {
            let item_at = join(at, "items");
            node.items = Some(Box::new(self.node(items, &item_at)?));
        }

        node.extra = obj
            .iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(node)
    }

    fn reference(
        &mut self,
        obj: &'a Map<String, Value>,
        reference: &'a Value,
        at: &str,
    ) -> Result<SchemaNode, CompileError> {
        let reference = reference.as_str().ok_or(CompileError::RefNotString)?;
        let target = self
            .lookup(reference)
            .ok_or_else(|| CompileError::RefNotFound(reference.to_string()))?;
        if self.stack.iter().any(|r| r == reference) {
            return Err(CompileError::RecursiveRef(reference.to_string()));
        }

        self.stack.push(reference.to_string());
        let resolved = self.node(target, at);
        self.stack.pop();
        let mut node = resolved?;

        // Sibling annotations override the referenced node.
        if let Some(title) = string_keyword(obj, "title")? {
            node.title = Some(title);
        }
        if let Some(desc) = string_keyword(obj, "description")? {
            node.description = Some(desc);
        }
        if let Some(default) = obj.get("default") {
            node.default = Some(default.clone());
        }
        Ok(node)
    }

    fn lookup(&self, reference: &str) -> Option<&'a Value> {
        if let Some(name) = reference.strip_prefix("#/definitions/") {
            return self.definitions.and_then(|defs| defs.get(name));
        }
        if let Some(name) = reference.strip_prefix("#/$defs/") {
            return self.defs.and_then(|defs| defs.get(name));
        }
        None
    }
}

fn join(at: &str, key: &str) -> String {
    if at.is_empty() {
        key.to_string()
    } else {
        format!("{at}.{key}")
    }
}

fn string_keyword(obj: &Map<String, Value>, key: &str) -> Result<Option<String>, CompileError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CompileError::InvalidKeyword(key.into())),
    }
}

fn map_keyword(obj: &Map<String, Value>, key: &str) -> Result<Map<String, Value>, CompileError> {
    match obj.get(key) {
        None => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(CompileError::InvalidKeyword(key.into())),
    }
}

fn compile_enum(obj: &Map<String, Value>) -> Result<Option<Vec<Value>>, CompileError> {
    let Some(raw) = obj.get("enum") else {
        return Ok(None);
    };
    let arr = raw.as_array().ok_or(CompileError::InvalidEnum)?;
    if arr.is_empty() {
        return Err(CompileError::InvalidEnum);
    }
    let mut seen = HashSet::new();
    for value in arr {
        if !seen.insert(value.to_string()) {
            return Err(CompileError::EnumDuplicates);
        }
    }
    Ok(Some(arr.clone()))
}

fn compile_show(raw: Option<&Value>) -> Result<Option<ShowSpec>, CompileError> {
    match raw {
        None => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(ShowSpec::Flag(*flag))),
        Some(Value::String(src)) => Ok(Some(ShowSpec::Expr(src.clone()))),
        Some(_) => Err(CompileError::InvalidShow),
    }
}

fn compile_constraints(obj: &Map<String, Value>) -> Result<Constraints, CompileError> {
    let count = |key: &str| -> Result<Option<u64>, CompileError> {
        match obj.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| CompileError::InvalidKeyword(key.into())),
        }
    };
    let bound = |key: &str| -> Result<Option<f64>, CompileError> {
        match obj.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| CompileError::InvalidKeyword(key.into())),
        }
    };

    let pattern = string_keyword(obj, "pattern")?;
    if let Some(p) = &pattern {
        regex::Regex::new(p).map_err(|e| CompileError::InvalidPattern {
            pattern: p.clone(),
            message: e.to_string(),
        })?;
    }

    Ok(Constraints {
        min_length: count("minLength")?,
        max_length: count("maxLength")?,
        minimum: bound("minimum")?,
        maximum: bound("maximum")?,
        pattern,
        min_items: count("minItems")?,
        max_items: count("maxItems")?,
    })
}
