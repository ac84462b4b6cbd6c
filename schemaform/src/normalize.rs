/// Schema normalizer: merges externally supplied required-field names into
/// the `required` lists of the object nodes that own them.
use crate::schema::{SchemaNode, SchemaType};

/// Returns a new schema with every name in `required` merged in.
///
/// Dotted names (`address.city`) walk into nested object properties; the last
/// segment is recorded on the object node that declares it. A name that leaves
/// the declared tree is recorded on the deepest object reached, the same way an
/// undeclared name in a plain `required` list would be. Merging never
/// duplicates entries, so normalizing twice is the same as normalizing once.
pub fn normalize(schema: &SchemaNode, required: &[String]) -> SchemaNode {
    let mut out = schema.clone();
    for name in required {
        let segments: Vec<&str> = name.split('.').filter(|s| !s.is_empty()).collect();
        if !segments.is_empty() {
            merge_required(&mut out, &segments);
        }
    }
    out
}

fn merge_required(node: &mut SchemaNode, segments: &[&str]) {
    let (head, rest) = match segments.split_first() {
        Some(split) => split,
        None => return,
    };

    if !rest.is_empty() {
        if let Some(child) = node.property_mut(head) {
            if child.schema_type == SchemaType::Object {
                merge_required(child, rest);
                return;
            }
        }
    }

    if node.schema_type == SchemaType::Object && !node.is_required(head) {
        node.required.push(head.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use serde_json::json;

    fn person() -> SchemaNode {
        compile(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
                "address": {
                    "type": "object",
                    "properties": {"city": {"type": "string"}}
                }
            },
            "required": ["name"]
        }))
        .unwrap()
    }

    #[test]
    fn test_merges_top_level_names() {
        let out = normalize(&person(), &["age".into()]);
        assert_eq!(out.required, vec!["name".to_string(), "age".to_string()]);
    }

    #[test]
    fn test_merges_dotted_names_into_nested_object() {
        let out = normalize(&person(), &["address.city".into()]);
        assert_eq!(
            out.property("address").unwrap().required,
            vec!["city".to_string()]
        );
        assert_eq!(out.required, vec!["name".to_string()]);
    }

    #[test]
    fn test_is_idempotent() {
        let names = vec!["age".to_string(), "name".to_string(), "address.city".to_string()];
        let once = normalize(&person(), &names);
        let twice = normalize(&once, &names);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_does_not_mutate_input() {
        let schema = person();
        let before = schema.clone();
        let _ = normalize(&schema, &["age".into()]);
        assert_eq!(schema, before);
    }

    #[test]
    fn test_unknown_names_are_recorded() {
        let out = normalize(&person(), &["nickname".into()]);
        assert!(out.is_required("nickname"));
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let out = normalize(&person(), &["".into()]);
        assert_eq!(out, person());
    }
}
