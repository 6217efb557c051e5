use crate::FederatedTypeRef;
use serde_json::Value;
use std::collections::BTreeMap;

/// A schema definition that refers to itself through aliases bottoms out
/// as a string after this many hops.
const MAX_REF_DEPTH: usize = 8;

/// Primitive OpenAPI types the mapper recognizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Integer,
    Number,
    Boolean,
}

/// One OpenAPI/Swagger schema node, resolved once at generation time.
/// Downstream code never inspects raw JSON again.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaNode {
    /// `$ref` to a reusable definition, stored as the bare definition name.
    Reference(String),
    /// A schema with an `enum` constraint; values kept as written.
    Enumeration(Vec<String>),
    /// An object with declared properties, in lexicographic order.
    Object(Vec<(String, SchemaNode)>),
    Array(Box<SchemaNode>),
    Primitive(PrimitiveKind),
    /// Anything the mapper does not recognize.
    Unknown,
}

impl SchemaNode {
    /// Parses a raw schema value. Total: malformed input becomes `Unknown`,
    /// never an error.
    pub fn parse(value: &Value) -> SchemaNode {
        let Some(obj) = value.as_object() else {
            return SchemaNode::Unknown;
        };
        if let Some(target) = obj.get("$ref").and_then(Value::as_str) {
            return SchemaNode::Reference(ref_name(target));
        }
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            let members = values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            return SchemaNode::Enumeration(members);
        }
        match obj.get("type").and_then(Value::as_str) {
            Some("string") => SchemaNode::Primitive(PrimitiveKind::String),
            Some("integer") => SchemaNode::Primitive(PrimitiveKind::Integer),
            Some("number") => SchemaNode::Primitive(PrimitiveKind::Number),
            Some("boolean") => SchemaNode::Primitive(PrimitiveKind::Boolean),
            Some("array") => {
                let items = obj
                    .get("items")
                    .map(SchemaNode::parse)
                    .unwrap_or(SchemaNode::Unknown);
                SchemaNode::Array(Box::new(items))
            }
            Some("object") | None => match obj.get("properties").and_then(Value::as_object) {
                Some(props) => {
                    let sorted: BTreeMap<_, _> = props.iter().collect();
                    SchemaNode::Object(
                        sorted
                            .into_iter()
                            .map(|(name, schema)| (name.clone(), SchemaNode::parse(schema)))
                            .collect(),
                    )
                }
                None if obj.contains_key("type") => SchemaNode::Object(Vec::new()),
                None => SchemaNode::Unknown,
            },
            Some(_) => SchemaNode::Unknown,
        }
    }
}

/// Resolves `$ref` targets against one service's reusable definitions,
/// applying the service prefix to names that survive as federated types.
pub struct RefResolver<'a> {
    definitions: &'a BTreeMap<String, SchemaNode>,
    prefix: &'a str,
}

impl<'a> RefResolver<'a> {
    pub fn new(definitions: &'a BTreeMap<String, SchemaNode>, prefix: &'a str) -> Self {
        RefResolver { definitions, prefix }
    }

    fn resolve(&self, name: &str, depth: usize) -> FederatedTypeRef {
        if depth > MAX_REF_DEPTH {
            return FederatedTypeRef::string();
        }
        match self.definitions.get(name) {
            // Definitions that emit a federated type keep their name.
            Some(SchemaNode::Object(_)) | Some(SchemaNode::Enumeration(_)) | None => {
                FederatedTypeRef::Named(format!("{}{}", self.prefix, normalize_type_name(name)))
            }
            // Aliases (a named primitive or array) map through to the target.
            Some(node) => map_node(node, self, depth + 1),
        }
    }
}

/// Maps one schema node to a federated type reference. Deterministic and
/// total: unrecognized input maps to the string type, never an error.
pub fn map_type(node: &SchemaNode, resolver: &RefResolver<'_>) -> FederatedTypeRef {
    map_node(node, resolver, 0)
}

fn map_node(node: &SchemaNode, resolver: &RefResolver<'_>, depth: usize) -> FederatedTypeRef {
    match node {
        SchemaNode::Reference(name) => resolver.resolve(name, depth),
        SchemaNode::Primitive(PrimitiveKind::String) => FederatedTypeRef::string(),
        SchemaNode::Primitive(PrimitiveKind::Integer) => FederatedTypeRef::int(),
        SchemaNode::Primitive(PrimitiveKind::Number) => FederatedTypeRef::float(),
        SchemaNode::Primitive(PrimitiveKind::Boolean) => FederatedTypeRef::boolean(),
        SchemaNode::Array(items) => {
            FederatedTypeRef::list_of(map_node(items, resolver, depth + 1))
        }
        // Anonymous inline objects stay opaque, no type synthesis.
        SchemaNode::Object(_) => FederatedTypeRef::json(),
        // Inline enums without a reusable name flatten to string.
        SchemaNode::Enumeration(_) => FederatedTypeRef::string(),
        SchemaNode::Unknown => FederatedTypeRef::string(),
    }
}

/// Last segment of a `$ref` target: `#/components/schemas/Order` -> `Order`.
pub fn ref_name(target: &str) -> String {
    target.rsplit('/').next().unwrap_or(target).to_string()
}

/// Normalizes a definition name to the federated convention: capitalized
/// words, no separators. Internal capitals are preserved so `orderItem`
/// and `order_item` both become `OrderItem`-shaped names.
pub fn normalize_type_name(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|seg| !seg.is_empty())
        .map(capitalize_first)
        .collect()
}

/// Deterministic per-service prefix: case-normalized service name with
/// non-alphanumeric characters stripped. `order-api` -> `OrderApi`.
pub fn service_prefix(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|seg| !seg.is_empty())
        .map(|seg| capitalize_first(&seg.to_ascii_lowercase()))
        .collect()
}

/// Pascal-cases the literal segments of a path template, skipping
/// `{param}` segments: `/orders/{id}/items` -> `OrdersItems`.
pub fn pascal_path_segments(path: &str) -> String {
    path.split('/')
        .filter(|seg| !seg.is_empty() && !seg.starts_with('{'))
        .map(normalize_type_name)
        .collect()
}

/// Enumeration member name: upper-cased, non-alphanumerics replaced by
/// underscore. `in-progress` -> `IN_PROGRESS`.
pub fn enum_member_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn capitalize_first(seg: &str) -> String {
    let mut chars = seg.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn empty_defs() -> BTreeMap<String, SchemaNode> {
        BTreeMap::new()
    }

    #[test]
    fn primitives_map_to_builtin_scalars() {
        let defs = empty_defs();
        let resolver = RefResolver::new(&defs, "OrderApi");
        let cases = [
            (json!({"type": "string"}), "String"),
            (json!({"type": "string", "format": "date-time"}), "String"),
            (json!({"type": "integer", "format": "int64"}), "Int"),
            (json!({"type": "number"}), "Float"),
            (json!({"type": "number", "format": "float"}), "Float"),
            (json!({"type": "boolean"}), "Boolean"),
        ];
        for (schema, expected) in cases {
            let node = SchemaNode::parse(&schema);
            assert_eq!(map_type(&node, &resolver).render(), expected);
        }
    }

    #[test]
    fn refs_resolve_to_prefixed_type_names() {
        let mut defs = empty_defs();
        defs.insert(
            "Order".to_string(),
            SchemaNode::parse(&json!({"type": "object", "properties": {"id": {"type": "string"}}})),
        );
        let resolver = RefResolver::new(&defs, "OrderApi");
        let node = SchemaNode::parse(&json!({"$ref": "#/components/schemas/Order"}));
        assert_eq!(map_type(&node, &resolver).render(), "OrderApiOrder");
    }

    #[test]
    fn ref_to_primitive_alias_maps_through() {
        let mut defs = empty_defs();
        defs.insert(
            "Id".to_string(),
            SchemaNode::Primitive(PrimitiveKind::Integer),
        );
        let resolver = RefResolver::new(&defs, "OrderApi");
        let node = SchemaNode::Reference("Id".to_string());
        assert_eq!(map_type(&node, &resolver).render(), "Int");
    }

    #[test]
    fn arrays_map_to_lists() {
        let defs = empty_defs();
        let resolver = RefResolver::new(&defs, "OrderApi");
        let node = SchemaNode::parse(&json!({
            "type": "array",
            "items": {"type": "array", "items": {"type": "integer"}}
        }));
        assert_eq!(map_type(&node, &resolver).render(), "[[Int]]");
    }

    #[test]
    fn inline_objects_stay_opaque() {
        let defs = empty_defs();
        let resolver = RefResolver::new(&defs, "OrderApi");
        let node = SchemaNode::parse(&json!({
            "type": "object",
            "properties": {"nested": {"type": "string"}}
        }));
        assert_eq!(map_type(&node, &resolver).render(), "JSON");
    }

    #[test]
    fn unrecognized_input_falls_back_to_string() {
        let defs = empty_defs();
        let resolver = RefResolver::new(&defs, "OrderApi");
        for schema in [json!(42), json!({"type": "file"}), json!(null)] {
            let node = SchemaNode::parse(&schema);
            assert_eq!(map_type(&node, &resolver).render(), "String");
        }
    }

    #[test]
    fn naming_helpers() {
        assert_eq!(service_prefix("order-api"), "OrderApi");
        assert_eq!(service_prefix("USER_service.v2"), "UserServiceV2");
        assert_eq!(normalize_type_name("order_item"), "OrderItem");
        assert_eq!(normalize_type_name("orderItem"), "OrderItem");
        assert_eq!(pascal_path_segments("/orders/{id}/items"), "OrdersItems");
        assert_eq!(pascal_path_segments("/orders/{id}"), "Orders");
        assert_eq!(enum_member_name("in-progress"), "IN_PROGRESS");
        assert_eq!(enum_member_name("shipped"), "SHIPPED");
    }
}
