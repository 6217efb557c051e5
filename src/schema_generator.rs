use crate::error::MeshError;
use crate::type_mapper::{
    RefResolver, SchemaNode, enum_member_name, map_type, normalize_type_name,
    pascal_path_segments, service_prefix,
};
use crate::{
    ArgumentDef, FederatedTypeRef, FieldDef, FieldMapping, FieldSignature, HttpMethod,
    ParameterLocation, RequestParameter, ServiceDescriptor, TypeDef,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// A non-fatal problem found while generating one service's schema. The
/// offending node is skipped and generation continues.
#[derive(Debug, Clone, thiserror::Error)]
#[error("service '{service}' {context}: {reason}")]
pub struct GenerationError {
    pub service: String,
    pub context: String,
    pub reason: String,
}

/// Everything generated from one service's OpenAPI document.
#[derive(Debug, Default)]
pub struct GeneratedSchema {
    pub type_defs: Vec<TypeDef>,
    pub query_fields: Vec<FieldSignature>,
    pub mutation_fields: Vec<FieldSignature>,
    pub mappings: Vec<FieldMapping>,
    pub errors: Vec<GenerationError>,
}

const METHODS: [(&str, HttpMethod, &str); 5] = [
    ("get", HttpMethod::Get, "Get"),
    ("post", HttpMethod::Post, "Create"),
    ("put", HttpMethod::Put, "Update"),
    ("patch", HttpMethod::Patch, "Update"),
    ("delete", HttpMethod::Delete, "Delete"),
];

/// Generates type definitions, field signatures, and the field-to-operation
/// mapping table for one service. Malformed nodes are skipped and recorded;
/// only a document whose root is not a JSON object excludes the service.
pub fn generate(
    document: &Value,
    descriptor: &ServiceDescriptor,
) -> Result<GeneratedSchema, MeshError> {
    let root = document.as_object().ok_or_else(|| MeshError::DocumentUnparsable {
        service: descriptor.name.clone(),
        reason: "document root is not a JSON object".to_string(),
    })?;

    let prefix = service_prefix(&descriptor.name);
    let mut generated = GeneratedSchema::default();

    let definitions = extract_definitions(root, descriptor, &mut generated);
    let resolver = RefResolver::new(&definitions, &prefix);

    emit_type_defs(&definitions, &prefix, &resolver, &mut generated);
    emit_operations(root, descriptor, &prefix, &resolver, &mut generated);

    Ok(generated)
}

/// Reusable schema definitions from `components.schemas` (OpenAPI 3.x) or
/// the legacy `definitions` location (Swagger 2.0), in lexicographic order.
fn extract_definitions(
    root: &Map<String, Value>,
    descriptor: &ServiceDescriptor,
    generated: &mut GeneratedSchema,
) -> BTreeMap<String, SchemaNode> {
    let raw = root
        .get("components")
        .and_then(|c| c.get("schemas"))
        .or_else(|| root.get("definitions"));

    let mut definitions = BTreeMap::new();
    let Some(raw) = raw else {
        return definitions;
    };
    let Some(schemas) = raw.as_object() else {
        generated.errors.push(GenerationError {
            service: descriptor.name.clone(),
            context: "schema definitions".to_string(),
            reason: "not a JSON object".to_string(),
        });
        return definitions;
    };

    for (name, schema) in schemas {
        if !schema.is_object() {
            generated.errors.push(GenerationError {
                service: descriptor.name.clone(),
                context: format!("definition '{}'", name),
                reason: "not a JSON object".to_string(),
            });
            continue;
        }
        definitions.insert(name.clone(), SchemaNode::parse(schema));
    }
    definitions
}

/// One federated type per reusable definition: enumerations keep their
/// members, objects keep their properties, aliases are resolved inline at
/// reference sites and emit nothing.
fn emit_type_defs(
    definitions: &BTreeMap<String, SchemaNode>,
    prefix: &str,
    resolver: &RefResolver<'_>,
    generated: &mut GeneratedSchema,
) {
    for (name, node) in definitions {
        let type_name = format!("{}{}", prefix, normalize_type_name(name));
        match node {
            SchemaNode::Enumeration(values) => {
                generated.type_defs.push(TypeDef::Enum {
                    name: type_name,
                    values: values.iter().map(|v| enum_member_name(v)).collect(),
                });
            }
            SchemaNode::Object(properties) => {
                let fields = properties
                    .iter()
                    .map(|(field_name, field_node)| FieldDef {
                        name: field_name.clone(),
                        type_ref: map_type(field_node, resolver),
                    })
                    .collect();
                generated.type_defs.push(TypeDef::Object {
                    name: type_name,
                    fields,
                });
            }
            _ => {}
        }
    }
}

fn emit_operations(
    root: &Map<String, Value>,
    descriptor: &ServiceDescriptor,
    prefix: &str,
    resolver: &RefResolver<'_>,
    generated: &mut GeneratedSchema,
) {
    let Some(paths) = root.get("paths") else {
        generated.errors.push(GenerationError {
            service: descriptor.name.clone(),
            context: "document".to_string(),
            reason: "missing 'paths'".to_string(),
        });
        return;
    };
    let Some(paths) = paths.as_object() else {
        generated.errors.push(GenerationError {
            service: descriptor.name.clone(),
            context: "paths".to_string(),
            reason: "not a JSON object".to_string(),
        });
        return;
    };

    let mut taken: BTreeSet<String> = BTreeSet::new();
    let sorted_paths: BTreeMap<_, _> = paths.iter().collect();

    for (path, item) in sorted_paths {
        if !path.starts_with('/') {
            // Extension keys (`x-*`) are legal members of the paths object.
            continue;
        }
        let Some(item) = item.as_object() else {
            generated.errors.push(GenerationError {
                service: descriptor.name.clone(),
                context: format!("path '{}'", path),
                reason: "not a JSON object".to_string(),
            });
            continue;
        };

        for (key, method, action) in METHODS {
            let Some(op) = item.get(key) else { continue };
            let Some(op) = op.as_object() else {
                generated.errors.push(GenerationError {
                    service: descriptor.name.clone(),
                    context: format!("{} {}", method, path),
                    reason: "operation is not a JSON object".to_string(),
                });
                continue;
            };

            let field_name = unique_field_name(prefix, action, path, &mut taken);
            synthesize_field(
                field_name, method, path, op, item, descriptor, resolver, generated,
            );
        }
    }
}

/// `<ServicePrefix><Action><PascalLiteralSegments>`, disambiguated when two
/// paths share their literal segments (e.g. `/orders` and `/orders/{id}`)
/// by appending `By<ParamNames>`, then a counter as a last resort.
fn unique_field_name(
    prefix: &str,
    action: &str,
    path: &str,
    taken: &mut BTreeSet<String>,
) -> String {
    let base = format!("{}{}{}", prefix, action, pascal_path_segments(path));
    if taken.insert(base.clone()) {
        return base;
    }
    let params: String = path
        .split('/')
        .filter(|seg| seg.starts_with('{'))
        .map(|seg| normalize_type_name(seg.trim_matches(['{', '}'])))
        .collect();
    if !params.is_empty() {
        let by_name = format!("{}By{}", base, params);
        if taken.insert(by_name.clone()) {
            return by_name;
        }
    }
    let mut counter = 2;
    loop {
        let numbered = format!("{}{}", base, counter);
        if taken.insert(numbered.clone()) {
            return numbered;
        }
        counter += 1;
    }
}

#[allow(clippy::too_many_arguments)]
fn synthesize_field(
    field_name: String,
    method: HttpMethod,
    path: &str,
    op: &Map<String, Value>,
    path_item: &Map<String, Value>,
    descriptor: &ServiceDescriptor,
    resolver: &RefResolver<'_>,
    generated: &mut GeneratedSchema,
) {
    let mut parameters = Vec::new();
    let mut body: Option<(SchemaNode, bool)> = None;

    // Path-level parameters apply to every operation on the path.
    for source in [path_item.get("parameters"), op.get("parameters")] {
        let Some(list) = source.and_then(Value::as_array) else {
            continue;
        };
        for raw in list {
            match parse_parameter(raw) {
                ParsedParameter::Request(param) => {
                    // Operation-level declarations override path-level ones.
                    parameters.retain(|p: &RequestParameter| p.name != param.name);
                    parameters.push(param);
                }
                ParsedParameter::Body { schema, required } => {
                    body = Some((schema, required));
                }
                ParsedParameter::Ignored => {}
                ParsedParameter::Malformed(reason) => {
                    generated.errors.push(GenerationError {
                        service: descriptor.name.clone(),
                        context: format!("{} {}", method, path),
                        reason,
                    });
                }
            }
        }
    }

    // OpenAPI 3.x request bodies; Swagger 2.0 uses an `in: body` parameter.
    if let Some(request_body) = op.get("requestBody").and_then(Value::as_object) {
        if let Some(schema) = json_media_schema(request_body.get("content")) {
            let required = request_body
                .get("required")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            body = Some((SchemaNode::parse(schema), required));
        }
    }

    let mut arguments: Vec<ArgumentDef> = parameters
        .iter()
        .map(|p| ArgumentDef {
            name: p.name.clone(),
            type_ref: p.type_ref.clone(),
            required: p.required,
        })
        .collect();

    let has_body = body.is_some() && !method.is_read();
    if let Some((schema, required)) = body.filter(|_| !method.is_read()) {
        arguments.push(ArgumentDef {
            name: "input".to_string(),
            type_ref: map_type(&schema, resolver),
            required,
        });
    }

    let signature = FieldSignature {
        name: field_name.clone(),
        arguments,
        return_type: success_response_type(op, resolver),
    };

    generated.mappings.push(FieldMapping {
        field_name,
        method,
        path_template: path.to_string(),
        service: descriptor.name.clone(),
        base_url: descriptor.base_url.clone(),
        parameters,
        has_body,
    });

    if method.is_read() {
        generated.query_fields.push(signature);
    } else {
        generated.mutation_fields.push(signature);
    }
}

enum ParsedParameter {
    Request(RequestParameter),
    Body { schema: SchemaNode, required: bool },
    /// Header/cookie/form parameters are not federated.
    Ignored,
    Malformed(String),
}

fn parse_parameter(raw: &Value) -> ParsedParameter {
    let Some(obj) = raw.as_object() else {
        return ParsedParameter::Malformed("parameter is not a JSON object".to_string());
    };
    let Some(name) = obj.get("name").and_then(Value::as_str) else {
        return ParsedParameter::Malformed("parameter without a name".to_string());
    };
    let required = obj.get("required").and_then(Value::as_bool).unwrap_or(false);

    // OpenAPI 3.x carries the schema in a sub-object; Swagger 2.0 puts
    // `type`/`format` directly on the parameter, which parses the same way.
    let node = match obj.get("schema") {
        Some(schema) => SchemaNode::parse(schema),
        None => SchemaNode::parse(raw),
    };

    match obj.get("in").and_then(Value::as_str) {
        Some("path") => ParsedParameter::Request(RequestParameter {
            name: name.to_string(),
            location: ParameterLocation::Path,
            type_ref: scalar_parameter_type(&node),
            // Path parameters are always required to interpolate the URL.
            required: true,
        }),
        Some("query") => ParsedParameter::Request(RequestParameter {
            name: name.to_string(),
            location: ParameterLocation::Query,
            type_ref: scalar_parameter_type(&node),
            required,
        }),
        Some("body") => ParsedParameter::Body {
            schema: node,
            required,
        },
        Some(_) => ParsedParameter::Ignored,
        None => ParsedParameter::Malformed(format!("parameter '{}' without 'in'", name)),
    }
}

/// Parameters ride in URLs, so references and objects degrade to string.
fn scalar_parameter_type(node: &SchemaNode) -> FederatedTypeRef {
    use crate::type_mapper::PrimitiveKind;
    match node {
        SchemaNode::Primitive(PrimitiveKind::Integer) => FederatedTypeRef::int(),
        SchemaNode::Primitive(PrimitiveKind::Number) => FederatedTypeRef::float(),
        SchemaNode::Primitive(PrimitiveKind::Boolean) => FederatedTypeRef::boolean(),
        SchemaNode::Array(items) => {
            FederatedTypeRef::list_of(scalar_parameter_type(items))
        }
        _ => FederatedTypeRef::string(),
    }
}

/// Return type from the first success response declaring a JSON body,
/// checked in `200`, `201`, `204` order; string when none declares one.
fn success_response_type(op: &Map<String, Value>, resolver: &RefResolver<'_>) -> FederatedTypeRef {
    let Some(responses) = op.get("responses").and_then(Value::as_object) else {
        return FederatedTypeRef::string();
    };
    for code in ["200", "201", "204"] {
        let Some(response) = responses.get(code).and_then(Value::as_object) else {
            continue;
        };
        // OpenAPI 3.x nests the schema under a media type; 2.0 is flat.
        if let Some(schema) = json_media_schema(response.get("content")) {
            return map_type(&SchemaNode::parse(schema), resolver);
        }
        if let Some(schema) = response.get("schema") {
            return map_type(&SchemaNode::parse(schema), resolver);
        }
    }
    FederatedTypeRef::string()
}

fn json_media_schema(content: Option<&Value>) -> Option<&Value> {
    let content = content?.as_object()?;
    content
        .iter()
        .find(|(media, _)| media.contains("json"))
        .and_then(|(_, media_obj)| media_obj.get("schema"))
}

/// Convenience used by the mesh manager and tests.
pub fn generate_for(descriptor: &ServiceDescriptor) -> Result<GeneratedSchema, MeshError> {
    let document = descriptor
        .document
        .as_ref()
        .ok_or_else(|| MeshError::DocumentUnparsable {
            service: descriptor.name.clone(),
            reason: "no document".to_string(),
        })?;
    generate(document, descriptor)
}
