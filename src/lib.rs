pub mod config;
pub mod discovery;
pub mod error;
pub mod federation_gateway;
pub mod field_resolver;
pub mod mesh_manager;
pub mod query_executor;
pub mod query_planner;
pub mod schema_generator;
pub mod type_mapper;

pub use error::{ConfigError, GatewayError, MeshError, ResolutionError, ResolutionErrorKind};
pub use federation_gateway::FederationGateway;
pub use field_resolver::{FieldResolver, HttpFieldResolver};
pub use mesh_manager::{HealthStatus, MeshManager, MeshStats, MeshStatus};
pub use query_executor::FederatedQueryExecutor;
pub use query_planner::SimpleQueryPlanner;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// One discovered backend service, as reported by the discovery source.
/// Read-only to the core; superseded wholesale on every discovery cycle.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    pub name: String,
    pub namespace: String,
    pub base_url: String,
    pub has_open_api: bool,
    /// Parsed OpenAPI/Swagger document, when one was fetched.
    pub document: Option<Value>,
    pub last_updated: DateTime<Utc>,
    pub ready: bool,
}

impl ServiceDescriptor {
    /// True when this service can contribute to a federated build.
    pub fn usable(&self) -> bool {
        self.ready && self.has_open_api && self.document.is_some()
    }
}

/// HTTP methods the federation proxies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Read operations surface as query fields, writes as mutations.
    pub fn is_read(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a federated type: a named type or a list of one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FederatedTypeRef {
    Named(String),
    List(Box<FederatedTypeRef>),
}

impl FederatedTypeRef {
    pub fn string() -> Self {
        FederatedTypeRef::Named("String".to_string())
    }

    pub fn int() -> Self {
        FederatedTypeRef::Named("Int".to_string())
    }

    pub fn float() -> Self {
        FederatedTypeRef::Named("Float".to_string())
    }

    pub fn boolean() -> Self {
        FederatedTypeRef::Named("Boolean".to_string())
    }

    /// Opaque structured-JSON scalar, used for anonymous inline objects.
    pub fn json() -> Self {
        FederatedTypeRef::Named("JSON".to_string())
    }

    pub fn list_of(inner: FederatedTypeRef) -> Self {
        FederatedTypeRef::List(Box::new(inner))
    }

    pub fn render(&self) -> String {
        match self {
            FederatedTypeRef::Named(name) => name.clone(),
            FederatedTypeRef::List(inner) => format!("[{}]", inner.render()),
        }
    }

    fn mentions(&self, name: &str) -> bool {
        match self {
            FederatedTypeRef::Named(n) => n == name,
            FederatedTypeRef::List(inner) => inner.mentions(name),
        }
    }
}

/// A field of a generated object type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub type_ref: FederatedTypeRef,
}

/// One federated type emitted from a service's reusable schema definitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeDef {
    Object { name: String, fields: Vec<FieldDef> },
    Enum { name: String, values: Vec<String> },
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Object { name, .. } => name,
            TypeDef::Enum { name, .. } => name,
        }
    }
}

/// An argument of a query or mutation field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    pub type_ref: FederatedTypeRef,
    pub required: bool,
}

/// The callable signature of one federated field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSignature {
    pub name: String,
    pub arguments: Vec<ArgumentDef>,
    pub return_type: FederatedTypeRef,
}

/// Where a REST request parameter is carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParameter {
    pub name: String,
    pub location: ParameterLocation,
    pub type_ref: FederatedTypeRef,
    pub required: bool,
}

/// Links one federated field to the concrete REST operation it proxies.
/// Regenerated wholesale whenever the owning service's document changes;
/// never mutated in place. Carries everything the resolver needs so the
/// OpenAPI document is never re-read at query time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    pub method: HttpMethod,
    /// May contain `{param}` placeholders.
    pub path_template: String,
    /// Owning service name, for error tagging.
    pub service: String,
    pub base_url: String,
    pub parameters: Vec<RequestParameter>,
    /// True when a JSON request body is declared; the `input` argument is
    /// serialized as the outbound body.
    pub has_body: bool,
}

/// Introspective data baked into a published configuration so the builtin
/// `status`/`discoveredServices` fields resolve against the same immutable
/// snapshot as everything else.
#[derive(Clone, Debug, Serialize)]
pub struct StatusInfo {
    pub status: String,
    pub services: Vec<String>,
}

pub const STATUS_FIELD: &str = "status";
pub const DISCOVERED_SERVICES_FIELD: &str = "discoveredServices";

/// The aggregate unit that is atomically swapped into service. Immutable
/// once published; a rebuild constructs a brand-new configuration.
#[derive(Clone, Debug)]
pub struct FederatedSchemaConfiguration {
    pub types: BTreeMap<String, TypeDef>,
    pub query_fields: BTreeMap<String, FieldSignature>,
    pub mutation_fields: BTreeMap<String, FieldSignature>,
    pub mappings: BTreeMap<String, FieldMapping>,
    pub status_info: StatusInfo,
    /// True for the minimal built-in schema served when no usable backends
    /// exist or the very first build failed.
    pub fallback: bool,
}

impl FederatedSchemaConfiguration {
    /// The minimal built-in schema: introspective status fields only.
    pub fn fallback(status: &str, discovered: Vec<String>) -> Self {
        let mut query_fields = BTreeMap::new();
        for sig in Self::builtin_signatures() {
            query_fields.insert(sig.name.clone(), sig);
        }
        FederatedSchemaConfiguration {
            types: BTreeMap::new(),
            query_fields,
            mutation_fields: BTreeMap::new(),
            mappings: BTreeMap::new(),
            status_info: StatusInfo {
                status: status.to_string(),
                services: discovered,
            },
            fallback: true,
        }
    }

    pub fn builtin_signatures() -> Vec<FieldSignature> {
        vec![
            FieldSignature {
                name: STATUS_FIELD.to_string(),
                arguments: Vec::new(),
                return_type: FederatedTypeRef::string(),
            },
            FieldSignature {
                name: DISCOVERED_SERVICES_FIELD.to_string(),
                arguments: Vec::new(),
                return_type: FederatedTypeRef::list_of(FederatedTypeRef::string()),
            },
        ]
    }

    /// Resolves a builtin introspective field from the snapshot itself.
    /// Returns `None` for fields that proxy to a backend.
    pub fn introspective_value(&self, field: &str) -> Option<Value> {
        if !self.query_fields.contains_key(field) || self.mappings.contains_key(field) {
            return None;
        }
        match field {
            STATUS_FIELD => Some(Value::String(self.status_info.status.clone())),
            DISCOVERED_SERVICES_FIELD => Some(Value::Array(
                self.status_info
                    .services
                    .iter()
                    .map(|s| Value::String(s.clone()))
                    .collect(),
            )),
            _ => None,
        }
    }

    fn uses_json_scalar(&self) -> bool {
        let field_uses = |sig: &FieldSignature| {
            sig.return_type.mentions("JSON")
                || sig.arguments.iter().any(|a| a.type_ref.mentions("JSON"))
        };
        self.query_fields.values().any(field_uses)
            || self.mutation_fields.values().any(field_uses)
            || self.types.values().any(|t| match t {
                TypeDef::Object { fields, .. } => {
                    fields.iter().any(|f| f.type_ref.mentions("JSON"))
                }
                TypeDef::Enum { .. } => false,
            })
    }

    /// Renders the configuration as GraphQL SDL. Deterministic: map order
    /// is lexicographic, so identical configurations render identically.
    pub fn render_sdl(&self) -> String {
        let mut out = String::new();
        if self.uses_json_scalar() {
            out.push_str("scalar JSON\n\n");
        }
        for type_def in self.types.values() {
            match type_def {
                TypeDef::Object { name, fields } => {
                    out.push_str(&format!("type {} {{\n", name));
                    for field in fields {
                        out.push_str(&format!("  {}: {}\n", field.name, field.type_ref.render()));
                    }
                    out.push_str("}\n\n");
                }
                TypeDef::Enum { name, values } => {
                    out.push_str(&format!("enum {} {{\n", name));
                    for value in values {
                        out.push_str(&format!("  {}\n", value));
                    }
                    out.push_str("}\n\n");
                }
            }
        }
        render_operation(&mut out, "Query", &self.query_fields);
        if !self.mutation_fields.is_empty() {
            out.push('\n');
            render_operation(&mut out, "Mutation", &self.mutation_fields);
        }
        out
    }
}

fn render_operation(out: &mut String, name: &str, fields: &BTreeMap<String, FieldSignature>) {
    out.push_str(&format!("type {} {{\n", name));
    for sig in fields.values() {
        if sig.arguments.is_empty() {
            out.push_str(&format!("  {}: {}\n", sig.name, sig.return_type.render()));
        } else {
            let args = sig
                .arguments
                .iter()
                .map(|a| {
                    let bang = if a.required { "!" } else { "" };
                    format!("{}: {}{}", a.name, a.type_ref.render(), bang)
                })
                .collect::<Vec<_>>()
                .join(", ");
            out.push_str(&format!(
                "  {}({}): {}\n",
                sig.name,
                args,
                sig.return_type.render()
            ));
        }
    }
    out.push_str("}\n");
}

/// Inbound headers forwarded verbatim to backend calls. Nothing else
/// crosses the boundary.
pub const FORWARDED_HEADERS: [&str; 4] = ["authorization", "x-api-key", "x-user-id", "x-tenant-id"];

/// Per-request context carried from the front door into field resolution.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
}

impl RequestContext {
    /// Keeps only the allow-listed headers, keyed lowercase.
    pub fn from_headers<'a>(headers: impl Iterator<Item = (&'a str, &'a str)>) -> Self {
        let mut kept = HashMap::new();
        for (name, value) in headers {
            let name = name.to_ascii_lowercase();
            if FORWARDED_HEADERS.contains(&name.as_str()) {
                kept.insert(name, value.to_string());
            }
        }
        RequestContext { headers: kept }
    }
}

/// An inbound graph query as posted to the front door.
#[derive(Serialize, Deserialize, Debug)]
pub struct GraphQLRequest {
    pub query: String,
    pub variables: Option<Value>,
    pub operation_name: Option<String>,
    #[serde(skip)]
    pub context: RequestContext,
}
