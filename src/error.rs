use crate::HttpMethod;

/// Errors affecting the mesh as a whole or one service within a build cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshError {
    /// No backend with a usable OpenAPI document was discovered. Non-fatal:
    /// the manager publishes the fallback schema and keeps polling.
    #[error("no usable backend services discovered")]
    DiscoveryUnavailable,

    /// One service's OpenAPI document could not be used at all. The service
    /// is excluded from the current build cycle; other services proceed.
    #[error("service '{service}': OpenAPI document unusable: {reason}")]
    DocumentUnparsable { service: String, reason: String },

    /// Total inability to construct a federated configuration. The previous
    /// configuration is retained, or the fallback schema is published if
    /// there has never been a successful build.
    #[error("failed to assemble federated configuration: {0}")]
    MergeFailure(String),
}

/// Why a single field resolution failed.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionErrorKind {
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// A single field's outbound call failed at query time. Tagged with the
/// owning service, method, and resolved path so the query-execution layer
/// can report it without consulting the mesh. Never touches mesh state.
#[derive(Debug, thiserror::Error)]
#[error("resolution failed for service={service} method={method} path={path}: {kind}")]
pub struct ResolutionError {
    pub service: String,
    pub method: HttpMethod,
    pub path: String,
    pub kind: ResolutionErrorKind,
}

impl ResolutionError {
    pub fn is_missing_argument(&self) -> bool {
        matches!(self.kind, ResolutionErrorKind::MissingArgument(_))
    }
}

/// Errors on the inbound request path.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("federated schema is not available yet")]
    SchemaUnavailable,

    #[error("failed to parse query: {0}")]
    QueryParse(String),

    #[error("cannot query field '{0}'")]
    UnknownField(String),

    #[error("variable '${0}' is not defined")]
    UndefinedVariable(String),

    #[error("no operation named '{0}' in document")]
    UnknownOperation(String),

    #[error("query document contains no executable operations")]
    EmptyDocument,
}

/// Errors while loading the mesh configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
