use crate::error::{ResolutionError, ResolutionErrorKind};
use crate::{FORWARDED_HEADERS, FieldMapping, HttpMethod, ParameterLocation, RequestContext};
use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::Duration;

/// Unreserved characters pass through; everything else is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes one federated field against the backend that owns it.
/// Stateless per call: everything needed comes from the immutable mapping,
/// the caller's arguments, and the request context.
#[async_trait]
pub trait FieldResolver {
    async fn resolve(
        &self,
        mapping: &FieldMapping,
        arguments: &Map<String, Value>,
        context: &RequestContext,
    ) -> Result<Value, ResolutionError>;
}

pub struct HttpFieldResolver {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFieldResolver {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RESOLVER_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        HttpFieldResolver {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpFieldResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitutes every `{param}` placeholder with the correspondingly-named
/// argument, percent-encoded. A missing or null argument for a placeholder
/// is a resolution-time failure and no outbound call is made.
pub fn interpolate_path(
    mapping: &FieldMapping,
    arguments: &Map<String, Value>,
) -> Result<String, ResolutionError> {
    let mut out = String::new();
    for segment in mapping.path_template.split('/') {
        if segment.is_empty() {
            continue;
        }
        out.push('/');
        if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            let value = arguments.get(name).filter(|v| !v.is_null()).ok_or_else(|| {
                ResolutionError {
                    service: mapping.service.clone(),
                    method: mapping.method,
                    path: mapping.path_template.clone(),
                    kind: ResolutionErrorKind::MissingArgument(name.to_string()),
                }
            })?;
            let raw = stringify(value);
            out.push_str(&utf8_percent_encode(&raw, PATH_SEGMENT).to_string());
        } else {
            out.push_str(segment);
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Scalars keep their literal form; structured values fall back to
/// compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn path_parameter_names(mapping: &FieldMapping) -> HashSet<&str> {
    mapping
        .path_template
        .split('/')
        .filter_map(|seg| seg.strip_prefix('{').and_then(|s| s.strip_suffix('}')))
        .collect()
}

#[async_trait]
impl FieldResolver for HttpFieldResolver {
    async fn resolve(
        &self,
        mapping: &FieldMapping,
        arguments: &Map<String, Value>,
        context: &RequestContext,
    ) -> Result<Value, ResolutionError> {
        let path = interpolate_path(mapping, arguments)?;
        let url = format!("{}{}", mapping.base_url.trim_end_matches('/'), path);

        let tag_error = |kind: ResolutionErrorKind| ResolutionError {
            service: mapping.service.clone(),
            method: mapping.method,
            path: path.clone(),
            kind,
        };

        let method = match mapping.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut request = self.client.request(method, &url).timeout(self.timeout);

        // Read operations: every argument not consumed by the path rides as
        // a query parameter. Writes: only declared query parameters do.
        let path_names = path_parameter_names(mapping);
        let mut query: Vec<(String, String)> = Vec::new();
        if mapping.method.is_read() {
            for (name, value) in arguments {
                if path_names.contains(name.as_str()) || value.is_null() {
                    continue;
                }
                query.push((name.clone(), stringify(value)));
            }
        } else {
            for param in &mapping.parameters {
                if param.location != ParameterLocation::Query {
                    continue;
                }
                if let Some(value) = arguments.get(&param.name).filter(|v| !v.is_null()) {
                    query.push((param.name.clone(), stringify(value)));
                }
            }
        }
        if !query.is_empty() {
            request = request.query(&query);
        }

        // Only the fixed allow-list crosses the boundary, verbatim.
        for (name, value) in &context.headers {
            if FORWARDED_HEADERS.contains(&name.as_str()) {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        if mapping.has_body {
            if let Some(input) = arguments.get("input").filter(|v| !v.is_null()) {
                request = request.json(input);
            }
        }

        // Exactly one attempt; retries belong to the front-door layer.
        let response = request
            .send()
            .await
            .map_err(|e| tag_error(ResolutionErrorKind::Transport(e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            return Err(tag_error(ResolutionErrorKind::Status(status.as_u16())));
        }

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("json"))
            .unwrap_or(false);

        if is_json {
            response
                .json::<Value>()
                .await
                .map_err(|e| tag_error(ResolutionErrorKind::Decode(e.to_string())))
        } else {
            response
                .text()
                .await
                .map(Value::String)
                .map_err(|e| tag_error(ResolutionErrorKind::Decode(e.to_string())))
        }
    }
}
