use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::warn;

use crate::error::GatewayError;
use crate::field_resolver::FieldResolver;
use crate::query_planner::{FieldInvocation, OperationKind, QueryPlan};
use crate::{FederatedSchemaConfiguration, RequestContext};

#[async_trait]
pub trait QueryExecutor {
    async fn execute_plan(
        &self,
        plan: QueryPlan,
        schema: &FederatedSchemaConfiguration,
        context: &RequestContext,
    ) -> Result<Value, GatewayError>;
}

/// Executes a plan by resolving every top-level field against its owning
/// backend. Query fields run concurrently; mutation fields run in the
/// order they were written. A failed field nulls its data entry and adds
/// a tagged error; it never fails the whole response on its own.
pub struct FederatedQueryExecutor {
    resolver: Arc<dyn FieldResolver + Send + Sync>,
}

impl FederatedQueryExecutor {
    pub fn new(resolver: Arc<dyn FieldResolver + Send + Sync>) -> Self {
        FederatedQueryExecutor { resolver }
    }

    async fn resolve_invocation(
        &self,
        invocation: &FieldInvocation,
        schema: &FederatedSchemaConfiguration,
        context: &RequestContext,
    ) -> (String, Result<Value, Value>) {
        let alias = invocation.alias.clone();

        if let Some(value) = schema.introspective_value(&invocation.field_name) {
            return (alias, Ok(value));
        }

        let Some(mapping) = schema.mappings.get(&invocation.field_name) else {
            // The planner validated the field, so this only happens if a
            // signature was published without its mapping row.
            return (
                alias,
                Err(json!({
                    "message": format!("no mapping for field '{}'", invocation.field_name)
                })),
            );
        };

        match self
            .resolver
            .resolve(mapping, &invocation.arguments, context)
            .await
        {
            Ok(value) => (alias, Ok(value)),
            Err(e) => {
                warn!(
                    service = %e.service,
                    method = %e.method,
                    path = %e.path,
                    "field resolution failed"
                );
                (
                    alias,
                    Err(json!({
                        "message": e.to_string(),
                        "service": e.service,
                        "path": e.path,
                    })),
                )
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for FederatedQueryExecutor {
    async fn execute_plan(
        &self,
        plan: QueryPlan,
        schema: &FederatedSchemaConfiguration,
        context: &RequestContext,
    ) -> Result<Value, GatewayError> {
        let results: Vec<(String, Result<Value, Value>)> = match plan.kind {
            OperationKind::Query => {
                join_all(
                    plan.invocations
                        .iter()
                        .map(|invocation| self.resolve_invocation(invocation, schema, context)),
                )
                .await
            }
            OperationKind::Mutation => {
                // Mutations execute serially so writes observe one another.
                let mut collected = Vec::with_capacity(plan.invocations.len());
                for invocation in &plan.invocations {
                    collected.push(self.resolve_invocation(invocation, schema, context).await);
                }
                collected
            }
        };

        let mut data = Map::new();
        let mut errors = Vec::new();
        for (alias, result) in results {
            match result {
                Ok(value) => {
                    data.insert(alias, value);
                }
                Err(error) => {
                    data.insert(alias, Value::Null);
                    errors.push(error);
                }
            }
        }

        let mut response = json!({ "data": data });
        if !errors.is_empty() {
            response["errors"] = Value::Array(errors);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ResolutionError, ResolutionErrorKind};
    use crate::query_planner::FieldInvocation;
    use crate::{FieldMapping, HttpMethod, StatusInfo};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Answers from a canned table; `/orders/42` fails with HTTP 500.
    struct StubResolver {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl FieldResolver for StubResolver {
        async fn resolve(
            &self,
            mapping: &FieldMapping,
            arguments: &Map<String, Value>,
            _context: &RequestContext,
        ) -> Result<Value, ResolutionError> {
            self.calls.lock().unwrap().push(mapping.field_name.clone());
            if arguments.get("id") == Some(&json!("42")) {
                return Err(ResolutionError {
                    service: mapping.service.clone(),
                    method: mapping.method,
                    path: "/orders/42".to_string(),
                    kind: ResolutionErrorKind::Status(500),
                });
            }
            Ok(json!({"id": "7", "total": 9.5}))
        }
    }

    fn schema_with_mapping() -> FederatedSchemaConfiguration {
        let mut mappings = BTreeMap::new();
        let mut query_fields = BTreeMap::new();
        for sig in FederatedSchemaConfiguration::builtin_signatures() {
            query_fields.insert(sig.name.clone(), sig);
        }
        query_fields.insert(
            "OrderApiGetOrders".to_string(),
            crate::FieldSignature {
                name: "OrderApiGetOrders".to_string(),
                arguments: Vec::new(),
                return_type: crate::FederatedTypeRef::json(),
            },
        );
        mappings.insert(
            "OrderApiGetOrders".to_string(),
            FieldMapping {
                field_name: "OrderApiGetOrders".to_string(),
                method: HttpMethod::Get,
                path_template: "/orders/{id}".to_string(),
                service: "order-api".to_string(),
                base_url: "http://order-api:8080".to_string(),
                parameters: Vec::new(),
                has_body: false,
            },
        );
        FederatedSchemaConfiguration {
            types: BTreeMap::new(),
            query_fields,
            mutation_fields: BTreeMap::new(),
            mappings,
            status_info: StatusInfo {
                status: "ready".to_string(),
                services: vec!["order-api".to_string()],
            },
            fallback: false,
        }
    }

    fn invocation(alias: &str, field: &str, arguments: Value) -> FieldInvocation {
        FieldInvocation {
            alias: alias.to_string(),
            field_name: field.to_string(),
            arguments: arguments.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn merges_resolved_fields_under_their_aliases() {
        let executor = FederatedQueryExecutor::new(Arc::new(StubResolver {
            calls: Mutex::new(Vec::new()),
        }));
        let schema = schema_with_mapping();
        let plan = QueryPlan {
            kind: OperationKind::Query,
            invocations: vec![
                invocation("order", "OrderApiGetOrders", json!({"id": "7"})),
                invocation("status", "status", json!({})),
            ],
        };
        let response = executor
            .execute_plan(plan, &schema, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(response["data"]["order"], json!({"id": "7", "total": 9.5}));
        assert_eq!(response["data"]["status"], json!("ready"));
        assert!(response.get("errors").is_none());
    }

    #[tokio::test]
    async fn failed_field_nulls_data_and_tags_error() {
        let executor = FederatedQueryExecutor::new(Arc::new(StubResolver {
            calls: Mutex::new(Vec::new()),
        }));
        let schema = schema_with_mapping();
        let plan = QueryPlan {
            kind: OperationKind::Query,
            invocations: vec![invocation("order", "OrderApiGetOrders", json!({"id": "42"}))],
        };
        let response = executor
            .execute_plan(plan, &schema, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(response["data"]["order"], Value::Null);
        let errors = response["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["service"], json!("order-api"));
        assert_eq!(errors[0]["path"], json!("/orders/42"));
    }

    #[tokio::test]
    async fn introspective_fields_resolve_from_the_snapshot() {
        let executor = FederatedQueryExecutor::new(Arc::new(StubResolver {
            calls: Mutex::new(Vec::new()),
        }));
        let schema = schema_with_mapping();
        let plan = QueryPlan {
            kind: OperationKind::Query,
            invocations: vec![invocation(
                "discoveredServices",
                "discoveredServices",
                json!({}),
            )],
        };
        let response = executor
            .execute_plan(plan, &schema, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(response["data"]["discoveredServices"], json!(["order-api"]));
    }
}
