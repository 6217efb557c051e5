use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::GraphQLRequest;
use crate::error::GatewayError;
use crate::mesh_manager::MeshManager;
use crate::query_executor::QueryExecutor;
use crate::query_planner::QueryPlanner;

/// Ties the mesh manager, planner, and executor together behind one
/// request entry point. Each request runs against the configuration
/// snapshot current at its start; a concurrent rebuild never affects it.
pub struct FederationGateway {
    mesh: Arc<MeshManager>,
    query_planner: Arc<dyn QueryPlanner + Send + Sync>,
    query_executor: Arc<dyn QueryExecutor + Send + Sync>,
}

impl FederationGateway {
    pub fn new(
        mesh: Arc<MeshManager>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        query_executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        FederationGateway {
            mesh,
            query_planner: Arc::from(query_planner),
            query_executor: Arc::from(query_executor),
        }
    }

    pub fn mesh(&self) -> &Arc<MeshManager> {
        &self.mesh
    }

    pub async fn process_request(&self, request: GraphQLRequest) -> Result<Value, GatewayError> {
        let Some(schema) = self.mesh.schema() else {
            return Err(GatewayError::SchemaUnavailable);
        };
        debug!(operation = ?request.operation_name, "processing graph query");

        let plan = self
            .query_planner
            .plan_query(
                &request.query,
                &schema,
                request.variables.as_ref(),
                request.operation_name.as_deref(),
            )
            .await?;

        self.query_executor
            .execute_plan(plan, &schema, &request.context)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_resolver::HttpFieldResolver;
    use crate::query_executor::FederatedQueryExecutor;
    use crate::query_planner::SimpleQueryPlanner;
    use crate::{RequestContext, STATUS_FIELD};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn gateway(mesh: Arc<MeshManager>) -> FederationGateway {
        FederationGateway::new(
            mesh,
            Box::new(SimpleQueryPlanner::new()),
            Box::new(FederatedQueryExecutor::new(Arc::new(
                HttpFieldResolver::new(),
            ))),
        )
    }

    #[tokio::test]
    async fn requests_fail_before_first_build() {
        let gateway = gateway(Arc::new(MeshManager::new(None)));
        let err = gateway
            .process_request(GraphQLRequest {
                query: "{ status }".to_string(),
                variables: None,
                operation_name: None,
                context: RequestContext::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SchemaUnavailable));
    }

    #[tokio::test]
    async fn status_query_answers_from_fallback_schema() {
        let mesh = Arc::new(MeshManager::new(None));
        mesh.update_configuration(Vec::new()).await;
        let gateway = gateway(mesh);

        let response = gateway
            .process_request(GraphQLRequest {
                query: format!("{{ {} discoveredServices }}", STATUS_FIELD),
                variables: None,
                operation_name: None,
                context: RequestContext::default(),
            })
            .await
            .unwrap();
        assert_eq!(response["data"]["status"], json!("empty"));
        assert_eq!(response["data"]["discoveredServices"], json!([]));
    }
}
