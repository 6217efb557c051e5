use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use restmesh::config::ServiceEntry;
use restmesh::discovery::{DiscoverySource, HttpDiscovery};
use restmesh::{
    FederatedQueryExecutor, FederationGateway, GraphQLRequest, HttpFieldResolver, MeshManager,
    MeshStatus, RequestContext, SimpleQueryPlanner,
};

fn order_api_document() -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {"title": "order-api", "version": "1.0"},
        "paths": {
            "/orders/{id}": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true,
                         "schema": {"type": "string"}}
                    ],
                    "responses": {"200": {"content": {"application/json": {
                        "schema": {"$ref": "#/components/schemas/Order"}
                    }}}}
                }
            },
            "/orders": {
                "post": {
                    "requestBody": {
                        "required": true,
                        "content": {"application/json": {
                            "schema": {"$ref": "#/components/schemas/Order"}
                        }}
                    },
                    "responses": {"201": {"content": {"application/json": {
                        "schema": {"$ref": "#/components/schemas/Order"}
                    }}}}
                }
            }
        },
        "components": {"schemas": {
            "Order": {
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "total": {"type": "number"}
                }
            }
        }}
    })
}

/// An order-api backend: serves its OpenAPI document plus a couple of
/// REST endpoints, including one that always fails.
async fn spawn_order_api() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let io = TokioIo::new(stream);
            tokio::spawn(async move {
                let service = service_fn(|req: Request<Incoming>| async move {
                    let (parts, body) = req.into_parts();
                    let body_bytes = body.collect().await.unwrap().to_bytes();
                    let response = match (parts.method.as_str(), parts.uri.path()) {
                        ("GET", "/openapi.json") => json_ok(order_api_document().to_string()),
                        ("GET", "/orders/42") => {
                            json_ok(json!({"id": "42", "total": 10.5}).to_string())
                        }
                        ("GET", "/orders/boom") => Response::builder()
                            .status(StatusCode::INTERNAL_SERVER_ERROR)
                            .body(Full::new(Bytes::from("backend exploded")))
                            .unwrap(),
                        ("POST", "/orders") => Response::builder()
                            .status(StatusCode::CREATED)
                            .header("Content-Type", "application/json")
                            .body(Full::new(body_bytes))
                            .unwrap(),
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Full::new(Bytes::from("not found")))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    });
    addr
}

fn json_ok(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

struct Fixture {
    mesh: Arc<MeshManager>,
    gateway: FederationGateway,
    discovery: HttpDiscovery,
}

impl Fixture {
    async fn setup(addr: SocketAddr) -> Self {
        let discovery = HttpDiscovery::new(
            vec![ServiceEntry {
                name: "order-api".to_string(),
                namespace: "default".to_string(),
                base_url: format!("http://{}", addr),
            }],
            Duration::from_secs(2),
        );
        let mesh = Arc::new(MeshManager::new(None));
        let services = discovery.discover().await;
        mesh.update_configuration(services).await;

        let gateway = FederationGateway::new(
            Arc::clone(&mesh),
            Box::new(SimpleQueryPlanner::new()),
            Box::new(FederatedQueryExecutor::new(Arc::new(
                HttpFieldResolver::with_timeout(Duration::from_secs(5)),
            ))),
        );
        Fixture {
            mesh,
            gateway,
            discovery,
        }
    }

    async fn query(&self, query: &str) -> Value {
        self.gateway
            .process_request(GraphQLRequest {
                query: query.to_string(),
                variables: None,
                operation_name: None,
                context: RequestContext::default(),
            })
            .await
            .unwrap()
    }
}

#[tokio::test]
#[serial]
async fn discovery_builds_a_ready_federated_schema() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;

    let health = fixture.mesh.health_status();
    assert_eq!(health.status, MeshStatus::Ready);
    assert_eq!(health.services_count, 1);
    assert!(health.mesh_configured);

    let schema = fixture.mesh.schema().unwrap();
    assert!(schema.query_fields.contains_key("OrderApiGetOrders"));
    assert!(schema.mutation_fields.contains_key("OrderApiCreateOrders"));

    let sdl = schema.render_sdl();
    assert!(sdl.contains("type OrderApiOrder {"));
    assert!(sdl.contains("OrderApiGetOrders(id: String!): OrderApiOrder"));
    assert!(sdl.contains("type Mutation {"));
}

#[tokio::test]
#[serial]
async fn queries_proxy_to_the_owning_backend() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;

    let response = fixture
        .query(r#"{ order: OrderApiGetOrders(id: "42") { id total } }"#)
        .await;
    assert_eq!(response["data"]["order"], json!({"id": "42", "total": 10.5}));
    assert!(response.get("errors").is_none());
}

#[tokio::test]
#[serial]
async fn mutations_send_the_input_argument_as_request_body() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;

    let response = fixture
        .query(r#"mutation { OrderApiCreateOrders(input: {id: "9", total: 3.5}) }"#)
        .await;
    assert_eq!(
        response["data"]["OrderApiCreateOrders"],
        json!({"id": "9", "total": 3.5})
    );
}

#[tokio::test]
#[serial]
async fn backend_failure_is_tagged_and_leaves_mesh_state_alone() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;
    let before = fixture.mesh.stats();

    let response = fixture
        .query(r#"{ OrderApiGetOrders(id: "boom") }"#)
        .await;
    assert_eq!(response["data"]["OrderApiGetOrders"], Value::Null);
    let errors = response["errors"].as_array().unwrap();
    assert_eq!(errors[0]["service"], json!("order-api"));
    assert_eq!(errors[0]["path"], json!("/orders/boom"));
    assert!(
        errors[0]["message"]
            .as_str()
            .unwrap()
            .contains("HTTP 500")
    );

    // Mesh state is untouched by resolution failures.
    let after = fixture.mesh.stats();
    assert_eq!(before.services, after.services);
    assert_eq!(before.last_build, after.last_build);
    assert_eq!(fixture.mesh.health_status().status, MeshStatus::Ready);
}

#[tokio::test]
#[serial]
async fn repeat_discovery_with_unchanged_backends_skips_rebuild() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;

    let services = fixture.discovery.discover().await;
    assert!(!fixture.mesh.update_configuration(services).await);
}

#[tokio::test]
#[serial]
async fn builtin_status_fields_work_alongside_service_fields() {
    let addr = spawn_order_api().await;
    let fixture = Fixture::setup(addr).await;

    let response = fixture.query("{ status discoveredServices }").await;
    assert_eq!(response["data"]["status"], json!("ready"));
    assert_eq!(response["data"]["discoveredServices"], json!(["order-api"]));
}
