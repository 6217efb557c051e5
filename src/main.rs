use clap::Parser;
use serde_json::json;
use std::convert::Infallible;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use restmesh::config::MeshConfig;
use restmesh::discovery::{DiscoverySource, HttpDiscovery};
use restmesh::{
    FederatedQueryExecutor, FederationGateway, GraphQLRequest, HttpFieldResolver, MeshManager,
    RequestContext, SimpleQueryPlanner,
};

struct App {
    gateway: FederationGateway,
    discovery: Arc<HttpDiscovery>,
}

// Create a response body from a string
fn full<T: Into<Bytes>>(value: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(value.into())
        .map_err(|never| match never {})
        .boxed()
}

const GRAPHIQL_HTML: &str = r#"
<!DOCTYPE html>
<html>
<head>
  <title>GraphiQL - restmesh Federation Gateway</title>
  <link href="https://unpkg.com/graphiql@1.5.0/graphiql.min.css" rel="stylesheet" />
  <style>
    body { margin: 0; padding: 0; height: 100vh; }
    #graphiql { height: 100vh; }
  </style>
</head>
<body>
  <div id="graphiql"></div>

  <script src="https://unpkg.com/react@17.0.2/umd/react.production.min.js"></script>
  <script src="https://unpkg.com/react-dom@17.0.2/umd/react-dom.production.min.js"></script>
  <script src="https://unpkg.com/graphiql@1.5.0/graphiql.min.js"></script>
  <script>
    const token = localStorage.getItem('auth_token') || '';

    function graphQLFetcher(graphQLParams) {
      return fetch('/graphql', {
        method: 'post',
        headers: {
          'Content-Type': 'application/json',
          'Authorization': token ? `Bearer ${token}` : '',
        },
        body: JSON.stringify(graphQLParams),
      }).then(response => response.json());
    }

    ReactDOM.render(
      React.createElement(GraphiQL, { fetcher: graphQLFetcher }),
      document.getElementById('graphiql')
    );
  </script>
</body>
</html>
"#;

async fn handle_request(
    req: Request<Incoming>,
    app: Arc<App>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Infallible> {
    let context = RequestContext::from_headers(
        req.headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v))),
    );

    let result = match (req.method(), req.uri().path()) {
        (&Method::POST, "/graphql") => {
            let body_bytes = match req.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(_) => {
                    return Ok(Response::builder()
                        .status(StatusCode::BAD_REQUEST)
                        .body(full("Failed to read request body"))
                        .unwrap());
                }
            };

            match serde_json::from_slice::<GraphQLRequest>(&body_bytes) {
                Ok(mut graphql_req) => {
                    graphql_req.context = context;

                    match app.gateway.process_request(graphql_req).await {
                        Ok(result) => {
                            let body = serde_json::to_string(&result).unwrap_or_default();
                            json_response(body)
                        }
                        Err(e) => {
                            let body = serde_json::to_string(&json!({
                                "errors": [{ "message": e.to_string() }]
                            }))
                            .unwrap_or_default();
                            json_response(body)
                        }
                    }
                }
                Err(e) => Response::builder()
                    .status(StatusCode::BAD_REQUEST)
                    .header("Access-Control-Allow-Origin", "*")
                    .body(full(format!("Invalid JSON request: {}", e)))
                    .unwrap_or_else(|_| internal_server_error()),
            }
        }

        (&Method::GET, "/health") => {
            let health = app.gateway.mesh().health_status();
            json_response(serde_json::to_string(&health).unwrap_or_default())
        }

        (&Method::GET, "/stats") => {
            let stats = app.gateway.mesh().stats();
            json_response(serde_json::to_string(&stats).unwrap_or_default())
        }

        (&Method::GET, "/schema") => match app.gateway.mesh().schema() {
            Some(schema) => Response::builder()
                .header("Content-Type", "text/plain")
                .header("Access-Control-Allow-Origin", "*")
                .body(full(schema.render_sdl()))
                .unwrap_or_else(|_| internal_server_error()),
            None => Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header("Access-Control-Allow-Origin", "*")
                .body(full("No federated schema published yet"))
                .unwrap_or_else(|_| internal_server_error()),
        },

        (&Method::POST, "/discover") => {
            let services = app.discovery.discover().await;
            let changed = app.gateway.mesh().update_configuration(services).await;
            json_response(json!({ "changed": changed }).to_string())
        }

        (&Method::GET, "/graphiql") => Response::builder()
            .header("Content-Type", "text/html")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(GRAPHIQL_HTML))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::GET, "/") => Response::builder()
            .status(StatusCode::FOUND)
            .header("Location", "/graphiql")
            .header("Access-Control-Allow-Origin", "*")
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        (&Method::OPTIONS, _) => Response::builder()
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type, Authorization",
            )
            .body(full(""))
            .unwrap_or_else(|_| internal_server_error()),

        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("Access-Control-Allow-Origin", "*")
            .body(full("Not Found"))
            .unwrap_or_else(|_| internal_server_error()),
    };

    Ok(result)
}

fn json_response(body: String) -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full(body))
        .unwrap_or_else(|_| internal_server_error())
}

fn internal_server_error() -> Response<BoxBody<Bytes, hyper::Error>> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(full("Internal Server Error"))
        .unwrap()
}

#[derive(Clone)]
// An Executor that uses the tokio runtime.
pub struct TokioExecutor;

impl<F> hyper::rt::Executor<F> for TokioExecutor
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn(fut);
    }
}

/// Schema-federation gateway for REST/OpenAPI backends.
#[derive(Parser, Debug)]
#[command(name = "restmesh", version)]
struct Args {
    /// Path to the mesh configuration file.
    #[arg(short, long, default_value = "mesh.yaml")]
    config: PathBuf,

    /// Listen port, overriding the configuration file.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = MeshConfig::load(&args.config)?;
    let port = args.port.unwrap_or(config.gateway.port);

    let mesh = Arc::new(MeshManager::new(Some(args.config.display().to_string())));
    let resolver = Arc::new(HttpFieldResolver::with_timeout(Duration::from_secs(
        config.gateway.resolver_timeout_secs,
    )));
    let discovery = Arc::new(HttpDiscovery::new(
        config.services.clone(),
        Duration::from_secs(config.gateway.probe_timeout_secs),
    ));
    let gateway = FederationGateway::new(
        Arc::clone(&mesh),
        Box::new(SimpleQueryPlanner::new()),
        Box::new(FederatedQueryExecutor::new(resolver)),
    );

    let app = Arc::new(App {
        gateway,
        discovery: Arc::clone(&discovery),
    });

    // Discovery loop: the first tick fires immediately, so the mesh is
    // built before the listener starts accepting traffic in practice.
    {
        let mesh = Arc::clone(&mesh);
        let discovery = Arc::clone(&discovery);
        let period = Duration::from_secs(config.gateway.poll_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let services = discovery.discover().await;
                mesh.update_configuration(services).await;
            }
        });
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "schema federation gateway listening");
    info!("GraphiQL UI available at http://{}/graphiql", addr);

    loop {
        let (stream, _addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let app_clone = Arc::clone(&app);

        let executor = TokioExecutor;

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let app = app_clone.clone();
                handle_request(req, app)
            });

            if let Err(e) = hyper_util::server::conn::auto::Builder::new(executor)
                .serve_connection(io, service)
                .await
            {
                error!(error = %e, "error processing connection");
            }
        });
    }
}
