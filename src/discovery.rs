use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ServiceDescriptor;
use crate::config::ServiceEntry;

/// Conventional locations probed for an interface document, in order.
pub const DOCUMENT_PATHS: [&str; 7] = [
    "/openapi.json",
    "/openapi",
    "/swagger.json",
    "/swagger",
    "/api/openapi.json",
    "/api/swagger.json",
    "/spec.json",
];

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers the current set of candidate backends, once per discovery
/// tick and on demand for forced discovery.
#[async_trait]
pub trait DiscoverySource {
    async fn discover(&self) -> Vec<ServiceDescriptor>;
}

/// Probes configured backends over HTTP for their OpenAPI documents.
/// The candidate list itself comes from configuration; cluster-level
/// discovery is a separate concern feeding that list.
pub struct HttpDiscovery {
    client: reqwest::Client,
    targets: Vec<ServiceEntry>,
    probe_timeout: Duration,
}

impl HttpDiscovery {
    pub fn new(targets: Vec<ServiceEntry>, probe_timeout: Duration) -> Self {
        HttpDiscovery {
            client: reqwest::Client::new(),
            targets,
            probe_timeout,
        }
    }

    /// A service is `ready` when any probe gets an HTTP answer, and
    /// `has_open_api` when one of the conventional paths returns a 200
    /// with a JSON body.
    async fn probe(&self, target: &ServiceEntry) -> ServiceDescriptor {
        let base = target.base_url.trim_end_matches('/');
        let mut reachable = false;
        let mut document = None;

        for path in DOCUMENT_PATHS {
            let url = format!("{}{}", base, path);
            match self
                .client
                .get(&url)
                .timeout(self.probe_timeout)
                .send()
                .await
            {
                Ok(response) => {
                    reachable = true;
                    if !response.status().is_success() {
                        continue;
                    }
                    match response.json::<Value>().await {
                        Ok(doc) => {
                            debug!(service = %target.name, url = %url, "found interface document");
                            document = Some(doc);
                            break;
                        }
                        Err(e) => {
                            debug!(service = %target.name, url = %url, error = %e,
                                "document endpoint did not return JSON");
                        }
                    }
                }
                Err(e) => {
                    debug!(service = %target.name, url = %url, error = %e, "probe failed");
                }
            }
        }

        if !reachable {
            warn!(service = %target.name, base_url = %target.base_url, "backend unreachable");
        }

        ServiceDescriptor {
            name: target.name.clone(),
            namespace: target.namespace.clone(),
            base_url: target.base_url.clone(),
            has_open_api: document.is_some(),
            document,
            last_updated: Utc::now(),
            ready: reachable,
        }
    }
}

#[async_trait]
impl DiscoverySource for HttpDiscovery {
    async fn discover(&self) -> Vec<ServiceDescriptor> {
        join_all(self.targets.iter().map(|target| self.probe(target))).await
    }
}
