use crate::error::MeshError;
use crate::schema_generator;
use crate::{
    FederatedSchemaConfiguration, FieldMapping, FieldSignature, ServiceDescriptor, StatusInfo,
    TypeDef,
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Lifecycle of the federated mesh. `Building` is transient; `Degraded`
/// only happens when a rebuild fails with no prior successful build to
/// keep serving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshStatus {
    Empty,
    Building,
    Ready,
    Degraded,
}

impl MeshStatus {
    fn as_str(&self) -> &'static str {
        match self {
            MeshStatus::Empty => "empty",
            MeshStatus::Building => "building",
            MeshStatus::Ready => "ready",
            MeshStatus::Degraded => "degraded",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "lowercase", tag = "result")]
pub enum BuildOutcome {
    NeverBuilt,
    Success { at: DateTime<Utc> },
    Fallback { at: DateTime<Utc>, reason: String },
    Failure { at: DateTime<Utc>, reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthStatus {
    pub status: MeshStatus,
    pub services_count: usize,
    pub mesh_configured: bool,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct MeshStats {
    pub services_count: usize,
    pub services: Vec<String>,
    pub config_path: Option<String>,
    pub last_build: Option<DateTime<Utc>>,
}

/// Everything a reader may observe, replaced wholesale by a single atomic
/// pointer swap. In-flight resolutions complete against the snapshot they
/// started with.
#[derive(Debug)]
struct Published {
    configuration: Option<Arc<FederatedSchemaConfiguration>>,
    status: MeshStatus,
    services: Vec<String>,
    last_update: Option<DateTime<Utc>>,
    outcome: BuildOutcome,
}

/// Owns all mutable mesh state. One build lock serializes rebuilds;
/// reads never take it.
pub struct MeshManager {
    published: ArcSwap<Published>,
    /// Build lock. The guarded map is the last-applied service set, used
    /// only for change detection.
    tracked: Mutex<BTreeMap<String, ServiceDescriptor>>,
    build_in_progress: AtomicBool,
    config_path: Option<String>,
}

impl MeshManager {
    pub fn new(config_path: Option<String>) -> Self {
        MeshManager {
            published: ArcSwap::from_pointee(Published {
                configuration: None,
                status: MeshStatus::Empty,
                services: Vec::new(),
                last_update: None,
                outcome: BuildOutcome::NeverBuilt,
            }),
            tracked: Mutex::new(BTreeMap::new()),
            build_in_progress: AtomicBool::new(false),
            config_path,
        }
    }

    /// The currently-active configuration snapshot, if any. Lock-free.
    pub fn schema(&self) -> Option<Arc<FederatedSchemaConfiguration>> {
        self.published.load().configuration.clone()
    }

    pub fn is_building(&self) -> bool {
        self.build_in_progress.load(Ordering::SeqCst)
    }

    pub fn health_status(&self) -> HealthStatus {
        let published = self.published.load();
        let status = if self.is_building() {
            MeshStatus::Building
        } else {
            published.status
        };
        HealthStatus {
            status,
            services_count: published.services.len(),
            mesh_configured: published
                .configuration
                .as_ref()
                .is_some_and(|c| !c.fallback),
            last_update: published.last_update,
        }
    }

    pub fn stats(&self) -> MeshStats {
        let published = self.published.load();
        MeshStats {
            services_count: published.services.len(),
            services: published.services.clone(),
            config_path: self.config_path.clone(),
            last_build: published.last_update,
        }
    }

    /// Applies one discovery cycle. Returns `true` when the service set
    /// changed and a rebuild ran; `false` when backend reality is
    /// unchanged and the rebuild cost was skipped.
    pub async fn update_configuration(&self, services: Vec<ServiceDescriptor>) -> bool {
        let mut tracked = self.tracked.lock().await;

        let discovered: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let usable: BTreeMap<String, ServiceDescriptor> = services
            .into_iter()
            .filter(ServiceDescriptor::usable)
            .map(|s| (s.name.clone(), s))
            .collect();

        if self.published.load().configuration.is_some() && same_service_set(&tracked, &usable) {
            debug!("service set unchanged, skipping rebuild");
            return false;
        }

        self.run_build(&mut tracked, usable, discovered)
    }

    /// Operational trigger: rebuild unconditionally from the latest known
    /// service set, bypassing change detection.
    pub async fn force_rebuild(&self) -> bool {
        let mut tracked = self.tracked.lock().await;
        let usable = tracked.clone();
        let discovered = usable.keys().cloned().collect();
        self.run_build(&mut tracked, usable, discovered)
    }

    fn run_build(
        &self,
        tracked: &mut BTreeMap<String, ServiceDescriptor>,
        usable: BTreeMap<String, ServiceDescriptor>,
        discovered: Vec<String>,
    ) -> bool {
        self.build_in_progress.store(true, Ordering::SeqCst);
        let changed = self.build_and_publish(tracked, usable, discovered);
        self.build_in_progress.store(false, Ordering::SeqCst);
        changed
    }

    fn build_and_publish(
        &self,
        tracked: &mut BTreeMap<String, ServiceDescriptor>,
        usable: BTreeMap<String, ServiceDescriptor>,
        discovered: Vec<String>,
    ) -> bool {
        let now = Utc::now();

        if usable.is_empty() {
            warn!(
                discovered = discovered.len(),
                "no usable backend services, publishing fallback schema"
            );
            let config = FederatedSchemaConfiguration::fallback(
                MeshStatus::Empty.as_str(),
                discovered.clone(),
            );
            self.published.store(Arc::new(Published {
                configuration: Some(Arc::new(config)),
                status: MeshStatus::Empty,
                services: Vec::new(),
                last_update: Some(now),
                outcome: BuildOutcome::Fallback {
                    at: now,
                    reason: MeshError::DiscoveryUnavailable.to_string(),
                },
            }));
            tracked.clear();
            return true;
        }

        match self.merge(&usable) {
            Ok(configuration) => {
                let services: Vec<String> = usable.keys().cloned().collect();
                info!(
                    services = services.len(),
                    query_fields = configuration.query_fields.len(),
                    mutation_fields = configuration.mutation_fields.len(),
                    "publishing federated schema configuration"
                );
                self.published.store(Arc::new(Published {
                    configuration: Some(Arc::new(configuration)),
                    status: MeshStatus::Ready,
                    services: services.clone(),
                    last_update: Some(now),
                    outcome: BuildOutcome::Success { at: now },
                }));
                *tracked = usable;
                true
            }
            Err(e) => {
                let current = self.published.load_full();
                let has_prior = current
                    .configuration
                    .as_ref()
                    .is_some_and(|c| !c.fallback);
                if has_prior {
                    // Keep serving the previous configuration; tracked
                    // services keep reflecting that build.
                    error!(error = %e, "rebuild failed, retaining previous configuration");
                    self.published.store(Arc::new(Published {
                        configuration: current.configuration.clone(),
                        status: current.status,
                        services: current.services.clone(),
                        last_update: current.last_update,
                        outcome: BuildOutcome::Failure {
                            at: now,
                            reason: e.to_string(),
                        },
                    }));
                } else {
                    error!(error = %e, "first build failed, publishing fallback schema");
                    let config = FederatedSchemaConfiguration::fallback(
                        MeshStatus::Degraded.as_str(),
                        discovered,
                    );
                    self.published.store(Arc::new(Published {
                        configuration: Some(Arc::new(config)),
                        status: MeshStatus::Degraded,
                        services: Vec::new(),
                        last_update: Some(now),
                        outcome: BuildOutcome::Failure {
                            at: now,
                            reason: e.to_string(),
                        },
                    }));
                }
                true
            }
        }
    }

    /// Generates every service and merges the results into one brand-new
    /// configuration. Per-service problems exclude that service; a merge
    /// that produces nothing, or a name collision surviving prefixing, is
    /// a total failure.
    fn merge(
        &self,
        usable: &BTreeMap<String, ServiceDescriptor>,
    ) -> Result<FederatedSchemaConfiguration, MeshError> {
        let mut types: BTreeMap<String, TypeDef> = BTreeMap::new();
        let mut query_fields: BTreeMap<String, FieldSignature> = BTreeMap::new();
        let mut mutation_fields: BTreeMap<String, FieldSignature> = BTreeMap::new();
        let mut mappings: BTreeMap<String, FieldMapping> = BTreeMap::new();
        let mut contributed = 0usize;

        for (name, descriptor) in usable {
            let generated = match schema_generator::generate_for(descriptor) {
                Ok(generated) => generated,
                Err(e) => {
                    warn!(service = %name, error = %e, "excluding service from this build cycle");
                    continue;
                }
            };
            for err in &generated.errors {
                warn!(service = %name, error = %err, "skipped malformed document node");
            }

            for type_def in generated.type_defs {
                let type_name = type_def.name().to_string();
                if let Some(existing) = types.get(&type_name) {
                    if *existing != type_def {
                        return Err(MeshError::MergeFailure(format!(
                            "type name collision on '{}' (service '{}')",
                            type_name, name
                        )));
                    }
                    continue;
                }
                types.insert(type_name, type_def);
            }
            for signature in generated.query_fields {
                insert_field(&mut query_fields, signature, name)?;
            }
            for signature in generated.mutation_fields {
                insert_field(&mut mutation_fields, signature, name)?;
            }
            for mapping in generated.mappings {
                if mappings.insert(mapping.field_name.clone(), mapping).is_some() {
                    return Err(MeshError::MergeFailure(format!(
                        "field mapping collision (service '{}')",
                        name
                    )));
                }
            }
            contributed += 1;
        }

        if contributed == 0 {
            return Err(MeshError::MergeFailure(
                "every discovered service failed generation".to_string(),
            ));
        }

        // Builtin introspective fields ride along in every configuration;
        // their lowercase names cannot collide with prefixed service fields.
        for signature in FederatedSchemaConfiguration::builtin_signatures() {
            query_fields.insert(signature.name.clone(), signature);
        }

        Ok(FederatedSchemaConfiguration {
            types,
            query_fields,
            mutation_fields,
            mappings,
            status_info: StatusInfo {
                status: MeshStatus::Ready.as_str().to_string(),
                services: usable.keys().cloned().collect(),
            },
            fallback: false,
        })
    }
}

fn insert_field(
    fields: &mut BTreeMap<String, FieldSignature>,
    signature: FieldSignature,
    service: &str,
) -> Result<(), MeshError> {
    let field_name = signature.name.clone();
    if fields.insert(field_name.clone(), signature).is_some() {
        return Err(MeshError::MergeFailure(format!(
            "field name collision on '{}' (service '{}')",
            field_name, service
        )));
    }
    Ok(())
}

/// A change is any addition, removal, URL change, or structural document
/// change in the usable service set.
fn same_service_set(
    tracked: &BTreeMap<String, ServiceDescriptor>,
    usable: &BTreeMap<String, ServiceDescriptor>,
) -> bool {
    if tracked.len() != usable.len() {
        return false;
    }
    usable.iter().all(|(name, incoming)| {
        tracked.get(name).is_some_and(|current| {
            current.base_url == incoming.base_url && current.document == incoming.document
        })
    })
}
