//! Pod Orchestrator
//!
//! Coordinates every pod workflow:
//! - Pod creation and refresh from discovery
//! - Compose on one pod or across the fleet
//! - Decompose-before-delete of machines and pods
//!
//! Store work runs on the blocking pool through [`Store::defer`]; remote calls
//! run between transactions and only collect outcomes.

use super::commissioning::StoreCommissioning;
use super::compose::{ComposeRequest, ValidatedCompose};
use super::delete::{machine_power_parameters, DeletePodWorkflow, DeletedPod};
use super::events::FleetEvent;
use super::metrics::ControlPlaneMetrics;
use super::routability;
use crate::domain::ports::{
    Capability, ClientResolverRef, CommissioningSchedulerRef, DiscoveredPod, PowerParameters,
};
use crate::error::{Error, Result};
use crate::ledger;
use crate::model::names::unique_petname;
use crate::model::{Bmc, BmcId, CreationType, Machine, NodeId, RackController};
use crate::power::{PowerDriverRegistryRef, SettingScope};
use crate::reconcile::{admission, CreateOptions, PodReconciler, PodUsage, SyncReport};
use crate::rpc;
use crate::store::{Store, Tables};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

// =============================================================================
// Orchestrator Configuration
// =============================================================================

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Budget for client acquisition plus the compose call
    pub compose_timeout: Duration,
    /// Per-rack budget for pod discovery
    pub discovery_timeout: Duration,
    pub default_pool_name: String,
    pub default_zone_name: String,
    /// Recorded as the initiator of automatic commissioning
    pub commissioning_user: String,
    /// Capacity of the fleet event channel
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compose_timeout: Duration::from_secs(120),
            discovery_timeout: Duration::from_secs(60),
            default_pool_name: crate::model::pool::DEFAULT_POOL_NAME.to_string(),
            default_zone_name: crate::model::pool::DEFAULT_ZONE_NAME.to_string(),
            commissioning_user: "admin".to_string(),
            event_capacity: 1024,
        }
    }
}

impl OrchestratorConfig {
    /// Empty store seeded with the configured default pool and zone
    pub fn new_store(&self) -> Arc<Store> {
        Store::with_tables(Tables::new(&self.default_pool_name, &self.default_zone_name))
    }
}

// =============================================================================
// Requests and Summaries
// =============================================================================

/// Register a pod by its driver type and parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub power_type: String,
    #[serde(default)]
    pub power_parameters: PowerParameters,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub cpu_over_commit_ratio: Option<f64>,
    #[serde(default)]
    pub memory_over_commit_ratio: Option<f64>,
}

/// Changes to an existing pod; `None` keeps the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub power_parameters: Option<PowerParameters>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub cpu_over_commit_ratio: Option<f64>,
    #[serde(default)]
    pub memory_over_commit_ratio: Option<f64>,
}

/// How a composed machine is enlisted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeOptions {
    pub skip_commissioning: bool,
    pub creation_type: CreationType,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            skip_commissioning: false,
            creation_type: CreationType::Manual,
        }
    }
}

/// Pod record with its capacity usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodSummary {
    pub pod: Bmc,
    pub usage: PodUsage,
    pub machine_count: usize,
    pub accessible: bool,
}

impl PodSummary {
    fn build(tables: &Tables, pod: BmcId) -> Result<Self> {
        let view = tables.pod(pod)?;
        Ok(Self {
            pod: view.record().clone(),
            usage: admission::pod_usage(tables, pod),
            machine_count: tables.machines_of(pod).count(),
            accessible: routability::is_accessible(tables, pod)?,
        })
    }
}

/// Orchestrator status summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub pod_count: usize,
    pub machine_count: usize,
    pub rack_count: usize,
    pub connected_racks: usize,
}

/// Everything a compose call needs from the store
struct ComposePlan {
    validated: ValidatedCompose,
    pod_name: String,
    power_type: String,
    power_parameters: PowerParameters,
    client_identifiers: Vec<String>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs the pod workflows against the store and the rack controllers
pub struct PodOrchestrator {
    config: OrchestratorConfig,
    store: Arc<Store>,
    resolver: ClientResolverRef,
    drivers: PowerDriverRegistryRef,
    commissioning: CommissioningSchedulerRef,
    metrics: ControlPlaneMetrics,
    event_sender: broadcast::Sender<FleetEvent>,
}

impl PodOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<Store>,
        resolver: ClientResolverRef,
        drivers: PowerDriverRegistryRef,
        commissioning: CommissioningSchedulerRef,
    ) -> Result<Arc<Self>> {
        let (event_sender, _) = broadcast::channel(config.event_capacity.max(1));
        Ok(Arc::new(Self {
            config,
            store,
            resolver,
            drivers,
            commissioning,
            metrics: ControlPlaneMetrics::new()?,
            event_sender,
        }))
    }

    /// Orchestrator whose commissioning only marks machines in the store
    pub fn with_store_commissioning(
        config: OrchestratorConfig,
        store: Arc<Store>,
        resolver: ClientResolverRef,
        drivers: PowerDriverRegistryRef,
    ) -> Result<Arc<Self>> {
        let commissioning = StoreCommissioning::new(Arc::clone(&store));
        Self::new(config, store, resolver, drivers, commissioning)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn metrics(&self) -> &ControlPlaneMetrics {
        &self.metrics
    }

    /// Subscribe to fleet events
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.event_sender.subscribe()
    }

    fn emit(&self, event: FleetEvent) {
        let _ = self.event_sender.send(event);
    }

    async fn start_commissioning(&self, machine: &Machine) {
        if let Err(e) = self
            .commissioning
            .start_commissioning(machine, &self.config.commissioning_user)
            .await
        {
            warn!("{}: unable to start commissioning: {}", machine.hostname, e);
        }
    }

    /// Metrics, events and commissioning for a committed sync
    async fn publish_sync(&self, pod: BmcId, report: &SyncReport) -> Result<()> {
        self.metrics.record_sync(report);

        let nodes = report.created.clone();
        let created: Vec<Machine> = self
            .store
            .defer_read(move |tables| {
                Ok(nodes
                    .iter()
                    .filter_map(|node| tables.machine(*node).ok().cloned())
                    .collect())
            })
            .await?;
        for machine in &created {
            self.emit(FleetEvent::MachineDiscovered {
                pod_id: pod,
                node_id: machine.id,
                hostname: machine.hostname.clone(),
            });
        }
        for node in &report.moved {
            self.emit(FleetEvent::MachineMoved {
                pod_id: pod,
                node_id: *node,
            });
        }
        for removed in &report.removed {
            self.emit(FleetEvent::MachineRemoved {
                pod_id: Some(pod),
                node_id: removed.id,
                hostname: removed.hostname.clone(),
            });
        }
        self.emit(FleetEvent::PodSynced {
            pod_id: pod,
            created: report.created.len(),
            updated: report.updated.len(),
            removed: report.removed.len(),
        });

        for machine in created
            .iter()
            .filter(|machine| report.commission.contains(&machine.id))
        {
            self.start_commissioning(machine).await;
        }
        Ok(())
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Discover a pod through every connected rack. Returns the snapshot and
    /// the racks that did and did not reach the pod.
    async fn discover(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
    ) -> Result<(DiscoveredPod, Vec<String>, Vec<String>)> {
        let outcome = rpc::discover_pod(
            &*self.resolver,
            power_type,
            parameters,
            self.config.discovery_timeout,
        )
        .await;
        let routable = outcome.routable();
        let non_routable = outcome.non_routable();
        match outcome.into_best() {
            Ok(discovered) => Ok((discovered, routable, non_routable)),
            Err(e) => {
                self.metrics.record_sync_failure();
                Err(e)
            }
        }
    }

    /// Split and check the parameters of a pod driver
    fn pod_power(
        &self,
        power_type: &str,
        parameters: &PowerParameters,
    ) -> Result<(PowerParameters, Option<IpAddr>)> {
        if !self
            .drivers
            .get(power_type)
            .map_or(false, |driver| driver.is_pod_driver())
        {
            return Err(Error::field(
                "type",
                format!(
                    "Select a valid choice. {} is not one of the available choices.",
                    power_type
                ),
            ));
        }
        self.drivers
            .validate(power_type, parameters, SettingScope::Bmc)?;
        let (bmc_parameters, _) = self.drivers.scope_power_parameters(power_type, parameters);
        let ip = self.drivers.extract_ip_address(power_type, &bmc_parameters);
        Ok((bmc_parameters, ip))
    }

    /// Register a new pod from a successful discovery
    pub async fn create_pod(&self, request: PodRequest) -> Result<PodSummary> {
        let (parameters, ip) = self.pod_power(&request.power_type, &request.power_parameters)?;
        let power_type = request.power_type.clone();

        {
            let power_type = power_type.clone();
            let parameters = parameters.clone();
            let request = request.clone();
            self.store
                .defer_read(move |tables| {
                    if tables
                        .find_bmc(&power_type, &parameters, ip)
                        .map_or(false, Bmc::is_pod)
                    {
                        return Err(Error::PodExists);
                    }
                    if let Some(name) = &request.name {
                        if tables.pod_name_taken(name, None) {
                            return Err(Error::field(
                                "name",
                                format!("Pod with name \"{}\" already exists", name),
                            ));
                        }
                    }
                    ledger::resolve_pool(tables, request.pool.as_deref())?;
                    ledger::resolve_zone(tables, request.zone.as_deref())?;
                    Ok(())
                })
                .await?;
        }

        let (discovered, routable, non_routable) = self.discover(&power_type, &parameters).await?;

        let (pod, name, report) = self
            .store
            .defer(move |tables| {
                let pool = ledger::resolve_pool(tables, request.pool.as_deref())?;
                let zone = ledger::resolve_zone(tables, request.zone.as_deref())?;
                let mut bmc = match tables.find_bmc(&power_type, &parameters, ip) {
                    Some(existing) if existing.is_pod() => return Err(Error::PodExists),
                    Some(existing) => {
                        debug!("Taking over BMC {} as a pod", existing.id);
                        existing.clone()
                    }
                    None => Bmc::new_bmc(tables.new_bmc_id(), power_type, parameters, ip),
                };
                bmc.name = request.name.unwrap_or_else(|| {
                    unique_petname(|candidate| tables.pod_name_taken(candidate, None))
                });
                bmc.convert_to_pod(pool, zone);
                {
                    let mut view = bmc
                        .as_pod_mut()
                        .ok_or_else(|| Error::Internal("BMC conversion to pod failed".into()))?;
                    view.set_pool(pool);
                    view.set_zone(zone);
                    view.set_tags(request.tags);
                    view.set_over_commit_ratios(
                        request.cpu_over_commit_ratio.unwrap_or(1.0),
                        request.memory_over_commit_ratio.unwrap_or(1.0),
                    )?;
                }
                let name = bmc.name.clone();
                let pod = tables.upsert_bmc(bmc)?;
                let report = PodReconciler::new(tables, pod)?.sync(&discovered)?;
                routability::update_routable_racks(tables, pod, &routable, &non_routable)?;
                Ok((pod, name, report))
            })
            .await?;

        info!("{}: pod created with {} machines", name, report.created.len());
        self.emit(FleetEvent::PodCreated {
            pod_id: pod,
            name,
        });
        self.publish_sync(pod, &report).await?;
        self.pod(pod).await
    }

    /// Re-run discovery and sync the pod with it
    pub async fn refresh_pod(&self, pod: BmcId) -> Result<PodSummary> {
        let (power_type, parameters) = self
            .store
            .defer_read(move |tables| {
                let view = tables.pod(pod)?;
                Ok((view.power_type.clone(), view.power_parameters.clone()))
            })
            .await?;

        let (discovered, routable, non_routable) = self.discover(&power_type, &parameters).await?;
        let report = self
            .store
            .defer(move |tables| {
                let report = PodReconciler::new(tables, pod)?.sync(&discovered)?;
                routability::update_routable_racks(tables, pod, &routable, &non_routable)?;
                Ok(report)
            })
            .await;
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.metrics.record_sync_failure();
                return Err(e);
            }
        };

        if report.is_noop() {
            debug!("Pod {} unchanged by refresh", pod);
        }
        self.publish_sync(pod, &report).await?;
        self.pod(pod).await
    }

    /// Change a pod's settings, then refresh it
    pub async fn update_pod(&self, pod: BmcId, update: PodUpdate) -> Result<PodSummary> {
        let power_type = self
            .store
            .defer_read(move |tables| tables.pod(pod).map(|view| view.power_type.clone()))
            .await?;
        let power = update
            .power_parameters
            .as_ref()
            .map(|parameters| self.pod_power(&power_type, parameters))
            .transpose()?;

        self.store
            .defer(move |tables| {
                let pool = update
                    .pool
                    .as_deref()
                    .map(|name| ledger::resolve_pool(tables, Some(name)))
                    .transpose()?;
                let zone = update
                    .zone
                    .as_deref()
                    .map(|name| ledger::resolve_zone(tables, Some(name)))
                    .transpose()?;
                if let Some(name) = &update.name {
                    if tables.pod_name_taken(name, Some(pod)) {
                        return Err(Error::field(
                            "name",
                            format!("Pod with name \"{}\" already exists", name),
                        ));
                    }
                }
                if let Some((parameters, ip)) = &power {
                    if let Some(other) = tables.find_bmc(&power_type, parameters, *ip) {
                        if other.id != pod {
                            return Err(Error::PodExists);
                        }
                    }
                }

                let mut view = tables.pod_mut(pod)?;
                if let Some(name) = update.name {
                    view.set_name(name);
                }
                if let Some(tags) = update.tags {
                    view.set_tags(tags);
                }
                if let Some(pool) = pool {
                    view.set_pool(pool);
                }
                if let Some(zone) = zone {
                    view.set_zone(zone);
                }
                let cpu = update
                    .cpu_over_commit_ratio
                    .unwrap_or(view.cpu_over_commit_ratio);
                let memory = update
                    .memory_over_commit_ratio
                    .unwrap_or(view.memory_over_commit_ratio);
                view.set_over_commit_ratios(cpu, memory)?;
                if let Some((parameters, ip)) = power {
                    view.set_power(parameters, ip);
                }
                Ok(())
            })
            .await?;

        info!("Pod {} updated", pod);
        self.refresh_pod(pod).await
    }

    // =========================================================================
    // Compose
    // =========================================================================

    /// Compose a machine on `pod`
    pub async fn compose(
        &self,
        pod: BmcId,
        request: &ComposeRequest,
        options: ComposeOptions,
    ) -> Result<Machine> {
        let result = self.compose_on_pod(pod, request, options).await;
        self.metrics.record_compose(result.is_ok());
        result
    }

    async fn compose_on_pod(
        &self,
        pod: BmcId,
        request: &ComposeRequest,
        options: ComposeOptions,
    ) -> Result<Machine> {
        let connected = self.resolver.connected_identifiers();
        let request = request.clone();
        let plan = self
            .store
            .defer_read(move |tables| {
                let view = tables.pod(pod)?;
                if !view.supports(Capability::Composable) {
                    return Err(Error::field("pod", "Pod does not support composability."));
                }
                let validated = request.validate(tables, &view)?;
                admission::admit(tables, pod, validated.machine.cores, validated.machine.memory)?;
                Ok(ComposePlan {
                    validated,
                    pod_name: view.name.clone(),
                    power_type: view.power_type.clone(),
                    power_parameters: view.power_parameters.clone(),
                    client_identifiers: routability::client_identifiers(tables, pod, &connected)?,
                })
            })
            .await?;

        let budget = self.config.compose_timeout;
        let call = async {
            let client = self
                .resolver
                .get_client(&plan.client_identifiers)
                .await
                .ok_or_else(|| Error::NoConnectionsAvailable {
                    power_type: plan.power_type.clone(),
                })?;
            rpc::compose_machine(
                &*client,
                &plan.power_type,
                &plan.power_parameters,
                &plan.validated.machine,
                pod.0,
                &plan.pod_name,
            )
            .await
        };
        let (discovered, hints) = tokio::time::timeout(budget, call)
            .await
            .map_err(|_| Error::DriverTimeout {
                operation: "compose a machine".to_string(),
                power_type: plan.power_type.clone(),
                seconds: budget.as_secs(),
            })??;

        let create = CreateOptions {
            skip_commissioning: options.skip_commissioning,
            creation_type: options.creation_type,
            pool: plan.validated.pool,
            zone: plan.validated.zone,
        };
        let machine = self
            .store
            .defer(move |tables| {
                let node = PodReconciler::new(tables, pod)?.create_machine(&discovered, &create)?;
                tables.pod_mut(pod)?.set_hints(hints);
                Ok(tables.machine(node)?.clone())
            })
            .await?;

        info!("{}: composed machine {}", plan.pod_name, machine.hostname);
        self.emit(FleetEvent::MachineComposed {
            pod_id: pod,
            node_id: machine.id,
            hostname: machine.hostname.clone(),
        });
        if !options.skip_commissioning {
            self.start_commissioning(&machine).await;
        }
        Ok(machine)
    }

    /// Compose on the first pod able to take the request.
    ///
    /// Pods without over-commit are tried before pods with it. Only composable
    /// pods the request validates against are candidates; `pods` narrows them
    /// further.
    pub async fn compose_for_pods(
        &self,
        request: &ComposeRequest,
        pods: Option<&[BmcId]>,
    ) -> Result<Machine> {
        let candidates = {
            let request = request.clone();
            let allowed = pods.map(<[BmcId]>::to_vec);
            self.store
                .defer_read(move |tables| {
                    let mut plain = Vec::new();
                    let mut over_commit = Vec::new();
                    for pod in tables.pods() {
                        if allowed.as_ref().map_or(false, |ids| !ids.contains(&pod.id)) {
                            continue;
                        }
                        if !pod.supports(Capability::Composable)
                            || request.validate(tables, &pod).is_err()
                        {
                            continue;
                        }
                        if pod.supports(Capability::OverCommit) {
                            over_commit.push(pod.id);
                        } else {
                            plain.push(pod.id);
                        }
                    }
                    plain.extend(over_commit);
                    Ok(plain)
                })
                .await?
        };
        if candidates.is_empty() {
            return Err(Error::NoMatchingPods);
        }

        let options = ComposeOptions {
            skip_commissioning: true,
            creation_type: CreationType::Dynamic,
        };
        let mut last_error = None;
        for pod in candidates {
            match self.compose(pod, request, options).await {
                Ok(machine) => return Ok(machine),
                Err(e) => {
                    warn!("Unable to compose on pod {}: {}", pod, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(Error::NoMatchingPods))
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Decompose the pod's machines, then delete them and the pod
    pub async fn delete_pod(&self, pod: BmcId) -> Result<DeletedPod> {
        let deleted = DeletePodWorkflow::new(
            Arc::clone(&self.store),
            Arc::clone(&self.resolver),
            pod,
            self.config.compose_timeout,
        )
        .with_metrics(self.metrics.clone())
        .run()
        .await?;

        self.metrics.pods_deleted.inc();
        self.metrics
            .machines_removed
            .inc_by(deleted.removed.len() as u64);
        for machine in &deleted.removed {
            self.emit(FleetEvent::MachineRemoved {
                pod_id: Some(pod),
                node_id: machine.id,
                hostname: machine.hostname.clone(),
            });
        }
        self.emit(FleetEvent::PodDeleted {
            pod_id: pod,
            name: deleted.pod_name.clone(),
        });
        Ok(deleted)
    }

    /// Delete a machine, decomposing it first when a pod composed it
    pub async fn delete_machine(&self, node: NodeId) -> Result<Machine> {
        let connected = self.resolver.connected_identifiers();
        let target = self
            .store
            .defer_read(move |tables| {
                let machine = tables.machine(node)?;
                let Some(bmc) = machine.bmc_id else {
                    return Ok(None);
                };
                let owner = tables.bmc(bmc)?;
                if !owner.is_pod() || machine.creation_type == CreationType::PreExisting {
                    return Ok(None);
                }
                Ok(Some((
                    bmc,
                    owner.name.clone(),
                    owner.power_type.clone(),
                    machine_power_parameters(tables, node)?,
                    routability::client_identifiers(tables, bmc, &connected)?,
                )))
            })
            .await?;

        let mut hints = None;
        if let Some((pod, pod_name, power_type, parameters, identifiers)) = &target {
            let budget = self.config.compose_timeout;
            let call = async {
                let client = self.resolver.get_client(identifiers).await.ok_or_else(|| {
                    Error::NoConnectionsAvailable {
                        power_type: power_type.clone(),
                    }
                })?;
                let result =
                    rpc::decompose_machine(&*client, power_type, parameters, pod.0, pod_name).await;
                self.metrics.record_decompose(result.is_ok());
                result
            };
            hints = Some((
                *pod,
                tokio::time::timeout(budget, call)
                    .await
                    .map_err(|_| Error::DriverTimeout {
                        operation: "decompose a machine".to_string(),
                        power_type: power_type.clone(),
                        seconds: budget.as_secs(),
                    })??,
            ));
        }

        let machine = self
            .store
            .defer(move |tables| {
                if let Some((pod, hints)) = hints {
                    tables.pod_mut(pod)?.set_hints(hints);
                }
                tables.delete_machine(node)
            })
            .await?;

        info!("{}: machine deleted", machine.hostname);
        self.metrics.machines_removed.inc();
        self.emit(FleetEvent::MachineRemoved {
            pod_id: machine.bmc_id,
            node_id: machine.id,
            hostname: machine.hostname.clone(),
        });
        Ok(machine)
    }

    // =========================================================================
    // Rack Controllers
    // =========================================================================

    /// Record a rack controller and the subnets it is attached to
    pub async fn register_rack(&self, rack: RackController) -> Result<()> {
        info!("Registering rack controller {}", rack.system_id);
        self.store
            .defer(move |tables| {
                tables.upsert_rack(rack);
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn pod(&self, pod: BmcId) -> Result<PodSummary> {
        self.store
            .defer_read(move |tables| PodSummary::build(tables, pod))
            .await
    }

    pub async fn pods(&self) -> Result<Vec<PodSummary>> {
        self.store
            .defer_read(|tables| {
                let ids: Vec<BmcId> = tables.pods().map(|pod| pod.id).collect();
                ids.into_iter()
                    .map(|pod| PodSummary::build(tables, pod))
                    .collect::<Result<Vec<_>>>()
            })
            .await
    }

    pub async fn machine(&self, node: NodeId) -> Result<Machine> {
        self.store
            .defer_read(move |tables| tables.machine(node).cloned())
            .await
    }

    pub async fn machines(&self) -> Result<Vec<Machine>> {
        self.store
            .defer_read(|tables| Ok(tables.machines().cloned().collect::<Vec<_>>()))
            .await
    }

    pub async fn racks(&self) -> Result<Vec<RackController>> {
        self.store
            .defer_read(|tables| Ok(tables.racks().cloned().collect::<Vec<_>>()))
            .await
    }

    /// Number of rack controllers with a live connection
    pub fn connected_racks(&self) -> usize {
        self.resolver.connected_identifiers().len()
    }

    /// Get overall orchestrator status
    pub async fn status(&self) -> Result<OrchestratorStatus> {
        let (pod_count, machine_count, rack_count) = self
            .store
            .defer_read(|tables| {
                Ok((
                    tables.pods().count(),
                    tables.machines().count(),
                    tables.racks().count(),
                ))
            })
            .await?;
        Ok(OrchestratorStatus {
            pod_count,
            machine_count,
            rack_count,
            connected_racks: self.connected_racks(),
        })
    }
}
