//! Pod Deletion Workflow
//!
//! Deleting a pod decomposes its machines first. The workflow moves through
//! three phases, each producing plain data for the next:
//!
//! - Gathering (read): split the pod's machines, by id, into pre-existing
//!   ones and ones to decompose, with their power parameters and the racks
//!   able to reach the pod.
//! - Decomposing (no store access): one decompose call per machine, each
//!   through a freshly resolved client. The first failure stops further
//!   calls, but every machine still counts as decomposed.
//! - Finalizing (transaction): detach and delete the decomposed machines,
//!   delete the pre-existing ones, then remove the pod row.

use super::metrics::ControlPlaneMetrics;
use super::routability;
use crate::domain::ports::{ClientResolver, PowerParameters};
use crate::error::{Error, Result};
use crate::model::{BmcId, CreationType, NodeId};
use crate::reconcile::RemovedMachine;
use crate::rpc;
use crate::store::{Store, Tables};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Power parameters the driver needs to address one machine
pub(crate) fn machine_power_parameters(tables: &Tables, node: NodeId) -> Result<PowerParameters> {
    let machine = tables.machine(node)?;
    let mut parameters = match machine.bmc_id {
        Some(bmc) => tables.bmc(bmc)?.power_parameters.clone(),
        None => PowerParameters::new(),
    };
    parameters.extend(
        machine
            .instance_power_parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    Ok(parameters)
}

// =============================================================================
// Phase Outputs
// =============================================================================

/// Machine to be torn down by the pod driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposeTarget {
    pub node: NodeId,
    pub hostname: String,
    pub power_parameters: PowerParameters,
}

/// Output of the gathering phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatheredPod {
    pub pod_id: BmcId,
    pub pod_name: String,
    pub power_type: String,
    pub client_identifiers: Vec<String>,
    /// Ordered by id
    pub to_decompose: Vec<DecomposeTarget>,
    pub pre_existing: Vec<NodeId>,
}

/// Output of the decomposing phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedPod {
    pub pod_id: BmcId,
    pub decomposed: Vec<NodeId>,
    pub pre_existing: Vec<NodeId>,
    /// Decompose calls actually issued
    pub calls: usize,
    /// Failure that stopped the remaining calls
    pub failure: Option<String>,
}

/// What the workflow removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedPod {
    pub pod_id: BmcId,
    pub pod_name: String,
    pub removed: Vec<RemovedMachine>,
    pub decompose_calls: usize,
    pub decompose_failure: Option<String>,
}

/// Current phase of a [`DeletePodWorkflow`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeletePhase {
    Gathering,
    Decomposing(GatheredPod),
    Finalizing(DecomposedPod),
    Done(DeletedPod),
}

impl DeletePhase {
    pub fn name(&self) -> &'static str {
        match self {
            DeletePhase::Gathering => "gathering",
            DeletePhase::Decomposing(_) => "decomposing",
            DeletePhase::Finalizing(_) => "finalizing",
            DeletePhase::Done(_) => "done",
        }
    }
}

// =============================================================================
// Phases
// =============================================================================

/// Gathering phase
pub fn gather(tables: &Tables, pod: BmcId, connected: &[String]) -> Result<GatheredPod> {
    let view = tables.pod(pod)?;
    let client_identifiers = routability::client_identifiers(tables, pod, connected)?;

    let mut machines: Vec<_> = tables.machines_of(pod).collect();
    machines.sort_by_key(|machine| machine.id);

    let mut to_decompose = Vec::new();
    let mut pre_existing = Vec::new();
    for machine in machines {
        if machine.creation_type == CreationType::PreExisting {
            pre_existing.push(machine.id);
        } else {
            to_decompose.push(DecomposeTarget {
                node: machine.id,
                hostname: machine.hostname.clone(),
                power_parameters: machine_power_parameters(tables, machine.id)?,
            });
        }
    }

    Ok(GatheredPod {
        pod_id: pod,
        pod_name: view.name.clone(),
        power_type: view.power_type.clone(),
        client_identifiers,
        to_decompose,
        pre_existing,
    })
}

/// Decomposing phase
pub async fn decompose(
    resolver: &dyn ClientResolver,
    gathered: &GatheredPod,
    client_timeout: Duration,
    metrics: Option<&ControlPlaneMetrics>,
) -> DecomposedPod {
    let mut outcome = DecomposedPod {
        pod_id: gathered.pod_id,
        decomposed: Vec::with_capacity(gathered.to_decompose.len()),
        pre_existing: gathered.pre_existing.clone(),
        calls: 0,
        failure: None,
    };

    let mut targets = gathered.to_decompose.iter();
    for target in targets.by_ref() {
        outcome.decomposed.push(target.node);

        // The connection used for the previous machine may be gone
        let client = tokio::time::timeout(
            client_timeout,
            resolver.get_client(&gathered.client_identifiers),
        )
        .await
        .ok()
        .flatten();
        let result = match client {
            Some(client) => {
                outcome.calls += 1;
                rpc::decompose_machine(
                    &*client,
                    &gathered.power_type,
                    &target.power_parameters,
                    gathered.pod_id.0,
                    &gathered.pod_name,
                )
                .await
                .map(|_| ())
            }
            None => Err(Error::NoConnectionsAvailable {
                power_type: gathered.power_type.clone(),
            }),
        };

        if let Some(metrics) = metrics {
            if client_was_called(&result) {
                metrics.record_decompose(result.is_ok());
            }
        }
        if let Err(err) = result {
            warn!(
                "{}: unable to decompose {}, skipping decompose of the remaining machines: {}",
                gathered.pod_name, target.hostname, err
            );
            outcome.failure = Some(err.to_string());
            break;
        }
        debug!("{}: decomposed {}", gathered.pod_name, target.hostname);
    }
    outcome.decomposed.extend(targets.map(|target| target.node));
    outcome
}

fn client_was_called(result: &Result<()>) -> bool {
    !matches!(result, Err(Error::NoConnectionsAvailable { .. }))
}

/// Finalizing phase
pub fn finalize(tables: &mut Tables, decomposed: &DecomposedPod) -> Result<DeletedPod> {
    let pod_name = tables.pod(decomposed.pod_id)?.name.clone();
    let mut removed = Vec::new();
    for node in &decomposed.decomposed {
        // Detached first so removing the row never triggers another decompose
        tables.machine_mut(*node)?.bmc_id = None;
        let machine = tables.delete_machine(*node)?;
        removed.push(RemovedMachine {
            id: machine.id,
            hostname: machine.hostname,
        });
    }
    for node in &decomposed.pre_existing {
        let machine = tables.delete_machine(*node)?;
        removed.push(RemovedMachine {
            id: machine.id,
            hostname: machine.hostname,
        });
    }
    tables.remove_pod_unchecked(decomposed.pod_id)?;

    Ok(DeletedPod {
        pod_id: decomposed.pod_id,
        pod_name,
        removed,
        decompose_calls: decomposed.calls,
        decompose_failure: decomposed.failure.clone(),
    })
}

// =============================================================================
// Workflow
// =============================================================================

/// Asynchronous pod deletion
pub struct DeletePodWorkflow {
    store: Arc<Store>,
    resolver: Arc<dyn ClientResolver>,
    metrics: Option<ControlPlaneMetrics>,
    client_timeout: Duration,
    pod: BmcId,
    phase: DeletePhase,
}

impl DeletePodWorkflow {
    pub fn new(
        store: Arc<Store>,
        resolver: Arc<dyn ClientResolver>,
        pod: BmcId,
        client_timeout: Duration,
    ) -> Self {
        Self {
            store,
            resolver,
            metrics: None,
            client_timeout,
            pod,
            phase: DeletePhase::Gathering,
        }
    }

    pub fn with_metrics(mut self, metrics: ControlPlaneMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> &DeletePhase {
        &self.phase
    }

    /// Run the next phase. Errors leave the workflow in its current phase.
    pub async fn step(&mut self) -> Result<()> {
        let next = match &self.phase {
            DeletePhase::Gathering => {
                let pod = self.pod;
                let connected = self.resolver.connected_identifiers();
                let gathered = self
                    .store
                    .defer_read(move |tables| gather(tables, pod, &connected))
                    .await?;
                info!(
                    "{}: deleting pod with {} machines to decompose and {} pre-existing",
                    gathered.pod_name,
                    gathered.to_decompose.len(),
                    gathered.pre_existing.len()
                );
                DeletePhase::Decomposing(gathered)
            }
            DeletePhase::Decomposing(gathered) => DeletePhase::Finalizing(
                decompose(
                    &*self.resolver,
                    gathered,
                    self.client_timeout,
                    self.metrics.as_ref(),
                )
                .await,
            ),
            DeletePhase::Finalizing(decomposed) => {
                let decomposed = decomposed.clone();
                let deleted = self
                    .store
                    .defer(move |tables| finalize(tables, &decomposed))
                    .await?;
                info!(
                    "{}: pod deleted along with {} machines",
                    deleted.pod_name,
                    deleted.removed.len()
                );
                DeletePhase::Done(deleted)
            }
            DeletePhase::Done(_) => return Ok(()),
        };
        debug!("Pod {} delete: {} -> {}", self.pod, self.phase.name(), next.name());
        self.phase = next;
        Ok(())
    }

    /// Drive the workflow to completion
    pub async fn run(mut self) -> Result<DeletedPod> {
        loop {
            if let DeletePhase::Done(deleted) = self.phase {
                return Ok(deleted);
            }
            self.step().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::backends::{SimulatedPod, SimulatedRack};
    use crate::model::{Bmc, Machine, RackController};
    use crate::rpc::ClientRegistry;

    const ADDRESS: &str = "qemu+ssh://10.0.0.5/system";

    fn setup(pod_backend: &Arc<SimulatedPod>) -> (Arc<Store>, BmcId, Vec<NodeId>) {
        let store = Store::new();
        let (pod, nodes) = store
            .transaction(|tables| {
                tables.upsert_rack(RackController {
                    system_id: "rack-a".into(),
                    hostname: "rack-a".into(),
                    subnets: vec!["10.0.0.0/24".parse().unwrap()],
                });
                let pod = tables.new_bmc_id();
                tables.upsert_bmc(Bmc::new_pod(
                    pod,
                    "kvm",
                    "virsh",
                    PowerParameters::from([("power_address".into(), ADDRESS.into())]),
                    Some("10.0.0.5".parse().unwrap()),
                    tables.default_pool_id(),
                    tables.default_zone_id(),
                ))?;
                let mut nodes = Vec::new();
                for (name, creation_type) in [
                    ("vm-one", CreationType::Dynamic),
                    ("vm-two", CreationType::Manual),
                    ("vm-three", CreationType::Dynamic),
                    ("legacy", CreationType::PreExisting),
                ] {
                    pod_backend.add_machine(name, 1, 1024, vec![]);
                    let node = tables.new_node_id();
                    let mut machine = Machine::new(node, name, "amd64/generic");
                    machine.bmc_id = Some(pod);
                    machine.creation_type = creation_type;
                    machine.instance_power_parameters =
                        PowerParameters::from([("power_id".into(), name.into())]);
                    tables.insert_machine(machine)?;
                    nodes.push(node);
                }
                Ok((pod, nodes))
            })
            .unwrap();
        (store, pod, nodes)
    }

    #[test]
    fn test_gather_splits_machines() {
        let backend = SimulatedPod::new(ADDRESS, 8, 16384);
        let (store, pod, nodes) = setup(&backend);
        let gathered = store
            .read(|tables| gather(tables, pod, &["rack-a".to_string()]))
            .unwrap();
        assert_eq!(gathered.client_identifiers, vec!["rack-a"]);
        assert_eq!(gathered.pre_existing, vec![nodes[3]]);
        let targets: Vec<_> = gathered.to_decompose.iter().map(|t| t.node).collect();
        assert_eq!(targets, nodes[..3].to_vec());
        assert_eq!(gathered.to_decompose[0].power_parameters["power_id"], "vm-one");
        assert_eq!(gathered.to_decompose[0].power_parameters["power_address"], ADDRESS);
    }

    #[tokio::test]
    async fn test_failure_stops_calls_but_deletes_everything() {
        let backend = SimulatedPod::new(ADDRESS, 8, 16384);
        backend.fail_decompose("vm-two");
        let (store, pod, _) = setup(&backend);
        let rack = SimulatedRack::new("rack-a");
        rack.attach(Arc::clone(&backend));
        let registry = ClientRegistry::new();
        registry.register(rack);

        let mut workflow =
            DeletePodWorkflow::new(Arc::clone(&store), registry, pod, Duration::from_secs(5));
        assert_eq!(workflow.phase().name(), "gathering");
        workflow.step().await.unwrap();
        assert_eq!(workflow.phase().name(), "decomposing");

        let deleted = workflow.run().await.unwrap();
        assert_eq!(backend.decompose_calls(), 2);
        assert_eq!(deleted.decompose_calls, 2);
        assert!(deleted.decompose_failure.is_some());
        assert_eq!(deleted.removed.len(), 4);
        store.read(|tables| {
            assert!(tables.bmc(pod).is_err());
            assert_eq!(tables.machines().count(), 0);
        });
        assert_eq!(backend.machine_names(), vec!["vm-two", "vm-three", "legacy"]);
    }

    #[tokio::test]
    async fn test_no_connection_still_deletes() {
        let backend = SimulatedPod::new(ADDRESS, 8, 16384);
        let (store, pod, _) = setup(&backend);
        let registry = ClientRegistry::new();

        let workflow =
            DeletePodWorkflow::new(Arc::clone(&store), registry, pod, Duration::from_secs(1));
        let deleted = workflow.run().await.unwrap();
        assert_eq!(deleted.decompose_calls, 0);
        assert_eq!(deleted.removed.len(), 4);
        assert_eq!(backend.decompose_calls(), 0);
    }
}
