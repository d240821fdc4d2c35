//! Pod driver calls
//!
//! Remote failures are turned into one human-readable [`Error::PodProblem`]
//! so callers never deal with the remote error type directly.

use crate::domain::ports::{
    ClientResolver, DiscoveredMachine, DiscoveredPod, DiscoveredPodHints, PowerParameters,
    RackClient, RequestedMachine,
};
use crate::error::{Error, Result};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Discovery results per rack controller
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub successes: BTreeMap<String, DiscoveredPod>,
    pub failures: BTreeMap<String, Error>,
}

impl DiscoveryOutcome {
    /// System IDs of the racks that reached the pod
    pub fn routable(&self) -> Vec<String> {
        self.successes.keys().cloned().collect()
    }

    /// System IDs of the racks that failed to reach the pod
    pub fn non_routable(&self) -> Vec<String> {
        self.failures.keys().cloned().collect()
    }

    /// Pick the snapshot to sync from.
    ///
    /// Any success wins. Without one, the first failure is returned; with no
    /// result at all no rack controller was connected.
    pub fn into_best(self) -> Result<DiscoveredPod> {
        if let Some((_, pod)) = self.successes.into_iter().next() {
            return Ok(pod);
        }
        match self.failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Err(Error::NoRackControllers),
        }
    }
}

/// Run discovery of a pod on every connected rack controller at once
pub async fn discover_pod(
    resolver: &dyn ClientResolver,
    power_type: &str,
    context: &PowerParameters,
    timeout: Duration,
) -> DiscoveryOutcome {
    let clients = resolver.all_clients();
    debug!(
        "Discovering '{}' pod through {} rack controllers",
        power_type,
        clients.len()
    );

    let calls = clients.iter().map(|client| async move {
        let result = tokio::time::timeout(timeout, client.discover_pod(power_type, context)).await;
        (client.ident().to_string(), result)
    });

    let mut outcome = DiscoveryOutcome::default();
    for (ident, result) in join_all(calls).await {
        match result {
            Ok(Ok(pod)) => {
                outcome.successes.insert(ident, pod);
            }
            Ok(Err(remote)) => {
                warn!("Rack controller {} failed to discover pod: {}", ident, remote);
                outcome
                    .failures
                    .insert(ident, Error::PodProblem(remote.to_string()));
            }
            Err(_) => {
                warn!("Rack controller {} timed out discovering pod", ident);
                outcome.failures.insert(
                    ident,
                    Error::DriverTimeout {
                        operation: "discover the pod".to_string(),
                        power_type: power_type.to_string(),
                        seconds: timeout.as_secs(),
                    },
                );
            }
        }
    }
    outcome
}

/// Ask the pod driver behind `client` to compose a machine
pub async fn compose_machine(
    client: &dyn RackClient,
    power_type: &str,
    context: &PowerParameters,
    request: &RequestedMachine,
    pod_id: u64,
    pod_name: &str,
) -> Result<(DiscoveredMachine, DiscoveredPodHints)> {
    client
        .compose_machine(power_type, context, request, pod_id, pod_name)
        .await
        .map_err(|e| Error::PodProblem(format!("Unable to compose machine because: {}", e)))
}

/// Ask the pod driver behind `client` to tear down a machine
pub async fn decompose_machine(
    client: &dyn RackClient,
    power_type: &str,
    context: &PowerParameters,
    pod_id: u64,
    pod_name: &str,
) -> Result<DiscoveredPodHints> {
    client
        .decompose_machine(power_type, context, pod_id, pod_name)
        .await
        .map_err(|e| Error::PodProblem(format!("Unable to decompose machine because: {}", e)))
}
