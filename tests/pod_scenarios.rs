//! End-to-end pod scenarios against the simulated rack backend

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use pod_control_plane::controlplane::backends::{SimulatedPod, SimulatedRack};
use pod_control_plane::power::PowerDriverRegistry;
use pod_control_plane::reconcile::admission;
use pod_control_plane::rpc::ClientRegistry;
use pod_control_plane::{
    BmcId, CommissioningScheduler, ComposeOptions, ComposeRequest, CreationType, Error,
    ErrorCategory, FleetEvent, Machine, NodeStatus, OrchestratorConfig, PodOrchestrator,
    PodRequest, PowerParameters, RackController, Result,
};
use std::sync::Arc;

const GB: u64 = 1_000_000_000;

/// Records the status each machine had when commissioning was requested
#[derive(Default)]
struct RecordingCommissioning {
    started: Mutex<Vec<(String, NodeStatus)>>,
}

#[async_trait]
impl CommissioningScheduler for RecordingCommissioning {
    async fn start_commissioning(&self, machine: &Machine, _user: &str) -> Result<()> {
        self.started
            .lock()
            .push((machine.hostname.clone(), machine.status));
        Ok(())
    }
}

struct Fleet {
    orchestrator: Arc<PodOrchestrator>,
    rack: Arc<SimulatedRack>,
    commissioning: Arc<RecordingCommissioning>,
}

async fn fleet(pods: &[Arc<SimulatedPod>]) -> Fleet {
    let config = OrchestratorConfig::default();
    let store = config.new_store();
    let registry = ClientRegistry::new();
    let rack = SimulatedRack::new("rack-a");
    for pod in pods {
        rack.attach(Arc::clone(pod));
    }
    registry.register(rack.clone());
    let commissioning = Arc::new(RecordingCommissioning::default());
    let orchestrator = PodOrchestrator::new(
        config,
        store,
        registry,
        Arc::new(PowerDriverRegistry::with_builtin().unwrap()),
        commissioning.clone(),
    )
    .unwrap();
    orchestrator
        .register_rack(RackController {
            system_id: "rack-a".into(),
            hostname: "rack-a".into(),
            subnets: vec!["10.0.0.0/24".parse().unwrap()],
        })
        .await
        .unwrap();
    Fleet {
        orchestrator,
        rack,
        commissioning,
    }
}

fn pod_request(pod: &SimulatedPod) -> PodRequest {
    PodRequest {
        power_type: "virsh".into(),
        power_parameters: PowerParameters::from([(
            "power_address".to_string(),
            pod.power_address().to_string(),
        )]),
        ..Default::default()
    }
}

async fn enlist(fleet: &Fleet, pod: &SimulatedPod) -> BmcId {
    fleet
        .orchestrator
        .create_pod(pod_request(pod))
        .await
        .unwrap()
        .pod
        .id
}

fn compose_request(hostname: &str, cores: u32, memory: u64) -> ComposeRequest {
    ComposeRequest {
        hostname: Some(hostname.into()),
        cores: Some(cores),
        memory: Some(memory),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_refresh_without_changes_is_idempotent() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 8, 16384);
    backend.add_machine("vm-one", 2, 2048, vec![10 * GB, 20 * GB]);
    backend.add_machine("vm-two", 1, 1024, vec![8 * GB]);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;

    let before: Vec<_> = fleet
        .orchestrator
        .machines()
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.id, m.hostname))
        .collect();
    let mut events = fleet.orchestrator.subscribe();
    fleet.orchestrator.refresh_pod(pod).await.unwrap();
    let after: Vec<_> = fleet
        .orchestrator
        .machines()
        .await
        .unwrap()
        .into_iter()
        .map(|m| (m.id, m.hostname))
        .collect();

    assert_eq!(before, after);
    assert_matches!(
        events.recv().await.unwrap(),
        FleetEvent::PodSynced {
            created: 0,
            removed: 0,
            ..
        }
    );
    assert_eq!(fleet.commissioning.started.lock().len(), 2);
}

#[tokio::test]
async fn test_new_machine_is_enlisted_and_commissioned() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 8, 16384);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;
    assert!(fleet.commissioning.started.lock().is_empty());

    backend.add_machine("vm-new", 2, 2048, vec![10 * GB]);
    let summary = fleet.orchestrator.refresh_pod(pod).await.unwrap();
    assert_eq!(summary.machine_count, 1);

    let machines = fleet.orchestrator.machines().await.unwrap();
    assert_eq!(machines[0].hostname, "vm-new");
    assert_eq!(machines[0].creation_type, CreationType::PreExisting);
    assert_eq!(
        *fleet.commissioning.started.lock(),
        vec![("vm-new".to_string(), NodeStatus::New)]
    );
}

#[tokio::test]
async fn test_vanished_machine_is_removed() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 8, 16384);
    backend.add_machine("vm-one", 2, 2048, vec![10 * GB]);
    backend.add_machine("vm-two", 2, 2048, vec![10 * GB]);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;

    assert!(backend.remove_machine("vm-two"));
    let summary = fleet.orchestrator.refresh_pod(pod).await.unwrap();
    assert_eq!(summary.machine_count, 1);
    assert_eq!(summary.usage.cores, 2);
    let hostnames: Vec<_> = fleet
        .orchestrator
        .machines()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.hostname)
        .collect();
    assert_eq!(hostnames, vec!["vm-one"]);
}

#[tokio::test]
async fn test_admission_against_used_cores() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 4, 8192);
    backend.add_machine("vm-one", 2, 1024, vec![8 * GB]);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;

    let err = fleet
        .orchestrator
        .compose(pod, &compose_request("big", 3, 1024), ComposeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(err.to_string().contains('2'));

    let admitted = fleet
        .orchestrator
        .store()
        .read(|tables| admission::admit(tables, pod, 3, 1024));
    assert_matches!(
        &admitted,
        Err(Error::OverCommit(violation)) if violation.cores.unwrap().available == 2
    );
    assert!(admitted
        .unwrap_err()
        .to_string()
        .contains("there are 2 available resources"));

    let machine = fleet
        .orchestrator
        .compose(pod, &compose_request("fits", 2, 1024), ComposeOptions::default())
        .await
        .unwrap();
    assert_eq!(machine.cpu_count, 2);
    assert_eq!(backend.compose_calls(), 1);
}

#[tokio::test]
async fn test_compose_limits_from_hints() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 10, 4096);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;

    let err = fleet
        .orchestrator
        .compose(pod, &compose_request("too-big", 12, 2048), ComposeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "cores: Ensure this value is less than or equal to 10."
    );
    assert_eq!(backend.compose_calls(), 0);

    let machine = fleet
        .orchestrator
        .compose(pod, &compose_request("fits", 8, 2048), ComposeOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.compose_calls(), 1);
    assert_eq!(machine.status, NodeStatus::New);
    assert_eq!(machine.creation_type, CreationType::Manual);
    assert_eq!(
        *fleet.commissioning.started.lock(),
        vec![("fits".to_string(), NodeStatus::New)]
    );

    let summary = fleet.orchestrator.pod(pod).await.unwrap();
    assert_eq!(summary.pod.hints.cores, 2);
    assert_eq!(summary.pod.hints.memory, 2048);
}

#[tokio::test]
async fn test_delete_pod_decomposes_best_effort() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 8, 16384);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;
    for hostname in ["vm-a", "vm-b", "vm-c"] {
        fleet
            .orchestrator
            .compose(pod, &compose_request(hostname, 1, 1024), ComposeOptions::default())
            .await
            .unwrap();
    }
    backend.fail_decompose("vm-b");

    let mut events = fleet.orchestrator.subscribe();
    let deleted = fleet.orchestrator.delete_pod(pod).await.unwrap();
    assert_eq!(deleted.decompose_calls, 2);
    assert_eq!(deleted.removed.len(), 3);
    assert!(deleted.decompose_failure.is_some());

    assert!(fleet.orchestrator.machines().await.unwrap().is_empty());
    assert_matches!(
        fleet.orchestrator.pod(pod).await,
        Err(Error::NotFound { .. })
    );
    assert_eq!(backend.machine_names(), vec!["vm-b", "vm-c"]);

    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            FleetEvent::MachineRemoved { .. } => removed += 1,
            FleetEvent::PodDeleted { pod_id, .. } => assert_eq!(pod_id, pod),
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(removed, 3);
}

#[tokio::test]
async fn test_compose_for_pods_skips_full_pods() {
    let small = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 2, 4096);
    let large = SimulatedPod::new("qemu+ssh://10.0.0.6/system", 16, 32768);
    let fleet = fleet(&[small.clone(), large.clone()]).await;
    enlist(&fleet, &small).await;
    let large_id = enlist(&fleet, &large).await;

    let machine = fleet
        .orchestrator
        .compose_for_pods(&compose_request("dyn", 4, 2048), None)
        .await
        .unwrap();
    assert_eq!(machine.bmc_id, Some(large_id));
    assert_eq!(machine.creation_type, CreationType::Dynamic);
    assert_eq!(machine.status, NodeStatus::Ready);
    assert_eq!(small.compose_calls(), 0);
    assert!(fleet.commissioning.started.lock().is_empty());

    assert_matches!(
        fleet
            .orchestrator
            .compose_for_pods(&compose_request("huge", 64, 2048), None)
            .await,
        Err(Error::NoMatchingPods)
    );
}

#[tokio::test]
async fn test_lost_connection_fails_compose() {
    let backend = SimulatedPod::new("qemu+ssh://10.0.0.5/system", 8, 16384);
    let fleet = fleet(&[backend.clone()]).await;
    let pod = enlist(&fleet, &backend).await;

    fleet.rack.set_connected(false);
    let err = fleet
        .orchestrator
        .compose(pod, &compose_request("vm", 1, 1024), ComposeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::RemoteOperation);
    assert!(err.to_string().contains("connection lost"));
    assert!(fleet.orchestrator.machines().await.unwrap().is_empty());
}
