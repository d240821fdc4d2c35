//! Benchmark for pod reconciliation
//!
//! Measures a full sync of a pod snapshot, both the first sync that enlists
//! every machine and a steady-state sync that changes nothing.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use pod_control_plane::controlplane::backends::{SimulatedPod, SimulatedRack};
use pod_control_plane::{Bmc, DiscoveredPod, PodReconciler, PowerParameters, RackClient, Tables};

const GB: u64 = 1_000_000_000;
const ADDRESS: &str = "qemu+ssh://10.0.0.5/system";

fn snapshot(machines: usize) -> DiscoveredPod {
    let backend = SimulatedPod::new(ADDRESS, 65536, 1 << 30);
    for idx in 0..machines {
        backend.add_machine(&format!("vm-{:05}", idx), 1, 1024, vec![8 * GB, 20 * GB]);
    }
    let rack = SimulatedRack::new("rack-a");
    rack.attach(backend);

    let context = PowerParameters::from([("power_address".to_string(), ADDRESS.to_string())]);
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime
        .block_on(rack.discover_pod("virsh", &context))
        .unwrap()
}

fn empty_pod() -> (Tables, pod_control_plane::BmcId) {
    let mut tables = Tables::default();
    let id = tables.new_bmc_id();
    let pool = tables.default_pool_id();
    let zone = tables.default_zone_id();
    let pod = Bmc::new_pod(id, "bench", "virsh", PowerParameters::new(), None, pool, zone);
    tables.upsert_bmc(pod).unwrap();
    (tables, id)
}

fn bench_pod_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("pod_sync");

    for machines in [10usize, 100, 500] {
        let discovered = snapshot(machines);
        let (empty, pod) = empty_pod();
        let mut synced = empty.clone();
        PodReconciler::new(&mut synced, pod)
            .unwrap()
            .sync(&discovered)
            .unwrap();

        group.throughput(Throughput::Elements(machines as u64));
        group.bench_with_input(BenchmarkId::new("initial", machines), &discovered, |b, discovered| {
            b.iter_batched(
                || empty.clone(),
                |mut tables| {
                    let report = PodReconciler::new(&mut tables, pod)
                        .unwrap()
                        .sync(black_box(discovered))
                        .unwrap();
                    black_box(report)
                },
                BatchSize::LargeInput,
            );
        });
        group.bench_with_input(BenchmarkId::new("steady", machines), &discovered, |b, discovered| {
            b.iter_batched(
                || synced.clone(),
                |mut tables| {
                    let report = PodReconciler::new(&mut tables, pod)
                        .unwrap()
                        .sync(black_box(discovered))
                        .unwrap();
                    black_box(report)
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pod_sync);
criterion_main!(benches);
