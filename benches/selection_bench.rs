use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nexa_topology::topology::{CompositeSelector, LatencySelector};
use nexa_topology::{
    MemberDescription, MemberKind, ReadMode, ReadPreference, Topology, TopologyConfig,
    WriteSelector,
};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

const HOSTS: [&str; 5] = ["db1", "db2", "db3", "db4", "db5"];

fn replica_set() -> Topology {
    let mut config = TopologyConfig::with_seeds(HOSTS);
    config.replica_set_name = Some("rs0".to_string());
    let topology = Topology::new(config).unwrap();
    topology.connect().unwrap();

    for (i, host) in HOSTS.iter().enumerate() {
        let kind = if i == 0 { MemberKind::RsPrimary } else { MemberKind::RsSecondary };
        let mut member = MemberDescription::new(*host, kind)
            .with_set_name("rs0")
            .with_hosts(HOSTS)
            .with_wire_version(6, 21)
            .with_round_trip_time(Duration::from_millis(1 + i as u64 * 3));
        if i == 0 {
            member = member.with_set_version(1).with_election_id(1u64);
        }
        topology.apply(member);
    }
    topology
}

fn selection_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    let rt = Runtime::new().unwrap();
    let topology = replica_set();
    let cancel = CancellationToken::new();

    group.bench_function("write_fast_path", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(topology.select_server(&cancel, &WriteSelector).await.unwrap());
            });
        })
    });

    let nearby = CompositeSelector::new()
        .then(ReadPreference::new(ReadMode::Nearest))
        .then(LatencySelector::new(Duration::from_millis(5)));
    group.bench_function("nearest_within_latency", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(topology.select_server(&cancel, &nearby).await.unwrap());
            });
        })
    });

    group.finish();
}

fn apply_benchmark(c: &mut Criterion) {
    let topology = replica_set();
    let heartbeat = MemberDescription::new("db2", MemberKind::RsSecondary)
        .with_set_name("rs0")
        .with_hosts(HOSTS)
        .with_wire_version(6, 21);

    c.bench_function("apply_secondary_heartbeat", |b| {
        b.iter(|| black_box(topology.apply(heartbeat.clone())))
    });
}

criterion_group!(benches, selection_benchmark, apply_benchmark);
criterion_main!(benches);
