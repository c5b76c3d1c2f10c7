use nexa_topology::{ClusterKind, MemberDescription, MemberKind, Topology, TopologyConfig};
use proptest::prelude::*;

const HOSTS: [&str; 4] = ["a", "b", "c", "d"];

fn kind() -> impl Strategy<Value = MemberKind> {
    prop_oneof![
        Just(MemberKind::Unknown),
        Just(MemberKind::Standalone),
        Just(MemberKind::Mongos),
        Just(MemberKind::RsPrimary),
        Just(MemberKind::RsSecondary),
        Just(MemberKind::RsArbiter),
        Just(MemberKind::RsOther),
        Just(MemberKind::RsGhost),
    ]
}

fn observation() -> impl Strategy<Value = MemberDescription> {
    (
        0..HOSTS.len(),
        kind(),
        proptest::collection::vec(0..HOSTS.len(), 0..4),
        proptest::option::of(1u32..4),
        proptest::option::of(1u64..4),
        proptest::option::of(10u32..40),
    )
        .prop_map(|(host, kind, listed, set_version, election_id, timeout)| {
            let mut desc = MemberDescription::new(HOSTS[host], kind).with_wire_version(6, 21);
            if kind.is_replica_set_member() && kind != MemberKind::RsGhost {
                desc = desc.with_set_name("rs0").with_hosts(listed.into_iter().map(|i| HOSTS[i]));
            }
            desc.set_version = set_version;
            desc.election_id = election_id.map(Into::into);
            desc.session_timeout_minutes = timeout;
            desc
        })
}

fn seeded(set_name: Option<&str>) -> Topology {
    let mut config = TopologyConfig::with_seeds(["a", "b", "c"]);
    config.replica_set_name = set_name.map(String::from);
    let topology = Topology::new(config).unwrap();
    topology.connect().unwrap();
    topology
}

proptest! {
    #[test]
    fn at_most_one_primary(observations in proptest::collection::vec(observation(), 1..40)) {
        let topology = seeded(Some("rs0"));
        for observation in observations {
            topology.apply(observation);
            let desc = topology.description();
            let primaries = desc.members().filter(|m| m.kind == MemberKind::RsPrimary).count();
            prop_assert!(primaries <= 1);
            if desc.kind.is_replica_set() {
                prop_assert_eq!(primaries == 1, desc.kind == ClusterKind::ReplicaSetWithPrimary);
            }
        }
    }

    #[test]
    fn versions_increase_and_registry_matches(
        observations in proptest::collection::vec(observation(), 1..40)
    ) {
        let topology = seeded(None);
        let mut last = topology.description().version;
        for observation in observations {
            let tracked = topology.description().member(&observation.address).is_some();
            topology.apply(observation);
            let desc = topology.description();
            if tracked {
                prop_assert!(desc.version > last);
            } else {
                prop_assert_eq!(desc.version, last);
            }
            last = desc.version;

            for member in desc.members() {
                let found = topology.find_server(member).unwrap();
                prop_assert!(found.is_some());
            }
            if desc.kind.is_replica_set() {
                let replica_set_only = desc
                    .members()
                    .all(|m| m.kind != MemberKind::Standalone && m.kind != MemberKind::Mongos);
                prop_assert!(replica_set_only);
            }
        }
    }

    #[test]
    fn session_timeout_is_minimum_of_data_bearing(
        observations in proptest::collection::vec(observation(), 1..40)
    ) {
        let topology = seeded(Some("rs0"));
        for observation in observations {
            topology.apply(observation);
            let desc = topology.description();
            let data_bearing: Vec<_> = desc.members().filter(|m| m.is_data_bearing()).collect();
            let expected = if data_bearing.iter().any(|m| m.session_timeout_minutes.is_none()) {
                None
            } else {
                data_bearing.iter().filter_map(|m| m.session_timeout_minutes).min()
            };
            prop_assert_eq!(desc.session_timeout_minutes, expected);
        }
    }
}
