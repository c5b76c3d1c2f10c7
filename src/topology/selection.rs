//! Server selectors and the selection loop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::subscription::Subscription;
use crate::error::{Result, SelectionFailure, SelectorError, ServerSelectionError, TopologyError};
use crate::types::{ClusterDescription, ClusterKind, MemberDescription, MemberKind};

pub type Candidates = Vec<Arc<MemberDescription>>;
pub type SelectorResult = std::result::Result<Candidates, SelectorError>;

/// Narrows the selectable members of a cluster to the suitable ones.
///
/// Candidates never include members of kind Unknown. Any closure with the
/// same signature is a selector.
pub trait ServerSelector: Send + Sync {
    fn select(&self, cluster: &ClusterDescription, candidates: Candidates) -> SelectorResult;
}

impl<F> ServerSelector for F
where
    F: Fn(&ClusterDescription, Candidates) -> SelectorResult + Send + Sync,
{
    fn select(&self, cluster: &ClusterDescription, candidates: Candidates) -> SelectorResult {
        self(cluster, candidates)
    }
}

fn of_kind(candidates: Candidates, kinds: &[MemberKind]) -> Candidates {
    candidates.into_iter().filter(|m| kinds.contains(&m.kind)).collect()
}

/// Servers that accept writes
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteSelector;

impl ServerSelector for WriteSelector {
    fn select(&self, cluster: &ClusterDescription, candidates: Candidates) -> SelectorResult {
        Ok(match cluster.kind {
            ClusterKind::Single => candidates,
            _ => of_kind(
                candidates,
                &[MemberKind::RsPrimary, MemberKind::Mongos, MemberKind::Standalone],
            ),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

pub type TagSet = BTreeMap<String, String>;

/// Read routing by mode and tag sets.
///
/// Tag sets are tried in order and the first one matching any eligible
/// secondary wins. An empty tag set matches every member.
#[derive(Debug, Clone, Default)]
pub struct ReadPreference {
    pub mode: ReadMode,
    pub tag_sets: Vec<TagSet>,
}

impl ReadPreference {
    pub fn new(mode: ReadMode) -> Self {
        Self { mode, tag_sets: Vec::new() }
    }

    pub fn with_tag_set<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tag_sets
            .push(tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect());
        self
    }

    fn tagged(&self, candidates: Candidates) -> Candidates {
        if self.tag_sets.is_empty() {
            return candidates;
        }
        for tag_set in &self.tag_sets {
            let matched: Candidates = candidates
                .iter()
                .filter(|m| tag_set.iter().all(|(k, v)| m.tags.get(k) == Some(v)))
                .cloned()
                .collect();
            if !matched.is_empty() {
                return matched;
            }
        }
        Vec::new()
    }

    fn select_in_replica_set(&self, candidates: Candidates) -> Candidates {
        let primaries = || of_kind(candidates.clone(), &[MemberKind::RsPrimary]);
        let secondaries = || self.tagged(of_kind(candidates.clone(), &[MemberKind::RsSecondary]));
        match self.mode {
            ReadMode::Primary => primaries(),
            ReadMode::PrimaryPreferred => {
                let selected = primaries();
                if selected.is_empty() { secondaries() } else { selected }
            }
            ReadMode::Secondary => secondaries(),
            ReadMode::SecondaryPreferred => {
                let selected = secondaries();
                if selected.is_empty() { primaries() } else { selected }
            }
            ReadMode::Nearest => self.tagged(of_kind(
                candidates.clone(),
                &[MemberKind::RsPrimary, MemberKind::RsSecondary],
            )),
        }
    }
}

impl ServerSelector for ReadPreference {
    fn select(&self, cluster: &ClusterDescription, candidates: Candidates) -> SelectorResult {
        if self.mode == ReadMode::Primary && !self.tag_sets.is_empty() {
            return Err(SelectorError::message(
                "read preference in primary mode cannot have tag sets",
            ));
        }
        Ok(match cluster.kind {
            ClusterKind::Unknown => Vec::new(),
            ClusterKind::Single => candidates,
            ClusterKind::Sharded => of_kind(candidates, &[MemberKind::Mongos]),
            ClusterKind::ReplicaSetNoPrimary | ClusterKind::ReplicaSetWithPrimary => {
                self.select_in_replica_set(candidates)
            }
        })
    }
}

/// Keeps candidates whose round-trip time is within `threshold` of the
/// fastest one. Candidates without a measured round trip are dropped unless
/// none has one.
#[derive(Debug, Clone, Copy)]
pub struct LatencySelector {
    pub threshold: Duration,
}

impl LatencySelector {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl ServerSelector for LatencySelector {
    fn select(&self, _cluster: &ClusterDescription, candidates: Candidates) -> SelectorResult {
        if candidates.len() < 2 {
            return Ok(candidates);
        }
        let Some(fastest) = candidates.iter().filter_map(|m| m.round_trip_time).min() else {
            return Ok(candidates);
        };
        let cutoff = fastest.saturating_add(self.threshold);
        Ok(candidates
            .into_iter()
            .filter(|m| m.round_trip_time.is_some_and(|rtt| rtt <= cutoff))
            .collect())
    }
}

/// Runs selectors in order, each narrowing the previous result
#[derive(Clone, Default)]
pub struct CompositeSelector {
    selectors: Vec<Arc<dyn ServerSelector>>,
}

impl CompositeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<S: ServerSelector + 'static>(mut self, selector: S) -> Self {
        self.selectors.push(Arc::new(selector));
        self
    }
}

impl fmt::Debug for CompositeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSelector").field("len", &self.selectors.len()).finish()
    }
}

impl ServerSelector for CompositeSelector {
    fn select(&self, cluster: &ClusterDescription, mut candidates: Candidates) -> SelectorResult {
        for selector in &self.selectors {
            if candidates.is_empty() {
                break;
            }
            candidates = selector.select(cluster, candidates)?;
        }
        Ok(candidates)
    }
}

/// Uniform choice among suitable servers
pub trait RandomSource: Send + Sync + fmt::Debug {
    /// An index in `0..len`; `len` is at least one
    fn pick(&self, len: usize) -> usize;
}

#[derive(Debug)]
pub struct SmallRngSource {
    rng: Mutex<SmallRng>,
}

impl SmallRngSource {
    pub fn new() -> Self {
        Self { rng: Mutex::new(SmallRng::from_os_rng()) }
    }

    /// Deterministic sequence for reproducible tests
    pub fn seeded(seed: u64) -> Self {
        Self { rng: Mutex::new(SmallRng::seed_from_u64(seed)) }
    }
}

impl Default for SmallRngSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SmallRngSource {
    fn pick(&self, len: usize) -> usize {
        self.rng.lock().random_range(0..len)
    }
}

/// One selection call: the selector and an optional caller deadline that
/// overrides the configured selection timeout.
pub struct SelectionState<'a> {
    pub selector: &'a dyn ServerSelector,
    pub deadline: Option<Instant>,
}

impl<'a> SelectionState<'a> {
    pub fn new(selector: &'a dyn ServerSelector) -> Self {
        Self { selector, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Suitable servers in one description, failing first on a compatibility
/// error. Selector errors are returned unchanged.
pub fn select_from_description(
    desc: &ClusterDescription,
    selector: &dyn ServerSelector,
) -> Result<Candidates> {
    if let Some(err) = &desc.compatibility_error {
        return Err(TopologyError::Compatibility(err.clone()));
    }
    Ok(selector.select(desc, desc.selectable_members())?)
}

/// Waits on `subscription` until a description yields suitable servers.
///
/// With `skip_current` the description last seen on `subscription` has
/// already been tried, so unless a newer one is pending the first evaluation
/// waits for the next publish. Cancellation wins over a simultaneous update;
/// every failure carries the last description evaluated.
pub async fn select_from_subscription(
    cancel: &CancellationToken,
    subscription: &mut Subscription,
    selector: &dyn ServerSelector,
    deadline: Instant,
    skip_current: bool,
) -> Result<Candidates> {
    let mut evaluate = !skip_current || subscription.has_changed();
    let mut current = subscription.latest();
    let timeout = tokio::time::sleep_until(deadline);
    tokio::pin!(timeout);

    loop {
        if evaluate {
            let suitable = select_from_description(&current, selector)?;
            if !suitable.is_empty() {
                return Ok(suitable);
            }
            trace!("No suitable servers in topology version {}", current.version);
        }
        evaluate = true;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ServerSelectionError::new(SelectionFailure::Cancelled, current).into());
            }
            _ = &mut timeout => {
                return Err(ServerSelectionError::new(SelectionFailure::TimedOut, current).into());
            }
            next = subscription.changed() => match next {
                Ok(desc) => current = desc,
                Err(_) => {
                    return Err(
                        ServerSelectionError::new(SelectionFailure::SubscriptionClosed, current).into()
                    );
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::subscription::SubscriptionRegistry;
    use crate::types::Address;

    fn member(addr: &str, kind: MemberKind) -> MemberDescription {
        MemberDescription::new(addr, kind)
    }

    fn cluster(kind: ClusterKind, members: Vec<MemberDescription>) -> ClusterDescription {
        ClusterDescription::from_members(kind, members)
    }

    fn addresses(selected: &Candidates) -> Vec<&str> {
        selected.iter().map(|m| m.address.as_str()).collect()
    }

    fn replica_set() -> ClusterDescription {
        cluster(
            ClusterKind::ReplicaSetWithPrimary,
            vec![
                member("a", MemberKind::RsPrimary).with_tag("dc", "east"),
                member("b", MemberKind::RsSecondary).with_tag("dc", "east"),
                member("c", MemberKind::RsSecondary).with_tag("dc", "west"),
                member("d", MemberKind::RsArbiter),
                member("e", MemberKind::Unknown),
            ],
        )
    }

    #[test]
    fn test_write_selector_by_cluster_kind() {
        let rs = replica_set();
        let selected = select_from_description(&rs, &WriteSelector).unwrap();
        assert_eq!(addresses(&selected), vec!["a:27017"]);

        let sharded = cluster(
            ClusterKind::Sharded,
            vec![member("s1", MemberKind::Mongos), member("s2", MemberKind::Mongos)],
        );
        assert_eq!(select_from_description(&sharded, &WriteSelector).unwrap().len(), 2);

        let single = cluster(ClusterKind::Single, vec![member("x", MemberKind::RsSecondary)]);
        assert_eq!(select_from_description(&single, &WriteSelector).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_members_are_never_candidates() {
        let rs = replica_set();
        let everything = |_: &ClusterDescription, c: Candidates| -> SelectorResult { Ok(c) };
        let selected = select_from_description(&rs, &everything).unwrap();
        assert!(!selected.iter().any(|m| m.address == Address::parse("e")));
        assert_eq!(selected.len(), 4);
    }

    #[test]
    fn test_read_preference_modes() {
        let rs = replica_set();
        let select = |pref: ReadPreference| {
            let selected = select_from_description(&rs, &pref).unwrap();
            addresses(&selected).into_iter().map(String::from).collect::<Vec<_>>()
        };
        assert_eq!(select(ReadPreference::new(ReadMode::Primary)), vec!["a:27017"]);
        assert_eq!(select(ReadPreference::new(ReadMode::Secondary)), vec!["b:27017", "c:27017"]);
        assert_eq!(select(ReadPreference::new(ReadMode::Nearest)).len(), 3);
        assert_eq!(
            select(ReadPreference::new(ReadMode::Secondary).with_tag_set([("dc", "west")])),
            vec!["c:27017"]
        );
        assert_eq!(
            select(
                ReadPreference::new(ReadMode::SecondaryPreferred)
                    .with_tag_set([("dc", "north")])
            ),
            vec!["a:27017"]
        );
    }

    #[test]
    fn test_primary_preferred_falls_back_to_secondaries() {
        let rs = cluster(
            ClusterKind::ReplicaSetNoPrimary,
            vec![member("b", MemberKind::RsSecondary), member("c", MemberKind::RsOther)],
        );
        let selected =
            select_from_description(&rs, &ReadPreference::new(ReadMode::PrimaryPreferred)).unwrap();
        assert_eq!(addresses(&selected), vec!["b:27017"]);
    }

    #[test]
    fn test_primary_with_tags_is_a_selector_error() {
        let pref = ReadPreference::new(ReadMode::Primary).with_tag_set([("dc", "east")]);
        let err = select_from_description(&replica_set(), &pref).unwrap_err();
        assert!(matches!(err, TopologyError::Selector(_)));
    }

    #[test]
    fn test_latency_window() {
        let rs = cluster(
            ClusterKind::ReplicaSetWithPrimary,
            vec![
                member("a", MemberKind::RsSecondary).with_round_trip_time(Duration::from_millis(10)),
                member("b", MemberKind::RsSecondary).with_round_trip_time(Duration::from_millis(24)),
                member("c", MemberKind::RsSecondary).with_round_trip_time(Duration::from_millis(40)),
            ],
        );
        let selector = LatencySelector::new(Duration::from_millis(15));
        let selected = select_from_description(&rs, &selector).unwrap();
        assert_eq!(addresses(&selected), vec!["a:27017", "b:27017"]);
    }

    #[test]
    fn test_composite_stops_at_first_error() {
        let failing = |_: &ClusterDescription, _: Candidates| -> SelectorResult {
            Err(SelectorError::message("boom"))
        };
        let selector = CompositeSelector::new()
            .then(ReadPreference::new(ReadMode::Secondary))
            .then(failing);
        let err = select_from_description(&replica_set(), &selector).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_seeded_random_source_is_deterministic() {
        let a = SmallRngSource::seeded(7);
        let b = SmallRngSource::seeded(7);
        let left: Vec<_> = (0..16).map(|_| a.pick(5)).collect();
        let right: Vec<_> = (0..16).map(|_| b.pick(5)).collect();
        assert_eq!(left, right);
        assert!(left.iter().all(|i| *i < 5));
    }

    #[tokio::test]
    async fn test_skip_current_waits_for_next_publish() {
        let registry = SubscriptionRegistry::new();
        let mut published = replica_set();
        published.version = 1;
        let mut subscription = registry.subscribe(|| Arc::new(published.clone())).unwrap();

        let deadline = Instant::now() + Duration::from_millis(20);
        let err = select_from_subscription(
            &CancellationToken::new(),
            &mut subscription,
            &WriteSelector,
            deadline,
            true,
        )
        .await
        .unwrap_err();
        match err {
            TopologyError::ServerSelection(err) => {
                assert_eq!(err.cause, SelectionFailure::TimedOut);
                assert_eq!(err.description.version, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = select_from_subscription(
            &cancel,
            &mut subscription,
            &WriteSelector,
            Instant::now() + Duration::from_secs(30),
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            TopologyError::ServerSelection(ServerSelectionError {
                cause: SelectionFailure::Cancelled,
                ..
            })
        ));

        let mut next = published;
        next.version = 2;
        registry.publish(Arc::new(next));
        let selected = select_from_subscription(
            &CancellationToken::new(),
            &mut subscription,
            &WriteSelector,
            Instant::now() + Duration::from_secs(30),
            true,
        )
        .await
        .unwrap();
        assert_eq!(addresses(&selected), vec!["a:27017"]);
    }
}
