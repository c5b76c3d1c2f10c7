//! The topology: owns the current cluster description, the tracked servers
//! and the subscriptions, and answers selection requests against them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::election::{ElectionOrdering, SetVersionFirst};
use super::fsm::Fsm;
use super::monitor::{MemberUpdateSink, MonitorFactory, PassiveMonitorFactory};
use super::selection::{
    select_from_description, select_from_subscription, LatencySelector, RandomSource,
    SelectionState, ServerSelector, SmallRngSource,
};
use super::server::{SelectedServer, Server};
use super::subscription::{Subscription, SubscriptionRegistry};
use crate::config::TopologyConfig;
use crate::error::{Result, TopologyError};
use crate::types::{Address, ClusterDescription, ClusterKind, MemberDescription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyState::Disconnected => write!(f, "Disconnected"),
            TopologyState::Connecting => write!(f, "Connecting"),
            TopologyState::Connected => write!(f, "Connected"),
            TopologyState::Disconnecting => write!(f, "Disconnecting"),
            TopologyState::Closed => write!(f, "Closed"),
        }
    }
}

pub(crate) struct TopologyInner {
    id: Uuid,
    config: TopologyConfig,
    state: RwLock<TopologyState>,
    description: ArcSwap<ClusterDescription>,
    /// Writer lock for the description; the registry always matches its members
    servers: Mutex<BTreeMap<Address, Arc<Server>>>,
    subscriptions: Arc<SubscriptionRegistry>,
    monitors: Arc<dyn MonitorFactory>,
    ordering: Arc<dyn ElectionOrdering>,
    random: Arc<dyn RandomSource>,
}

impl TopologyInner {
    fn state(&self) -> TopologyState {
        *self.state.read()
    }

    /// Folds one member observation into the cluster description.
    ///
    /// Returns the stored description for the member's address, or the
    /// observation itself when it was ignored.
    pub(crate) fn apply(self: &Arc<Self>, member: MemberDescription) -> Arc<MemberDescription> {
        let address = member.address.clone();
        let (published, started, retired) = {
            let mut servers = self.servers.lock();
            if matches!(self.state(), TopologyState::Disconnecting | TopologyState::Closed) {
                debug!("Ignoring update for {} after disconnect", address);
                return Arc::new(member);
            }
            let previous = self.description.load_full();
            if !previous.members.contains_key(&address) {
                debug!("Ignoring update for untracked member {}", address);
                return Arc::new(member);
            }

            let fsm = Fsm::new(
                self.ordering.as_ref(),
                self.config.wire_versions,
                &self.config.min_server_version,
            );
            let transition = fsm.apply(&previous, member);
            let next = Arc::new(transition.description);

            let mut retired: Vec<Arc<Server>> = transition
                .removed
                .iter()
                .filter_map(|addr| servers.remove(addr))
                .collect();
            let mut started = Vec::with_capacity(transition.added.len());
            for addr in &transition.added {
                if let Some(desc) = next.member(addr) {
                    let server = Server::new(desc.clone(), Arc::downgrade(self));
                    if let Some(replaced) = servers.insert(addr.clone(), server.clone()) {
                        retired.push(replaced);
                    }
                    started.push(server);
                }
            }
            for (addr, desc) in &next.members {
                if let Some(server) = servers.get(addr) {
                    server.set_description(desc);
                }
            }

            self.description.store(next.clone());
            (next, started, retired)
        };

        for server in retired {
            server.shutdown();
        }
        self.start_monitors(started);

        debug!("Topology {} moved to version {}: {}", self.id, published.version, published);
        if let Some(err) = &published.compatibility_error {
            warn!("Topology {} is incompatible: {}", self.id, err);
        }
        let stored = published
            .member(&address)
            .cloned()
            .unwrap_or_else(|| Arc::new(MemberDescription::unknown(address)));
        self.subscriptions.publish(published);
        stored
    }

    fn start_monitors(self: &Arc<Self>, servers: Vec<Arc<Server>>) {
        let interval = self.config.heartbeat_interval();
        for server in servers {
            let sink = MemberUpdateSink::new(server.address().clone(), Arc::downgrade(self));
            let monitor = self.monitors.start(server.address(), interval, sink);
            server.attach_monitor(monitor);
            debug!("Started monitoring {}", server.address());
        }
    }

    fn subscribe(&self) -> Result<Subscription> {
        self.subscriptions.subscribe(|| self.description.load_full())
    }

    fn find_server(&self, address: &Address) -> Result<Option<SelectedServer>> {
        match self.state() {
            TopologyState::Connected => {}
            TopologyState::Disconnected | TopologyState::Connecting => {
                return Err(TopologyError::NotConnected)
            }
            TopologyState::Disconnecting | TopologyState::Closed => {
                return Err(TopologyError::TopologyClosed)
            }
        }
        let servers = self.servers.lock();
        let kind = self.description.load().kind;
        Ok(servers.get(address).map(|server| SelectedServer::new(server.clone(), kind)))
    }
}

/// Assembles a [`Topology`] with non-default collaborators
pub struct TopologyBuilder {
    config: TopologyConfig,
    monitors: Arc<dyn MonitorFactory>,
    ordering: Arc<dyn ElectionOrdering>,
    random: Arc<dyn RandomSource>,
}

impl TopologyBuilder {
    pub fn monitor_factory(mut self, factory: impl MonitorFactory + 'static) -> Self {
        self.monitors = Arc::new(factory);
        self
    }

    pub fn election_ordering(mut self, ordering: impl ElectionOrdering + 'static) -> Self {
        self.ordering = Arc::new(ordering);
        self
    }

    pub fn random_source(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    pub fn build(self) -> Result<Topology> {
        self.config.validate()?;
        let mut initial = ClusterDescription::new(self.config.initial_kind());
        initial.set_name = self.config.replica_set_name.clone();

        let inner = Arc::new(TopologyInner {
            id: Uuid::new_v4(),
            state: RwLock::new(TopologyState::Disconnected),
            description: ArcSwap::from_pointee(initial),
            servers: Mutex::new(BTreeMap::new()),
            subscriptions: SubscriptionRegistry::new(),
            monitors: self.monitors,
            ordering: self.ordering,
            random: self.random,
            config: self.config,
        });
        debug!("Created topology {}", inner.id);
        Ok(Topology { inner })
    }
}

/// Shared handle to one deployment's topology
#[derive(Clone)]
pub struct Topology {
    inner: Arc<TopologyInner>,
}

impl Topology {
    pub fn new(config: TopologyConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: TopologyConfig) -> TopologyBuilder {
        TopologyBuilder {
            config,
            monitors: Arc::new(PassiveMonitorFactory),
            ordering: Arc::new(SetVersionFirst),
            random: Arc::new(SmallRngSource::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.inner.config
    }

    pub fn state(&self) -> TopologyState {
        self.inner.state()
    }

    /// Starts tracking the configured seeds. Repeated calls are no-ops;
    /// calling after [`Topology::disconnect`] fails.
    pub fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                TopologyState::Disconnected => *state = TopologyState::Connecting,
                TopologyState::Connecting | TopologyState::Connected => return Ok(()),
                TopologyState::Disconnecting | TopologyState::Closed => {
                    return Err(TopologyError::TopologyClosed)
                }
            }
        }

        let config = &self.inner.config;
        let seeds = config.seed_addresses();
        let (published, started) = {
            let mut servers = self.inner.servers.lock();
            let previous = self.inner.description.load_full();
            let mut desc = ClusterDescription::new(config.initial_kind());
            desc.set_name = config.replica_set_name.clone();
            desc.version = previous.version + 1;

            let mut started = Vec::with_capacity(seeds.len());
            for address in &seeds {
                let member = Arc::new(MemberDescription::unknown(address.clone()));
                let server = Server::new(member.clone(), Arc::downgrade(&self.inner));
                desc.members.insert(address.clone(), member);
                servers.insert(address.clone(), server.clone());
                started.push(server);
            }
            let desc = Arc::new(desc);
            self.inner.description.store(desc.clone());
            (desc, started)
        };

        *self.inner.state.write() = TopologyState::Connected;
        self.inner.start_monitors(started);
        info!(
            "Topology {} connected: {} seed(s), initial type {}",
            self.inner.id,
            seeds.len(),
            published.kind
        );
        self.inner.subscriptions.publish(published);
        Ok(())
    }

    /// Closes subscriptions, stops every monitor and resets the description.
    /// Updates still in flight finish first; later ones are ignored.
    pub fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                TopologyState::Connecting | TopologyState::Connected => {
                    *state = TopologyState::Disconnecting
                }
                TopologyState::Disconnected => {
                    *state = TopologyState::Closed;
                    drop(state);
                    self.inner.subscriptions.close();
                    return Ok(());
                }
                TopologyState::Disconnecting | TopologyState::Closed => {
                    return Err(TopologyError::TopologyClosed)
                }
            }
        }

        self.inner.subscriptions.close();
        let retired = {
            let mut servers = self.inner.servers.lock();
            let previous = self.inner.description.load_full();
            let mut reset = ClusterDescription::new(ClusterKind::Unknown);
            reset.version = previous.version + 1;
            self.inner.description.store(Arc::new(reset));
            std::mem::take(&mut *servers)
        };
        for server in retired.values() {
            server.shutdown();
        }

        *self.inner.state.write() = TopologyState::Closed;
        info!("Topology {} disconnected, stopped {} monitor(s)", self.inner.id, retired.len());
        Ok(())
    }

    /// Feeds a member observation into the topology, as a monitor would
    pub fn apply(&self, member: MemberDescription) -> Arc<MemberDescription> {
        self.inner.apply(member)
    }

    /// Latest cluster description
    pub fn description(&self) -> Arc<ClusterDescription> {
        self.inner.description.load_full()
    }

    pub fn subscribe(&self) -> Result<Subscription> {
        self.inner.subscribe()
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        subscription.unsubscribe();
    }

    /// Handle for the tracked server at `candidate`'s address, if any
    pub fn find_server(&self, candidate: &MemberDescription) -> Result<Option<SelectedServer>> {
        self.inner.find_server(&candidate.address)
    }

    /// Selector limiting candidates to the configured latency window
    pub fn latency_selector(&self) -> LatencySelector {
        LatencySelector::new(self.inner.config.local_threshold())
    }

    /// Picks a server matching `selector`, waiting for topology changes up to
    /// the configured selection timeout.
    pub async fn select_server(
        &self,
        cancel: &CancellationToken,
        selector: &dyn ServerSelector,
    ) -> Result<SelectedServer> {
        self.run_selection(cancel, SelectionState::new(selector)).await
    }

    /// Like [`Topology::select_server`] with an explicit deadline
    pub async fn select_server_by(
        &self,
        cancel: &CancellationToken,
        selector: &dyn ServerSelector,
        deadline: Instant,
    ) -> Result<SelectedServer> {
        self.run_selection(cancel, SelectionState::new(selector).with_deadline(deadline))
            .await
    }

    async fn run_selection(
        &self,
        cancel: &CancellationToken,
        state: SelectionState<'_>,
    ) -> Result<SelectedServer> {
        match self.state() {
            TopologyState::Connected => {}
            TopologyState::Disconnected | TopologyState::Connecting => {
                return Err(TopologyError::NotConnected)
            }
            TopologyState::Disconnecting | TopologyState::Closed => {
                return Err(TopologyError::TopologyClosed)
            }
        }

        // Fast path: no subscription, no deadline, cancellation not consulted
        let current = self.description();
        let suitable = select_from_description(&current, state.selector)?;
        if !suitable.is_empty() {
            if let Some(selected) = self.pick(&suitable)? {
                return Ok(selected);
            }
        }

        let mut subscription = self.subscribe()?;
        let deadline = state
            .deadline
            .unwrap_or_else(|| Instant::now() + self.inner.config.server_selection_timeout());
        let mut skip_current = false;
        loop {
            let suitable = select_from_subscription(
                cancel,
                &mut subscription,
                state.selector,
                deadline,
                skip_current,
            )
            .await?;
            if let Some(selected) = self.pick(&suitable)? {
                debug!("Selected {} for topology {}", selected.address(), self.inner.id);
                return Ok(selected);
            }
            // The pick raced a membership change; wait for its publish
            skip_current = true;
        }
    }

    fn pick(&self, suitable: &[Arc<MemberDescription>]) -> Result<Option<SelectedServer>> {
        let chosen = match suitable.len() {
            0 => return Ok(None),
            1 => &suitable[0],
            len => &suitable[self.inner.random.pick(len) % len],
        };
        self.inner.find_server(&chosen.address)
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("description", &self.inner.description.load().kind)
            .finish()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let servers = self.inner.servers.lock();
        let desc = self.inner.description.load();
        write!(f, "Topology {} (Type: {}), Servers: [", self.inner.id, desc.kind)?;
        for (i, server) in servers.values().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", server)?;
        }
        f.write_str("]")
    }
}
