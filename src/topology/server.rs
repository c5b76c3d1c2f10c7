//! Tracked servers and error-triggered invalidation.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::coordinator::TopologyInner;
use super::monitor::MemberMonitor;
use crate::error::MemberError;
use crate::types::{Address, ClusterKind, MemberDescription};

/// What [`Server::process_error`] did with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOutcome {
    /// Stale, benign, or the server is no longer tracked
    NoChange,
    /// The server was marked unknown and its pool generation bumped
    MarkedUnknown,
}

/// One tracked member: its latest description, pool generation and monitor
pub struct Server {
    address: Address,
    description: ArcSwap<MemberDescription>,
    generation: AtomicU64,
    closed: AtomicBool,
    monitor: Mutex<Option<Box<dyn MemberMonitor>>>,
    topology: Weak<TopologyInner>,
}

impl Server {
    pub(crate) fn new(
        description: Arc<MemberDescription>,
        topology: Weak<TopologyInner>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address: description.address.clone(),
            description: ArcSwap::new(description),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            monitor: Mutex::new(None),
            topology,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn description(&self) -> Arc<MemberDescription> {
        self.description.load_full()
    }

    /// Connection-pool generation. Errors raised by connections from an
    /// older generation are ignored.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn set_description(&self, desc: &Arc<MemberDescription>) {
        if !Arc::ptr_eq(&*self.description.load(), desc) {
            self.description.store(desc.clone());
        }
    }

    /// Installs the monitor, stopping it straight away if the server was
    /// retired while the monitor was starting.
    pub(crate) fn attach_monitor(&self, monitor: Box<dyn MemberMonitor>) {
        let mut slot = self.monitor.lock();
        if self.is_closed() {
            drop(slot);
            monitor.stop();
            return;
        }
        *slot = Some(monitor);
    }

    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop();
        }
        debug!("Stopped monitoring {}", self.address);
    }

    fn request_check(&self) {
        if let Some(monitor) = self.monitor.lock().as_ref() {
            monitor.request_check();
        }
    }

    /// Reacts to an error seen on a connection from pool `generation`.
    ///
    /// State-change errors, handshake failures and network errors other than
    /// timeouts mark the member unknown and clear its pool. State changes also
    /// ask the monitor for an immediate check. Anything else, or an error from
    /// an older pool generation, is left alone.
    pub fn process_error(&self, error: &MemberError, generation: u64) -> ErrorOutcome {
        if self.is_closed() {
            return ErrorOutcome::NoChange;
        }
        let current = self.generation();
        if generation < current {
            debug!(
                "Ignoring error from stale pool generation {} (current {}) on {}",
                generation, current, self.address
            );
            return ErrorOutcome::NoChange;
        }
        let invalidates = error.is_state_change()
            || matches!(error, MemberError::Handshake { .. })
            || (error.is_network_error() && !error.is_network_timeout());
        if !invalidates {
            return ErrorOutcome::NoChange;
        }
        let Some(topology) = self.topology.upgrade() else {
            return ErrorOutcome::NoChange;
        };
        // Only the first error of a generation invalidates
        if self
            .generation
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return ErrorOutcome::NoChange;
        }

        warn!("Marking {} unknown after error: {}", self.address, error);
        topology.apply(MemberDescription::failed(self.address.clone(), error.clone()));
        if error.is_state_change() {
            self.request_check();
        }
        ErrorOutcome::MarkedUnknown
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.address)
            .field("kind", &self.description.load().kind)
            .field("generation", &self.generation())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description.load())
    }
}

/// A server picked by selection, stamped with the cluster kind at the time
#[derive(Debug, Clone)]
pub struct SelectedServer {
    server: Arc<Server>,
    cluster_kind: ClusterKind,
}

impl SelectedServer {
    pub(crate) fn new(server: Arc<Server>, cluster_kind: ClusterKind) -> Self {
        Self { server, cluster_kind }
    }

    pub fn address(&self) -> &Address {
        self.server.address()
    }

    pub fn cluster_kind(&self) -> ClusterKind {
        self.cluster_kind
    }

    pub fn description(&self) -> Arc<MemberDescription> {
        self.server.description()
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn generation(&self) -> u64 {
        self.server.generation()
    }

    pub fn process_error(&self, error: &MemberError, generation: u64) -> ErrorOutcome {
        self.server.process_error(error, generation)
    }
}
