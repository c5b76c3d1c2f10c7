//! Seams to the per-member monitors.
//!
//! The topology never talks to servers itself. A [`MonitorFactory`] starts one
//! [`MemberMonitor`] per tracked address, and the monitor pushes every fresh
//! [`MemberDescription`] back through the [`MemberUpdateSink`] it was given.

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use tracing::trace;

use super::coordinator::TopologyInner;
use crate::types::{Address, MemberDescription};

/// A running check loop for one member
pub trait MemberMonitor: Send + Sync {
    /// Ask for a check ahead of the regular heartbeat
    fn request_check(&self) {}

    /// Stop checking; called once when the address stops being tracked
    fn stop(&self);
}

/// Starts monitors for newly tracked addresses.
///
/// `start` is invoked without any topology lock held and may deliver an
/// update through `sink` before returning.
pub trait MonitorFactory: Send + Sync + fmt::Debug {
    fn start(
        &self,
        address: &Address,
        heartbeat_interval: Duration,
        sink: MemberUpdateSink,
    ) -> Box<dyn MemberMonitor>;
}

/// Factory whose monitors never check anything; descriptions arrive only
/// through [`crate::Topology::apply`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassiveMonitorFactory;

struct PassiveMonitor {
    address: Address,
}

impl MemberMonitor for PassiveMonitor {
    fn stop(&self) {
        trace!("Passive monitor for {} stopped", self.address);
    }
}

impl MonitorFactory for PassiveMonitorFactory {
    fn start(
        &self,
        address: &Address,
        _heartbeat_interval: Duration,
        _sink: MemberUpdateSink,
    ) -> Box<dyn MemberMonitor> {
        Box::new(PassiveMonitor { address: address.clone() })
    }
}

/// Where a monitor delivers the descriptions it produces
#[derive(Clone)]
pub struct MemberUpdateSink {
    address: Address,
    topology: Weak<TopologyInner>,
}

impl MemberUpdateSink {
    pub(crate) fn new(address: Address, topology: Weak<TopologyInner>) -> Self {
        Self { address, topology }
    }

    /// Address of the member this sink belongs to
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Folds `desc` into the topology.
    ///
    /// Returns `false` once the topology has been dropped, which tells the
    /// monitor to shut itself down.
    pub fn on_member_update(&self, desc: MemberDescription) -> bool {
        match self.topology.upgrade() {
            Some(inner) => {
                inner.apply(desc);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for MemberUpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberUpdateSink").field("address", &self.address).finish()
    }
}
