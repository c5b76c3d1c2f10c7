//! Topology tracking and server selection.
//!
//! - [`fsm`] folds member observations into cluster descriptions
//! - [`subscription`] fans new descriptions out to waiting selectors
//! - [`selection`] holds the selectors and the selection loop
//! - [`server`] tracks each member and invalidates it on errors
//! - [`coordinator`] ties them together behind [`Topology`]

pub mod coordinator;
pub mod election;
pub mod fsm;
pub mod monitor;
pub mod selection;
pub mod server;
pub mod subscription;

pub use coordinator::{Topology, TopologyBuilder, TopologyState};
pub use election::{ElectionIdFirst, ElectionOrdering, SetVersionFirst};
pub use fsm::{Fsm, Transition};
pub use monitor::{MemberMonitor, MemberUpdateSink, MonitorFactory, PassiveMonitorFactory};
pub use selection::{
    Candidates, CompositeSelector, LatencySelector, RandomSource, ReadMode, ReadPreference,
    SelectorResult, ServerSelector, SmallRngSource, TagSet, WriteSelector,
};
pub use server::{ErrorOutcome, SelectedServer, Server};
pub use subscription::{Subscription, SubscriptionRegistry};
