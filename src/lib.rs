pub mod config;
pub mod error;
pub mod logging;
pub mod topology;
pub mod types;

// Re-export common types
pub use config::{ConnectMode, LoggingConfig, TopologyConfig};
pub use error::{
    CompatibilityError, MemberError, Result, SelectionFailure, SelectorError,
    ServerSelectionError, TopologyError,
};
pub use topology::{
    ReadMode, ReadPreference, SelectedServer, ServerSelector, Subscription, Topology,
    WriteSelector,
};
pub use types::{Address, ClusterDescription, ClusterKind, MemberDescription, MemberKind};
