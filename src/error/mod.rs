use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Address, ClusterDescription};

pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors surfaced by the topology and selection layers
#[derive(Debug, Error, Clone)]
pub enum TopologyError {
    /// A tracked member cannot interoperate with this driver build
    #[error(transparent)]
    Compatibility(#[from] CompatibilityError),

    /// No suitable server was found before the deadline or cancellation
    #[error(transparent)]
    ServerSelection(#[from] ServerSelectionError),

    /// The caller supplied selector failed; surfaced as-is
    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("cannot subscribe to topology updates after the topology has been closed")]
    SubscribeAfterClosed,

    #[error("topology is closed")]
    TopologyClosed,

    #[error("topology is not connected")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl From<io::Error> for TopologyError {
    fn from(e: io::Error) -> Self {
        TopologyError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for TopologyError {
    fn from(e: serde_yaml::Error) -> Self {
        TopologyError::Yaml(e.to_string())
    }
}

impl TopologyError {
    pub fn config(msg: impl Into<String>) -> Self {
        TopologyError::Config(msg.into())
    }
}

/// Wire-version mismatch between a member and this driver build
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompatibilityError {
    #[error(
        "server at {address} requires wire version {required}, but this driver only supports up to {supported_max}"
    )]
    MinWireVersionTooHigh {
        address: Address,
        required: i32,
        supported_max: i32,
    },

    #[error(
        "server at {address} reports wire version {reported}, but this driver requires at least {required_min} (server version {min_server_version})"
    )]
    MaxWireVersionTooLow {
        address: Address,
        reported: i32,
        required_min: i32,
        min_server_version: String,
    },
}

impl CompatibilityError {
    pub fn address(&self) -> &Address {
        match self {
            CompatibilityError::MinWireVersionTooHigh { address, .. } => address,
            CompatibilityError::MaxWireVersionTooLow { address, .. } => address,
        }
    }
}

/// Why a selection loop stopped without a server
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SelectionFailure {
    #[error("context canceled")]
    Cancelled,
    #[error("server selection timeout")]
    TimedOut,
    #[error("topology subscription closed")]
    SubscriptionClosed,
}

/// Selection gave up; carries the last cluster description it evaluated
#[derive(Debug, Error, Clone)]
#[error("server selection error: {cause}, current topology: {description}")]
pub struct ServerSelectionError {
    #[source]
    pub cause: SelectionFailure,
    pub description: Arc<ClusterDescription>,
}

impl ServerSelectionError {
    pub fn new(cause: SelectionFailure, description: Arc<ClusterDescription>) -> Self {
        Self { cause, description }
    }
}

/// Failure reported by a caller supplied selector
#[derive(Debug, Clone)]
pub struct SelectorError(Arc<dyn StdError + Send + Sync>);

impl SelectorError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self(Arc::from(err.into()))
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Self::new(msg.into())
    }

    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

impl fmt::Display for SelectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl StdError for SelectorError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

const NOT_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];

/// Errors observed while talking to one member.
///
/// These never reach selection callers; the invalidator turns them into
/// topology updates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemberError {
    #[error("command failed (code {}): {message}", code.unwrap_or_default())]
    Command { code: Option<i32>, message: String },

    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },

    #[error("handshake failed: {message}")]
    Handshake { message: String },
}

impl MemberError {
    pub fn command(code: Option<i32>, message: impl Into<String>) -> Self {
        MemberError::Command { code, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        MemberError::Network { message: message.into(), timed_out: false }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        MemberError::Network { message: message.into(), timed_out: true }
    }

    /// The member answered but is no longer the primary
    pub fn is_not_primary(&self) -> bool {
        match self {
            MemberError::Command { code: Some(code), .. } if NOT_PRIMARY_CODES.contains(code) => true,
            MemberError::Command { code: None, message } => {
                let lower = message.to_ascii_lowercase();
                !recovering_message(&lower)
                    && (lower.contains("not master") || lower.contains("not primary"))
            }
            _ => false,
        }
    }

    /// The member is still in startup or rollback and cannot serve yet
    pub fn is_node_recovering(&self) -> bool {
        match self {
            MemberError::Command { code: Some(code), .. } if RECOVERING_CODES.contains(code) => true,
            MemberError::Command { code: None, message } => {
                recovering_message(&message.to_ascii_lowercase())
            }
            _ => false,
        }
    }

    pub fn is_state_change(&self) -> bool {
        self.is_not_primary() || self.is_node_recovering()
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, MemberError::Network { .. })
    }

    pub fn is_network_timeout(&self) -> bool {
        matches!(self, MemberError::Network { timed_out: true, .. })
    }
}

fn recovering_message(lower: &str) -> bool {
    lower.contains("node is recovering") || lower.contains("not master or secondary")
}
