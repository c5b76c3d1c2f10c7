//! Cluster Description Types
//!
//! Core types for the aggregated view:
//! - Cluster kind derived from member roles
//! - Ordered member set keyed by address
//! - Session support and compatibility state

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{Address, ElectionId, MemberDescription, MemberKind};
use crate::error::CompatibilityError;

/// Overall shape of the deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterKind {
    /// Nothing informative observed yet
    #[default]
    Unknown,
    /// Direct connection to exactly one member
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    /// One or more routers in front of shards
    Sharded,
}

impl ClusterKind {
    pub fn is_replica_set(self) -> bool {
        matches!(self, ClusterKind::ReplicaSetNoPrimary | ClusterKind::ReplicaSetWithPrimary)
    }
}

impl fmt::Display for ClusterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClusterKind::Unknown => "Unknown",
            ClusterKind::Single => "Single",
            ClusterKind::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            ClusterKind::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            ClusterKind::Sharded => "Sharded",
        };
        f.write_str(name)
    }
}

/// Aggregated view of every tracked member.
///
/// Values are published behind an `Arc` and never modified afterwards; each
/// update produces a new description with a higher `version`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterDescription {
    pub kind: ClusterKind,
    pub members: BTreeMap<Address, Arc<MemberDescription>>,
    /// First replica-set name seen, or the configured one
    pub set_name: Option<String>,
    pub max_set_version: Option<u32>,
    pub max_election_id: Option<ElectionId>,
    /// Minimum over data-bearing members; `None` when sessions are unsupported
    pub session_timeout_minutes: Option<u32>,
    pub compatibility_error: Option<CompatibilityError>,
    pub version: u64,
}

impl ClusterDescription {
    pub fn new(kind: ClusterKind) -> Self {
        Self { kind, ..Default::default() }
    }

    /// Builds a description directly from member observations
    pub fn from_members<I>(kind: ClusterKind, members: I) -> Self
    where
        I: IntoIterator<Item = MemberDescription>,
    {
        let members = members
            .into_iter()
            .map(|member| (member.address.clone(), Arc::new(member)))
            .collect();
        Self { kind, members, ..Default::default() }
    }

    pub fn member(&self, address: &Address) -> Option<&Arc<MemberDescription>> {
        self.members.get(address)
    }

    pub fn members(&self) -> impl Iterator<Item = &Arc<MemberDescription>> {
        self.members.values()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.members.keys()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn primary(&self) -> Option<&Arc<MemberDescription>> {
        self.members().find(|member| member.kind == MemberKind::RsPrimary)
    }

    /// Members a selector may choose from, in address order
    pub fn selectable_members(&self) -> Vec<Arc<MemberDescription>> {
        self.members().filter(|member| member.is_selectable()).cloned().collect()
    }

    /// Any member that can serve reads in some read mode
    pub fn has_readable_server(&self) -> bool {
        self.members().any(|member| {
            matches!(
                member.kind,
                MemberKind::RsPrimary
                    | MemberKind::RsSecondary
                    | MemberKind::Standalone
                    | MemberKind::Mongos
            )
        })
    }

    pub fn has_writable_server(&self) -> bool {
        self.members().any(|member| {
            matches!(member.kind, MemberKind::RsPrimary | MemberKind::Standalone | MemberKind::Mongos)
        })
    }

    pub fn supports_sessions(&self) -> bool {
        self.session_timeout_minutes.is_some()
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type: {}, Servers: [", self.kind)?;
        for (i, member) in self.members().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", member)?;
        }
        f.write_str("]")?;
        if let Some(err) = &self.compatibility_error {
            write!(f, ", Compatibility error: {}", err)?;
        }
        Ok(())
    }
}
