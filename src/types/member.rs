//! Member Description Types
//!
//! One immutable observation of a single cluster member. A fresh value
//! replaces the previous one on every check; nothing mutates it in place.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use super::Address;
use crate::error::MemberError;

/// Role a member reported for itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MemberKind {
    /// Not yet checked, unreachable, or in an unrecognized state
    #[default]
    Unknown,
    Standalone,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    /// Hidden, starting up or recovering replica-set member
    RsOther,
    /// Replica-set member without a configuration yet
    RsGhost,
    /// Sharded cluster router
    Mongos,
}

impl MemberKind {
    pub fn is_replica_set_member(self) -> bool {
        matches!(
            self,
            MemberKind::RsPrimary
                | MemberKind::RsSecondary
                | MemberKind::RsArbiter
                | MemberKind::RsOther
                | MemberKind::RsGhost
        )
    }

    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            MemberKind::RsPrimary | MemberKind::RsSecondary | MemberKind::Standalone | MemberKind::Mongos
        )
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberKind::Unknown => "Unknown",
            MemberKind::Standalone => "Standalone",
            MemberKind::RsPrimary => "RSPrimary",
            MemberKind::RsSecondary => "RSSecondary",
            MemberKind::RsArbiter => "RSArbiter",
            MemberKind::RsOther => "RSOther",
            MemberKind::RsGhost => "RSGhost",
            MemberKind::Mongos => "Mongos",
        };
        f.write_str(name)
    }
}

/// Inclusive range of wire-protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: i32,
    pub max: i32,
}

impl VersionRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn includes(&self, version: i32) -> bool {
        self.min <= version && version <= self.max
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Twelve-byte identifier a primary receives when it wins an election.
/// Ordered bytewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ElectionId(pub [u8; 12]);

impl From<u64> for ElectionId {
    fn from(counter: u64) -> Self {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&counter.to_be_bytes());
        ElectionId(bytes)
    }
}

impl fmt::Display for ElectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Values a primary reports that order competing primaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElectionMarkers {
    pub set_version: Option<u32>,
    pub election_id: Option<ElectionId>,
}

/// Latest known state of one member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberDescription {
    pub address: Address,
    pub kind: MemberKind,
    pub wire_version: Option<VersionRange>,
    pub round_trip_time: Option<Duration>,
    /// `None` means the member does not support logical sessions
    pub session_timeout_minutes: Option<u32>,
    pub set_name: Option<String>,
    pub hosts: Vec<Address>,
    pub passives: Vec<Address>,
    pub arbiters: Vec<Address>,
    pub set_version: Option<u32>,
    pub election_id: Option<ElectionId>,
    pub tags: BTreeMap<String, String>,
    /// Set while the member is failing
    pub error: Option<MemberError>,
    pub last_update: SystemTime,
}

impl MemberDescription {
    pub fn new(address: impl Into<Address>, kind: MemberKind) -> Self {
        Self {
            address: address.into(),
            kind,
            wire_version: None,
            round_trip_time: None,
            session_timeout_minutes: None,
            set_name: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            set_version: None,
            election_id: None,
            tags: BTreeMap::new(),
            error: None,
            last_update: SystemTime::now(),
        }
    }

    /// Placeholder for an address that has not been checked yet
    pub fn unknown(address: impl Into<Address>) -> Self {
        Self::new(address, MemberKind::Unknown)
    }

    /// Unknown description carrying the failure that caused it
    pub fn failed(address: impl Into<Address>, error: MemberError) -> Self {
        Self { error: Some(error), ..Self::unknown(address) }
    }

    pub fn with_set_name(mut self, set_name: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self
    }

    pub fn with_hosts<I, A>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_passives<I, A>(mut self, passives: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.passives = passives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_arbiters<I, A>(mut self, arbiters: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.arbiters = arbiters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_set_version(mut self, set_version: u32) -> Self {
        self.set_version = Some(set_version);
        self
    }

    pub fn with_election_id(mut self, election_id: impl Into<ElectionId>) -> Self {
        self.election_id = Some(election_id.into());
        self
    }

    pub fn with_session_timeout(mut self, minutes: u32) -> Self {
        self.session_timeout_minutes = Some(minutes);
        self
    }

    pub fn with_wire_version(mut self, min: i32, max: i32) -> Self {
        self.wire_version = Some(VersionRange::new(min, max));
        self
    }

    pub fn with_round_trip_time(mut self, rtt: Duration) -> Self {
        self.round_trip_time = Some(rtt);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn is_data_bearing(&self) -> bool {
        self.kind.is_data_bearing()
    }

    /// Unknown members are never handed to selectors
    pub fn is_selectable(&self) -> bool {
        self.kind != MemberKind::Unknown
    }

    /// Every address this member lists as part of its replica set
    pub fn membership(&self) -> impl Iterator<Item = &Address> {
        self.hosts.iter().chain(self.passives.iter()).chain(self.arbiters.iter())
    }

    pub fn election_markers(&self) -> ElectionMarkers {
        ElectionMarkers { set_version: self.set_version, election_id: self.election_id }
    }
}

impl fmt::Display for MemberDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ Addr: {}, Type: {}", self.address, self.kind)?;
        if let Some(rtt) = self.round_trip_time {
            write!(f, ", Average RTT: {}µs", rtt.as_micros())?;
        }
        if let Some(set_name) = &self.set_name {
            write!(f, ", Set: {}", set_name)?;
        }
        if let Some(err) = &self.error {
            write!(f, ", Last error: {}", err)?;
        }
        f.write_str(" }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_bearing_kinds() {
        assert!(MemberKind::RsPrimary.is_data_bearing());
        assert!(MemberKind::Mongos.is_data_bearing());
        assert!(!MemberKind::RsArbiter.is_data_bearing());
        assert!(!MemberKind::Unknown.is_data_bearing());
    }

    #[test]
    fn test_membership_chains_every_list() {
        let desc = MemberDescription::new("a", MemberKind::RsPrimary)
            .with_hosts(["a", "b"])
            .with_passives(["c"])
            .with_arbiters(["d"]);
        let listed: Vec<_> = desc.membership().map(|a| a.as_str().to_string()).collect();
        assert_eq!(listed, vec!["a:27017", "b:27017", "c:27017", "d:27017"]);
    }

    #[test]
    fn test_election_id_orders_by_counter() {
        assert!(ElectionId::from(2u64) > ElectionId::from(1u64));
        assert_eq!(ElectionId::from(1u64).to_string(), "000000000000000000000001");
    }
}
