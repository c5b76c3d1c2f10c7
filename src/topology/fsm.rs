//! Cluster state machine.
//!
//! Folds one member observation into the previous cluster description and
//! reports which addresses started or stopped being tracked. The fold is pure:
//! the coordinator supplies the previous description and persists the result.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::election::ElectionOrdering;
use crate::error::CompatibilityError;
use crate::types::{
    Address, ClusterDescription, ClusterKind, ElectionMarkers, MemberDescription, MemberKind,
    VersionRange,
};

/// Outcome of folding one observation
#[derive(Debug, Clone)]
pub struct Transition {
    pub description: ClusterDescription,
    /// Addresses that must start being monitored
    pub added: Vec<Address>,
    /// Addresses that must stop being monitored
    pub removed: Vec<Address>,
    /// False when the observation was for an address that is not tracked
    pub applied: bool,
}

impl Transition {
    fn ignored(previous: &ClusterDescription) -> Self {
        Self {
            description: previous.clone(),
            added: Vec::new(),
            removed: Vec::new(),
            applied: false,
        }
    }
}

pub struct Fsm<'a> {
    ordering: &'a dyn ElectionOrdering,
    wire_versions: VersionRange,
    min_server_version: &'a str,
}

impl<'a> Fsm<'a> {
    pub fn new(
        ordering: &'a dyn ElectionOrdering,
        wire_versions: VersionRange,
        min_server_version: &'a str,
    ) -> Self {
        Self { ordering, wire_versions, min_server_version }
    }

    pub fn apply(&self, previous: &ClusterDescription, member: MemberDescription) -> Transition {
        if !previous.members.contains_key(&member.address) {
            debug!("Ignoring observation for untracked member {}", member.address);
            return Transition::ignored(previous);
        }

        let mut step = Step {
            fsm: self,
            desc: previous.clone(),
            added: Vec::new(),
            removed: Vec::new(),
        };
        step.desc.version = previous.version + 1;

        match previous.kind {
            ClusterKind::Single => step.store(member),
            ClusterKind::Unknown => step.update_unknown(member),
            ClusterKind::Sharded => step.update_sharded(member),
            ClusterKind::ReplicaSetNoPrimary | ClusterKind::ReplicaSetWithPrimary => {
                step.update_replica_set(member)
            }
        }
        step.check_if_has_primary();

        let mut description = step.desc;
        description.session_timeout_minutes = session_timeout(&description);
        description.compatibility_error = self.check_compatibility(&description);

        Transition {
            description,
            added: step.added,
            removed: step.removed,
            applied: true,
        }
    }

    fn check_compatibility(&self, desc: &ClusterDescription) -> Option<CompatibilityError> {
        desc.members().find_map(|member| {
            let range = member.wire_version?;
            if range.min > self.wire_versions.max {
                Some(CompatibilityError::MinWireVersionTooHigh {
                    address: member.address.clone(),
                    required: range.min,
                    supported_max: self.wire_versions.max,
                })
            } else if range.max < self.wire_versions.min {
                Some(CompatibilityError::MaxWireVersionTooLow {
                    address: member.address.clone(),
                    reported: range.max,
                    required_min: self.wire_versions.min,
                    min_server_version: self.min_server_version.to_string(),
                })
            } else {
                None
            }
        })
    }
}

/// Minimum timeout over data-bearing members, `None` if any of them lacks one
pub fn session_timeout(desc: &ClusterDescription) -> Option<u32> {
    let mut timeout: Option<u32> = None;
    for member in desc.members().filter(|m| m.is_data_bearing()) {
        let minutes = member.session_timeout_minutes?;
        timeout = Some(timeout.map_or(minutes, |current| current.min(minutes)));
    }
    timeout
}

struct Step<'f, 'a> {
    fsm: &'f Fsm<'a>,
    desc: ClusterDescription,
    added: Vec<Address>,
    removed: Vec<Address>,
}

impl Step<'_, '_> {
    fn store(&mut self, member: MemberDescription) {
        self.desc.members.insert(member.address.clone(), Arc::new(member));
    }

    fn track(&mut self, address: &Address) {
        if !self.desc.members.contains_key(address) {
            self.desc.members.insert(address.clone(), Arc::new(MemberDescription::unknown(address.clone())));
            self.removed.retain(|a| a != address);
            self.added.push(address.clone());
        }
    }

    fn untrack(&mut self, address: &Address) {
        if self.desc.members.remove(address).is_some() {
            debug!("Removing {} from the topology", address);
            if let Some(pos) = self.added.iter().position(|a| a == address) {
                self.added.remove(pos);
            } else {
                self.removed.push(address.clone());
            }
        }
    }

    fn update_unknown(&mut self, member: MemberDescription) {
        match member.kind {
            MemberKind::Standalone => {
                self.desc.kind = ClusterKind::Single;
                let others: Vec<Address> = self
                    .desc
                    .addresses()
                    .filter(|a| **a != member.address)
                    .cloned()
                    .collect();
                for address in &others {
                    self.untrack(address);
                }
                self.store(member);
            }
            MemberKind::Mongos => {
                self.desc.kind = ClusterKind::Sharded;
                self.store(member);
            }
            MemberKind::RsPrimary => {
                self.desc.kind = ClusterKind::ReplicaSetNoPrimary;
                self.update_from_primary(member);
            }
            MemberKind::RsSecondary | MemberKind::RsArbiter | MemberKind::RsOther => {
                self.desc.kind = ClusterKind::ReplicaSetNoPrimary;
                self.update_without_primary(member);
            }
            MemberKind::Unknown | MemberKind::RsGhost => self.store(member),
        }
    }

    fn update_sharded(&mut self, member: MemberDescription) {
        match member.kind {
            MemberKind::Mongos | MemberKind::Unknown => self.store(member),
            _ => self.untrack(&member.address),
        }
    }

    fn update_replica_set(&mut self, member: MemberDescription) {
        match member.kind {
            MemberKind::Standalone | MemberKind::Mongos => self.untrack(&member.address),
            MemberKind::RsPrimary => self.update_from_primary(member),
            MemberKind::RsSecondary | MemberKind::RsArbiter | MemberKind::RsOther => {
                if self.desc.kind == ClusterKind::ReplicaSetWithPrimary {
                    self.update_with_primary_from_member(member);
                } else {
                    self.update_without_primary(member);
                }
            }
            MemberKind::Unknown | MemberKind::RsGhost => self.store(member),
        }
    }

    /// Adopts the set name if none is known yet; false on mismatch
    fn accept_set_name(&mut self, member: &MemberDescription) -> bool {
        match &self.desc.set_name {
            None => {
                self.desc.set_name = member.set_name.clone();
                true
            }
            Some(name) if member.set_name.as_ref() == Some(name) => true,
            Some(name) => {
                warn!(
                    "Member {} reports set name {:?}, expected {}",
                    member.address, member.set_name, name
                );
                false
            }
        }
    }

    fn update_without_primary(&mut self, member: MemberDescription) {
        if !self.accept_set_name(&member) {
            self.untrack(&member.address);
            return;
        }
        let listed: Vec<Address> = member.membership().cloned().collect();
        self.store(member);
        for address in &listed {
            self.track(address);
        }
    }

    fn update_with_primary_from_member(&mut self, member: MemberDescription) {
        if !self.accept_set_name(&member) {
            self.untrack(&member.address);
            return;
        }
        self.store(member);
    }

    fn update_from_primary(&mut self, member: MemberDescription) {
        if !self.accept_set_name(&member) {
            self.untrack(&member.address);
            return;
        }

        let address = member.address.clone();
        let reported = member.election_markers();
        let recorded = ElectionMarkers {
            set_version: self.desc.max_set_version,
            election_id: self.desc.max_election_id,
        };
        let other_primary = self
            .desc
            .members()
            .any(|m| m.kind == MemberKind::RsPrimary && m.address != address);

        let ordering = self.fsm.ordering.compare(&reported, &recorded);
        let stale = match ordering {
            Some(Ordering::Less) => true,
            Some(Ordering::Equal) => other_primary,
            _ => false,
        };
        if stale {
            warn!(
                "Rejecting stale primary {} (set version {:?}, election id {:?})",
                address, reported.set_version, reported.election_id
            );
            self.store(MemberDescription::unknown(address));
            return;
        }

        match ordering {
            Some(_) => {
                self.desc.max_set_version = reported.set_version;
                self.desc.max_election_id = reported.election_id;
            }
            None => {
                if let Some(set_version) = reported.set_version {
                    if self.desc.max_set_version.map_or(true, |max| set_version > max) {
                        self.desc.max_set_version = Some(set_version);
                    }
                }
            }
        }

        let demoted: Vec<Address> = self
            .desc
            .members()
            .filter(|m| m.kind == MemberKind::RsPrimary && m.address != address)
            .map(|m| m.address.clone())
            .collect();
        for old in demoted {
            debug!("Demoting previous primary {} in favour of {}", old, address);
            self.store(MemberDescription::unknown(old));
        }

        let listed: BTreeSet<Address> = member.membership().cloned().collect();
        self.store(member);
        self.desc.kind = ClusterKind::ReplicaSetWithPrimary;

        for listed_address in &listed {
            self.track(listed_address);
        }
        // The primary's list is authoritative, even about the primary itself
        let unlisted: Vec<Address> = self
            .desc
            .addresses()
            .filter(|a| !listed.contains(*a))
            .cloned()
            .collect();
        for stale_address in &unlisted {
            self.untrack(stale_address);
        }
    }

    fn check_if_has_primary(&mut self) {
        if self.desc.kind.is_replica_set() {
            self.desc.kind = if self.desc.primary().is_some() {
                ClusterKind::ReplicaSetWithPrimary
            } else {
                ClusterKind::ReplicaSetNoPrimary
            };
        }
    }
}
