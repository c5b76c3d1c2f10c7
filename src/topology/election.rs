//! Ordering rules between competing primaries.
//!
//! Which marker takes precedence depends on the replica-set election protocol
//! the cluster runs, so the rule is a trait object the topology is built with.

use std::cmp::Ordering;
use std::fmt;

use crate::types::ElectionMarkers;

/// Decides whether a reported primary is newer than the highest markers
/// recorded for its replica set.
///
/// `None` means the two cannot be ordered (for example the reporter sent no
/// markers at all), and the report is accepted.
pub trait ElectionOrdering: Send + Sync + fmt::Debug {
    fn compare(&self, reported: &ElectionMarkers, recorded: &ElectionMarkers) -> Option<Ordering>;
}

/// Set version first, election id as tie-break. Matches servers whose
/// election ids are only comparable within one configuration version.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetVersionFirst;

impl ElectionOrdering for SetVersionFirst {
    fn compare(&self, reported: &ElectionMarkers, recorded: &ElectionMarkers) -> Option<Ordering> {
        if reported.set_version.is_none() || reported.election_id.is_none() {
            return None;
        }
        Some(
            (reported.set_version, reported.election_id)
                .cmp(&(recorded.set_version, recorded.election_id)),
        )
    }
}

/// Election id first, set version as tie-break, for servers whose election
/// ids grow monotonically across reconfigurations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElectionIdFirst;

impl ElectionOrdering for ElectionIdFirst {
    fn compare(&self, reported: &ElectionMarkers, recorded: &ElectionMarkers) -> Option<Ordering> {
        reported.election_id?;
        Some(
            (reported.election_id, reported.set_version)
                .cmp(&(recorded.election_id, recorded.set_version)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ElectionId;

    fn markers(set_version: Option<u32>, election_id: Option<u64>) -> ElectionMarkers {
        ElectionMarkers { set_version, election_id: election_id.map(ElectionId::from) }
    }

    #[test]
    fn test_set_version_first_prefers_higher_set_version() {
        let rule = SetVersionFirst;
        let recorded = markers(Some(1), Some(9));
        assert_eq!(rule.compare(&markers(Some(2), Some(1)), &recorded), Some(Ordering::Greater));
        assert_eq!(rule.compare(&markers(Some(1), Some(8)), &recorded), Some(Ordering::Less));
        assert_eq!(rule.compare(&markers(Some(1), Some(9)), &recorded), Some(Ordering::Equal));
    }

    #[test]
    fn test_missing_markers_are_unordered() {
        let recorded = markers(Some(3), Some(3));
        assert_eq!(SetVersionFirst.compare(&markers(Some(1), None), &recorded), None);
        assert_eq!(ElectionIdFirst.compare(&markers(Some(9), None), &recorded), None);
    }

    #[test]
    fn test_election_id_first_prefers_higher_election_id() {
        let rule = ElectionIdFirst;
        let recorded = markers(Some(5), Some(1));
        assert_eq!(rule.compare(&markers(Some(1), Some(2)), &recorded), Some(Ordering::Greater));
        assert_eq!(rule.compare(&markers(Some(9), Some(1)), &recorded), Some(Ordering::Greater));
        assert_eq!(rule.compare(&markers(Some(9), Some(0)), &recorded), Some(Ordering::Less));
    }

    #[test]
    fn test_anything_beats_empty_record() {
        let empty = ElectionMarkers::default();
        assert_eq!(SetVersionFirst.compare(&markers(Some(1), Some(1)), &empty), Some(Ordering::Greater));
    }
}
