//! Buzzer press arbitration for a single question
//!
//! The log records accepted presses in acceptance order. Position is assigned at
//! acceptance time and never changes; elapsed time is measured with the host clock
//! from the moment the question went on air.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Rejection;
use crate::types::{DeviceId, GroupId};

/// Device-to-team mapping for the current game.
///
/// Devices without a mapping compete under their own device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    teams: BTreeMap<DeviceId, u32>,
}

impl Roster {
    /// Build a roster from `(device, team)` pairs.
    pub fn from_pairs<I, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (D, u32)>,
        D: Into<DeviceId>,
    {
        Self { teams: pairs.into_iter().map(|(d, t)| (d.into(), t)).collect() }
    }

    /// Assign (or reassign) a device to a team.
    pub fn assign(&mut self, device: impl Into<DeviceId>, team: u32) {
        self.teams.insert(device.into(), team);
    }

    /// Group a press from `device` is arbitrated under.
    pub fn resolve(&self, device: &DeviceId) -> GroupId {
        match self.teams.get(device) {
            Some(team) => GroupId::Team(*team),
            None => GroupId::Device(device.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }
}

/// One accepted press.
#[derive(Debug, Clone, PartialEq)]
pub struct BuzzPress {
    pub group_id: GroupId,
    pub device_id: DeviceId,
    pub host_received_at: Instant,
    /// Coordinator clock at the press, diagnostics only
    pub device_timestamp: Option<u32>,
    /// Host-measured time since the question started
    pub delta_ms: u64,
    /// 1-based rank in acceptance order
    pub position: u32,
    pub evaluated: bool,
    pub is_correct: Option<bool>,
    pub points_awarded: Option<u64>,
}

impl BuzzPress {
    /// Compact form for events.
    pub fn summary(&self) -> PressSummary {
        PressSummary {
            group_id: self.group_id.clone(),
            device_id: self.device_id.clone(),
            position: self.position,
            delta_ms: self.delta_ms,
            evaluated: self.evaluated,
            is_correct: self.is_correct,
            points_awarded: self.points_awarded,
        }
    }
}

/// Serializable view of a press for subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PressSummary {
    pub group_id: GroupId,
    pub device_id: DeviceId,
    pub position: u32,
    pub delta_ms: u64,
    pub evaluated: bool,
    pub is_correct: Option<bool>,
    pub points_awarded: Option<u64>,
}

/// Ordered record of accepted presses for the question on air.
#[derive(Debug, Clone, Default)]
pub struct ArbitrationLog {
    presses: Vec<BuzzPress>,
}

impl ArbitrationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `group` already holds an entry, evaluated or not.
    pub fn has_buzzed(&self, group: &GroupId) -> bool {
        self.presses.iter().any(|p| &p.group_id == group)
    }

    /// Append a press for `group`, measuring elapsed time from `started_at`.
    ///
    /// Rejects a second press from the same group. The caller is responsible for
    /// checking that the question is accepting presses at all.
    pub fn accept(
        &mut self,
        group_id: GroupId,
        device_id: DeviceId,
        device_timestamp: Option<u32>,
        host_received_at: Instant,
        started_at: Instant,
    ) -> Result<&BuzzPress, Rejection> {
        if self.has_buzzed(&group_id) {
            return Err(Rejection::AlreadyBuzzed);
        }

        let delta = host_received_at.saturating_duration_since(started_at);
        let press = BuzzPress {
            group_id,
            device_id,
            host_received_at,
            device_timestamp,
            delta_ms: duration_ms(delta),
            position: self.presses.len() as u32 + 1,
            evaluated: false,
            is_correct: None,
            points_awarded: None,
        };
        self.presses.push(press);
        Ok(&self.presses[self.presses.len() - 1])
    }

    /// Earliest press (by position) that has not been evaluated.
    pub fn next_pending_mut(&mut self) -> Option<&mut BuzzPress> {
        // Presses are stored in position order.
        self.presses.iter_mut().find(|p| !p.evaluated)
    }

    /// Number of presses still waiting for evaluation.
    pub fn pending(&self) -> usize {
        self.presses.iter().filter(|p| !p.evaluated).count()
    }

    pub fn presses(&self) -> &[BuzzPress] {
        &self.presses
    }

    pub fn summaries(&self) -> Vec<PressSummary> {
        self.presses.iter().map(BuzzPress::summary).collect()
    }

    pub fn len(&self) -> usize {
        self.presses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presses.is_empty()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn positions_follow_acceptance_order() {
        let start = Instant::now();
        let mut log = ArbitrationLog::new();

        let a = log.accept(GroupId::Team(1), 1u8.into(), None, start + ms(5_000), start).unwrap().clone();
        let b = log.accept(GroupId::Team(2), 2u8.into(), Some(77), start + ms(6_000), start).unwrap().clone();

        assert_eq!((a.position, a.delta_ms), (1, 5_000));
        assert_eq!((b.position, b.delta_ms), (2, 6_000));
        assert_eq!(b.device_timestamp, Some(77));
        assert_eq!(log.pending(), 2);
    }

    #[test]
    fn same_group_is_rejected_even_from_another_device() {
        let start = Instant::now();
        let roster = Roster::from_pairs([(1u8, 10), (2u8, 10)]);
        let mut log = ArbitrationLog::new();

        let first = roster.resolve(&DeviceId::Hardware(1));
        let second = roster.resolve(&DeviceId::Hardware(2));
        assert!(log.accept(first, 1u8.into(), None, start, start).is_ok());
        assert_eq!(log.accept(second, 2u8.into(), None, start, start).unwrap_err(), Rejection::AlreadyBuzzed);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn evaluated_entries_still_block_their_group() {
        let start = Instant::now();
        let mut log = ArbitrationLog::new();
        log.accept(GroupId::Team(3), 3u8.into(), None, start, start).unwrap();
        log.next_pending_mut().unwrap().evaluated = true;

        assert_eq!(log.pending(), 0);
        assert_eq!(
            log.accept(GroupId::Team(3), 3u8.into(), None, start, start).unwrap_err(),
            Rejection::AlreadyBuzzed
        );
    }

    #[test]
    fn unmapped_devices_fall_back_to_device_identity() {
        let roster = Roster::from_pairs([("phone-1", 4)]);
        assert_eq!(roster.resolve(&DeviceId::from("phone-1")), GroupId::Team(4));
        assert_eq!(roster.resolve(&DeviceId::Hardware(9)), GroupId::Device(DeviceId::Hardware(9)));
    }

    #[test]
    fn press_before_start_has_zero_delta() {
        let start = Instant::now();
        let mut log = ArbitrationLog::new();
        let press = log.accept(GroupId::Team(1), 1u8.into(), None, start, start + ms(10)).unwrap();
        assert_eq!(press.delta_ms, 0);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn one_accept_per_group_regardless_of_order(
                devices in prop::collection::vec(1u8..=8, 1..40)
            ) {
                // Devices 1-4 are team 1, devices 5-8 are team 2.
                let roster = Roster::from_pairs((1u8..=8).map(|d| (d, if d <= 4 { 1 } else { 2 })));
                let start = Instant::now();
                let mut log = ArbitrationLog::new();
                let mut accepted = 0usize;
                let mut rejected = 0usize;

                for (i, device) in devices.iter().enumerate() {
                    let id = DeviceId::Hardware(*device);
                    match log.accept(roster.resolve(&id), id, None, start + ms(i as u64), start) {
                        Ok(_) => accepted += 1,
                        Err(Rejection::AlreadyBuzzed) => rejected += 1,
                        Err(other) => prop_assert!(false, "unexpected rejection {other:?}"),
                    }
                }

                let groups: std::collections::HashSet<bool> = devices.iter().map(|d| *d <= 4).collect();
                prop_assert_eq!(accepted, groups.len());
                prop_assert_eq!(accepted + rejected, devices.len());
            }
        }
    }
}
