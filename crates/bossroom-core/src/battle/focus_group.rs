//! Time allocation across the members of a multi-task session.
//!
//! One clock runs for the whole session; whichever member is active when
//! time passes gets credited. Every switch closes out the interval since the
//! previous switch into the outgoing member's bucket.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::FocusGroupPayload;
use crate::clock::elapsed_ms;

/// A contiguous stretch credited to one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub member_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Segment {
    pub fn duration_ms(&self) -> u64 {
        elapsed_ms(self.start, self.end)
    }
}

/// Per-member totals plus the chronological segment log.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusGroupSummary {
    pub allocations_ms: BTreeMap<String, u64>,
    pub segments: Vec<Segment>,
}

impl FocusGroupSummary {
    pub fn allocation_secs(&self, member_id: &str) -> u64 {
        self.allocations_ms.get(member_id).copied().unwrap_or(0) / 1000
    }

    pub fn total_ms(&self) -> u64 {
        self.allocations_ms.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusGroupSession {
    members: Vec<String>,
    active_index: usize,
    last_switch_at: DateTime<Utc>,
    allocations_ms: BTreeMap<String, u64>,
    segments: Vec<Segment>,
    summary: Option<FocusGroupSummary>,
}

impl FocusGroupSession {
    /// Start tracking at `started_at`.
    ///
    /// Duplicate member ids are dropped (first occurrence wins) and the
    /// active index is clamped into range.
    pub fn new(member_ids: Vec<String>, active_index: usize, started_at: DateTime<Utc>) -> Self {
        let mut members: Vec<String> = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }
        let active_index = active_index.min(members.len().saturating_sub(1));
        let allocations_ms = members.iter().map(|m| (m.clone(), 0)).collect();
        Self {
            members,
            active_index,
            last_switch_at: started_at,
            allocations_ms,
            segments: Vec::new(),
            summary: None,
        }
    }

    pub fn from_payload(payload: &FocusGroupPayload, started_at: DateTime<Utc>) -> Self {
        Self::new(payload.member_ids.clone(), payload.active_index, started_at)
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_member(&self) -> Option<&str> {
        self.members.get(self.active_index).map(String::as_str)
    }

    pub fn is_ended(&self) -> bool {
        self.summary.is_some()
    }

    /// Make `index` the active member.
    ///
    /// Returns false once the session has ended, for an out-of-range index,
    /// or when `index` is already active.
    pub fn switch_to(&mut self, index: usize, at: DateTime<Utc>) -> bool {
        if self.is_ended() || index >= self.members.len() || index == self.active_index {
            return false;
        }
        self.close_out(at);
        self.active_index = index;
        true
    }

    /// Close the final interval and return the summary.
    ///
    /// Calling again returns the summary computed the first time.
    pub fn end(&mut self, at: DateTime<Utc>) -> FocusGroupSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }
        self.close_out(at);
        let summary = FocusGroupSummary {
            allocations_ms: self.allocations_ms.clone(),
            segments: self.segments.clone(),
        };
        self.summary = Some(summary.clone());
        summary
    }

    fn close_out(&mut self, at: DateTime<Utc>) {
        let start = self.last_switch_at;
        let duration = elapsed_ms(start, at);
        if let Some(member) = self.members.get(self.active_index) {
            if duration > 0 {
                *self.allocations_ms.entry(member.clone()).or_insert(0) += duration;
                self.segments.push(Segment {
                    member_id: member.clone(),
                    start,
                    end: at,
                });
            }
        }
        if at > self.last_switch_at {
            self.last_switch_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 9, 0, 0).unwrap()
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allocates_time_between_switches() {
        let t0 = t0();
        let mut session = FocusGroupSession::new(ids(&["A", "B"]), 0, t0);

        assert!(session.switch_to(1, t0 + Duration::seconds(300)));
        let summary = session.end(t0 + Duration::seconds(600));

        assert_eq!(summary.allocation_secs("A"), 300);
        assert_eq!(summary.allocation_secs("B"), 300);
        assert_eq!(summary.segments.len(), 2);
        assert_eq!(summary.segments[0].member_id, "A");
        assert_eq!(summary.segments[1].member_id, "B");
        assert!(summary.segments[0].end <= summary.segments[1].start);
    }

    #[test]
    fn rejects_invalid_switches() {
        let t0 = t0();
        let mut session = FocusGroupSession::new(ids(&["A", "B"]), 0, t0);
        assert!(!session.switch_to(0, t0 + Duration::seconds(5)));
        assert!(!session.switch_to(7, t0 + Duration::seconds(5)));

        session.end(t0 + Duration::seconds(10));
        assert!(!session.switch_to(1, t0 + Duration::seconds(20)));
    }

    #[test]
    fn end_is_idempotent() {
        let t0 = t0();
        let mut session = FocusGroupSession::new(ids(&["A"]), 0, t0);
        let first = session.end(t0 + Duration::seconds(60));
        let second = session.end(t0 + Duration::seconds(600));
        assert_eq!(first, second);
        assert_eq!(second.allocation_secs("A"), 60);
    }

    #[test]
    fn zero_length_intervals_leave_no_segment() {
        let t0 = t0();
        let mut session = FocusGroupSession::new(ids(&["A", "B"]), 0, t0);
        assert!(session.switch_to(1, t0));
        let summary = session.end(t0 + Duration::seconds(30));
        assert_eq!(summary.segments.len(), 1);
        assert_eq!(summary.segments[0].member_id, "B");
        assert_eq!(summary.allocation_secs("A"), 0);
    }

    #[test]
    fn dedupes_members_and_clamps_index() {
        let t0 = t0();
        let session = FocusGroupSession::new(ids(&["A", "B", "A", "C", "B"]), 10, t0);
        assert_eq!(session.members(), &ids(&["A", "B", "C"])[..]);
        assert_eq!(session.active_index(), 2);
        assert_eq!(session.active_member(), Some("C"));
    }

    #[test]
    fn empty_group_never_switches() {
        let t0 = t0();
        let mut session = FocusGroupSession::new(Vec::new(), 3, t0);
        assert_eq!(session.active_member(), None);
        assert!(!session.switch_to(0, t0 + Duration::seconds(1)));
        assert_eq!(session.end(t0 + Duration::seconds(5)).total_ms(), 0);
    }
}
