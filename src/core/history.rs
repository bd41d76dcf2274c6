//! History records for regions that declare a history pseudostate.
//!
//! A record is written each time the composite owning such a region is
//! exited and holds the region's active subtree at that moment. The first
//! entry is the region's direct active child (what shallow history restores);
//! the rest are the nested active states below it (what deep history adds).

use super::state::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Active subtree of one region captured at exit time.
///
/// # Example
///
/// ```rust
/// use statechart::core::HistoryRecord;
/// use statechart::state_enum;
///
/// state_enum! { enum Phase { Outer, Inner } }
///
/// let record = HistoryRecord::new(vec![Phase::Outer, Phase::Inner]);
/// assert_eq!(record.shallow(), Some(&Phase::Outer));
/// assert_eq!(record.deep().len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct HistoryRecord<S: State> {
    /// Direct child first, then nested active states in pre-order.
    pub states: Vec<S>,
    /// When the owning composite was exited
    pub recorded_at: DateTime<Utc>,
}

impl<S: State> HistoryRecord<S> {
    pub fn new(states: Vec<S>) -> Self {
        Self {
            states,
            recorded_at: Utc::now(),
        }
    }

    /// The direct child that was active.
    pub fn shallow(&self) -> Option<&S> {
        self.states.first()
    }

    /// Every state of the recorded subtree.
    pub fn deep(&self) -> &[S] {
        &self.states
    }
}

/// History records keyed by the id of the history pseudostate.
///
/// Records are created lazily on the first exit and overwritten on every
/// subsequent one.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecords<S: State> {
    records: HashMap<S, HistoryRecord<S>>,
}

impl<S: State> Default for HistoryRecords<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> HistoryRecords<S> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Record (or overwrite) the subtree remembered by `pseudostate`.
    pub fn record(&mut self, pseudostate: S, states: Vec<S>) {
        self.records
            .insert(pseudostate, HistoryRecord::new(states));
    }

    /// Insert a record as-is, keeping its timestamp.
    pub fn insert(&mut self, pseudostate: S, record: HistoryRecord<S>) {
        self.records.insert(pseudostate, record);
    }

    pub fn get(&self, pseudostate: &S) -> Option<&HistoryRecord<S>> {
        self.records.get(pseudostate)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&S, &HistoryRecord<S>)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
    enum TestState {
        History,
        Outer,
        Inner,
        Other,
    }

    impl State for TestState {
        fn name(&self) -> &str {
            match self {
                Self::History => "History",
                Self::Outer => "Outer",
                Self::Inner => "Inner",
                Self::Other => "Other",
            }
        }
    }

    #[test]
    fn new_records_are_empty() {
        let records: HistoryRecords<TestState> = HistoryRecords::new();
        assert!(records.is_empty());
        assert!(records.get(&TestState::History).is_none());
    }

    #[test]
    fn record_is_created_lazily_and_overwritten() {
        let mut records = HistoryRecords::new();
        records.record(TestState::History, vec![TestState::Outer, TestState::Inner]);
        assert_eq!(records.len(), 1);

        records.record(TestState::History, vec![TestState::Other]);
        assert_eq!(records.len(), 1);

        let record = records.get(&TestState::History).unwrap();
        assert_eq!(record.shallow(), Some(&TestState::Other));
        assert_eq!(record.deep(), &[TestState::Other]);
    }

    #[test]
    fn later_records_have_later_timestamps() {
        let mut records = HistoryRecords::new();
        records.record(TestState::History, vec![TestState::Outer]);
        let first = records.get(&TestState::History).unwrap().recorded_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        records.record(TestState::History, vec![TestState::Inner]);
        let second = records.get(&TestState::History).unwrap().recorded_at;

        assert!(second > first);
    }

    #[test]
    fn record_serializes_correctly() {
        let record = HistoryRecord::new(vec![TestState::Outer, TestState::Inner]);
        let json = serde_json::to_string(&record).unwrap();
        let deserialized: HistoryRecord<TestState> = serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }
}
