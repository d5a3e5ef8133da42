use chrono::{DateTime, Local};
use heapless::Deque;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

pub const ERROR_LOG_CAPACITY: usize = 20;

const_assert!(ERROR_LOG_CAPACITY > 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// Bounded error history. Once full, each new record evicts the oldest one.
/// Lives for the whole process; state transitions never clear it.
#[derive(Debug, Default)]
pub struct ErrorLog {
    records: Deque<ErrorRecord, ERROR_LOG_CAPACITY>,
    total_recorded: u64,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message: impl Into<String>) {
        self.record_at(Local::now(), message);
    }

    pub fn record_at(&mut self, timestamp: DateTime<Local>, message: impl Into<String>) {
        if self.records.is_full() {
            self.records.pop_front();
        }
        // Cannot fail: a slot was freed above.
        let _ = self.records.push_back(ErrorRecord {
            timestamp,
            message: message.into(),
        });
        self.total_recorded = self.total_recorded.saturating_add(1);
    }

    /// Records in insertion order, oldest first.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records ever appended, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }
}
