//! Append-only audit log of every stage visit, per file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::models::StageId;

/// What happened when a stage visited a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageAction {
    Applied,
    Cached,
    /// Stage disabled; input passed through unchanged.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageEntry {
    pub run: u64,
    pub stage: StageId,
    pub action: LineageAction,
    /// Parameters as they were when the stage ran.
    pub config: serde_json::Value,
    pub records_in: usize,
    pub records_out: usize,
    pub excluded: bool,
    pub timestamp: DateTime<Utc>,
}

/// Input/output counts of two adjacent entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageDiff {
    pub from: StageId,
    pub to: StageId,
    pub records_before: usize,
    pub records_after: usize,
    pub removed: usize,
}

/// Entries of one file's in-flight run, committed together when the run completes.
#[derive(Debug, Default)]
pub struct LineageBuffer {
    entries: Vec<LineageEntry>,
}

impl LineageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LineageEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lineage keyed by file name.
///
/// Entries are only ever appended; there is no way to edit or remove one.
#[derive(Debug, Default)]
pub struct LineageTracker {
    files: Mutex<HashMap<String, Vec<LineageEntry>>>,
}

impl LineageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, file: &str, entry: LineageEntry) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(file.to_string())
            .or_default()
            .push(entry);
    }

    /// Append a whole buffered run in order.
    pub fn commit(&self, file: &str, buffer: LineageBuffer) {
        if buffer.is_empty() {
            return;
        }
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(file.to_string())
            .or_default()
            .extend(buffer.entries);
    }

    /// Snapshot of one file's history.
    pub fn history(&self, file: &str) -> Vec<LineageEntry> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(file)
            .cloned()
            .unwrap_or_default()
    }

    /// History of one file restricted to a single run.
    pub fn run_history(&self, file: &str, run: u64) -> Vec<LineageEntry> {
        self.history(file).into_iter().filter(|e| e.run == run).collect()
    }

    /// Before/after comparison of adjacent entries within each run.
    pub fn diffs(&self, file: &str) -> Vec<LineageDiff> {
        self.history(file)
            .windows(2)
            .filter(|pair| pair[0].run == pair[1].run)
            .map(|pair| LineageDiff {
                from: pair[0].stage,
                to: pair[1].stage,
                records_before: pair[1].records_in,
                records_after: pair[1].records_out,
                removed: pair[1].records_in.saturating_sub(pair[1].records_out),
            })
            .collect()
    }

    pub fn files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(run: u64, stage: StageId, records_in: usize, records_out: usize) -> LineageEntry {
        LineageEntry {
            run,
            stage,
            action: LineageAction::Applied,
            config: serde_json::json!({}),
            records_in,
            records_out,
            excluded: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let tracker = LineageTracker::new();
        tracker.append("a.csv", entry(1, StageId::SizeFilter, 10, 10));
        tracker.append("a.csv", entry(1, StageId::HeaderStandardizer, 10, 10));

        let history = tracker.history("a.csv");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].stage, StageId::SizeFilter);
        assert_eq!(history[1].stage, StageId::HeaderStandardizer);
        assert!(tracker.history("missing.csv").is_empty());
    }

    #[test]
    fn test_commit_appends_after_existing_runs() {
        let tracker = LineageTracker::new();
        tracker.append("a.csv", entry(1, StageId::SizeFilter, 10, 10));

        let mut buffer = LineageBuffer::new();
        buffer.push(entry(2, StageId::SizeFilter, 10, 10));
        buffer.push(entry(2, StageId::StaticStartTrimmer, 10, 4));
        tracker.commit("a.csv", buffer);

        assert_eq!(tracker.history("a.csv").len(), 3);
        assert_eq!(tracker.run_history("a.csv", 2).len(), 2);
    }

    #[test]
    fn test_diffs_stay_within_a_run() {
        let tracker = LineageTracker::new();
        tracker.append("a.csv", entry(1, StageId::SizeFilter, 10, 10));
        tracker.append("a.csv", entry(1, StageId::StaticStartTrimmer, 10, 4));
        tracker.append("a.csv", entry(2, StageId::SizeFilter, 10, 10));

        let diffs = tracker.diffs("a.csv");
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].removed, 6);
        assert_eq!(diffs[0].to, StageId::StaticStartTrimmer);
    }
}
