//! Pure artifact attribution logic over [`WorkflowState`].
//!
//! First-writer-wins: the task that first records a filename keeps `creator`
//! and `created_at` forever; later records only bump `last_modified`.

use chrono::{DateTime, Utc};

use crate::core::types::{FileRecord, WorkflowState};

/// Upsert the ledger entry for `filename`, returning the resulting record.
pub fn record(
    state: &mut WorkflowState,
    filename: &str,
    creator: &str,
    now: DateTime<Utc>,
) -> FileRecord {
    let entry = state
        .files
        .entry(filename.to_string())
        .or_insert_with(|| FileRecord {
            creator: creator.to_string(),
            created_at: now,
            last_modified: now,
        });
    entry.last_modified = now;
    entry.clone()
}

/// Look up the ledger entry for `filename`. `None` is the typed not-found.
pub fn lookup<'a>(state: &'a WorkflowState, filename: &str) -> Option<&'a FileRecord> {
    state.files.get(filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("timestamp")
    }

    #[test]
    fn first_record_sets_creator_and_created_at() {
        let mut state = WorkflowState::default();
        let rec = record(&mut state, "requirements.md", "pm_task", at(100));
        assert_eq!(rec.creator, "pm_task");
        assert_eq!(rec.created_at, at(100));
        assert_eq!(rec.last_modified, at(100));
    }

    #[test]
    fn rerecord_keeps_attribution_and_bumps_last_modified() {
        let mut state = WorkflowState::default();
        record(&mut state, "requirements.md", "pm_task", at(100));
        let rec = record(&mut state, "requirements.md", "review_task", at(200));

        assert_eq!(rec.creator, "pm_task", "creator is first-writer-wins");
        assert_eq!(rec.created_at, at(100));
        assert_eq!(rec.last_modified, at(200));
        assert_eq!(state.files.len(), 1);
    }

    #[test]
    fn lookup_miss_is_none() {
        let state = WorkflowState::default();
        assert!(lookup(&state, "missing.md").is_none());
    }
}
