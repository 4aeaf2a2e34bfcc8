//! Admission ordering.
//!
//! Pure functions over task snapshots: which queued tasks are eligible,
//! in what order, and what priorities a user-supplied ordering maps to.
//!
//! # Design
//!
//! - No async, no IO, no tracing
//! - Deterministic: same inputs always produce same outputs
//! - The scheduler re-reads the store before every admission pass, so
//!   nothing here is cached between passes

use std::cmp::Ordering;

use tapedeck_core::{DownloadTask, TaskId};

/// Admission order: higher priority first, then earlier enqueue.
///
/// The task id breaks remaining ties so the order is total.
pub fn admission_cmp(a: &DownloadTask, b: &DownloadTask) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.enqueue_seq.cmp(&b.enqueue_seq))
        .then_with(|| a.id.as_str().cmp(b.id.as_str()))
}

/// Filter to admissible tasks and sort them in admission order.
pub fn admission_candidates(tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
    let mut candidates: Vec<_> = tasks
        .into_iter()
        .filter(DownloadTask::is_admissible)
        .collect();
    candidates.sort_by(admission_cmp);
    candidates
}

/// Free transfer slots given the configured limit and the running count.
pub fn free_slots(max_concurrent: u32, running: u64) -> usize {
    usize::try_from(u64::from(max_concurrent).saturating_sub(running)).unwrap_or(usize::MAX)
}

/// Priorities for an explicit ordering: the first id gets `len`, the last `1`.
///
/// Duplicate ids keep their first position.
pub fn reorder_priorities(ordered: &[TaskId]) -> Vec<(TaskId, i32)> {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<&TaskId> = ordered.iter().filter(|id| seen.insert(*id)).collect();
    let len = i32::try_from(unique.len()).unwrap_or(i32::MAX);

    unique
        .into_iter()
        .zip(0..)
        .map(|(id, index)| (id.clone(), len.saturating_sub(index)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tapedeck_core::{TaskStatus, TrackFile};

    fn task(name: &str, priority: i32, seq: i64) -> DownloadTask {
        let file = TrackFile::new(name, format!("file:///src/{name}"));
        DownloadTask::queued("rec", &file, priority, seq, Utc::now())
    }

    fn names(tasks: &[DownloadTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.track_filename.as_str()).collect()
    }

    #[test]
    fn test_priority_then_fifo() {
        let a = task("a", 0, 1);
        let b = task("b", 5, 2);
        let c = task("c", 0, 3);

        let ordered = admission_candidates(vec![c, a, b]);
        assert_eq!(names(&ordered), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_candidates_skip_marked_and_non_queued() {
        let a = task("a", 0, 1);
        let mut b = task("b", 0, 2);
        b.is_marked_for_deletion = true;
        b.deletion_timestamp = Some(Utc::now());
        let mut c = task("c", 0, 3);
        c.status = TaskStatus::Paused;
        let mut d = task("d", 0, 4);
        d.status = TaskStatus::Downloading;

        let ordered = admission_candidates(vec![a, b, c, d]);
        assert_eq!(names(&ordered), vec!["a"]);
    }

    #[test]
    fn test_free_slots() {
        assert_eq!(free_slots(2, 0), 2);
        assert_eq!(free_slots(2, 2), 0);
        // Over-subscribed after a config change never underflows
        assert_eq!(free_slots(1, 3), 0);
    }

    #[test]
    fn test_reorder_priorities() {
        let ids: Vec<TaskId> = ["x", "y", "z"].into_iter().map(TaskId::from_raw).collect();
        let priorities = reorder_priorities(&ids);

        assert_eq!(
            priorities,
            vec![
                (TaskId::from_raw("x"), 3),
                (TaskId::from_raw("y"), 2),
                (TaskId::from_raw("z"), 1),
            ]
        );
    }

    #[test]
    fn test_reorder_ignores_duplicates() {
        let ids: Vec<TaskId> = ["x", "y", "x"].into_iter().map(TaskId::from_raw).collect();
        let priorities = reorder_priorities(&ids);
        assert_eq!(priorities.len(), 2);
        assert_eq!(priorities[0], (TaskId::from_raw("x"), 2));
    }
}
