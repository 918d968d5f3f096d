use crate::{HistoryEntry, Snapshot};
use std::cmp::Ordering;

/// Number of history rows the dashboard keeps on screen.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentEntry<'a> {
    pub machine: &'a str,
    pub repo: &'a str,
    pub entry: &'a HistoryEntry,
    position: usize,
}

/// Most recent first. Entries with neither timestamp compare as oldest.
pub fn compare_recency(a: &HistoryEntry, b: &HistoryEntry) -> Ordering {
    match (a.recency(), b.recency()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_recent(a: &RecentEntry<'_>, b: &RecentEntry<'_>) -> Ordering {
    compare_recency(a.entry, b.entry)
        .then_with(|| a.repo.cmp(b.repo))
        .then_with(|| a.entry.name.cmp(&b.entry.name))
        .then_with(|| a.entry.task.cmp(&b.entry.task))
        .then_with(|| a.machine.cmp(b.machine))
        .then_with(|| a.position.cmp(&b.position))
}

/// Task history across every repository, newest first, capped at `limit`
/// rows (`0` keeps everything).
pub fn recent_history(snapshot: &Snapshot, limit: usize) -> Vec<RecentEntry<'_>> {
    let mut rows: Vec<RecentEntry<'_>> = snapshot
        .repositories()
        .flat_map(|(machine, repo_name, repo)| {
            repo.task_history
                .iter()
                .enumerate()
                .map(move |(position, entry)| RecentEntry {
                    machine,
                    repo: repo_name,
                    entry,
                    position,
                })
        })
        .collect();
    rows.sort_by(compare_recent);
    if limit > 0 {
        rows.truncate(limit);
    }
    rows
}
