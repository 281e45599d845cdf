// Breakpoint manager
//
// Holds the breakpoints the client asked for, per source, plus the active
// exception filters. Both live in watch channels: a new subscriber sees the
// current value right away and is woken on every later change, which is how
// the debuggee re-installs its low-level requests.

use crate::model::{Breakpoint, ExceptionBreakpoint, Source, SourceBreakpoint};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

pub type ExceptionFilters = BTreeSet<ExceptionBreakpoint>;

/// Snapshot of all source breakpoints. `generation` grows with every change;
/// `revisions` holds the generation at which each source was last set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakpointSet {
    pub generation: u64,
    pub by_source: BTreeMap<PathBuf, Vec<Breakpoint>>,
    pub revisions: BTreeMap<PathBuf, u64>,
}

impl BreakpointSet {
    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.by_source.values().flatten()
    }
}

pub struct BreakpointManager {
    breakpoints: watch::Sender<BreakpointSet>,
    exception_filters: watch::Sender<ExceptionFilters>,
    synced_generation: watch::Sender<u64>,
    verified: Mutex<HashSet<i64>>,
    next_id: AtomicI64,
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self {
            breakpoints: watch::Sender::new(BreakpointSet::default()),
            exception_filters: watch::Sender::new(ExceptionFilters::new()),
            synced_generation: watch::Sender::new(0),
            verified: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Replace every breakpoint of `source`. A breakpoint at a line and column
    /// that was already set keeps its id; each old id is handed out at most once.
    /// Returns the new generation and the stored list.
    pub fn set_source_breakpoints(
        &self,
        source: &Source,
        requested: Vec<SourceBreakpoint>,
    ) -> (u64, Vec<Breakpoint>) {
        let mut stored = Vec::with_capacity(requested.len());
        let mut generation = 0;

        self.breakpoints.send_modify(|set| {
            let mut previous = set.by_source.remove(&source.path).unwrap_or_default();

            for bp in requested {
                let reused = previous
                    .iter()
                    .position(|old| {
                        old.position.line == bp.position.line && old.position.column == bp.position.column
                    })
                    .map(|index| previous.remove(index).id);
                let id = reused.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
                stored.push(Breakpoint {
                    id,
                    position: bp.position,
                    condition: bp.condition,
                });
            }

            set.generation += 1;
            generation = set.generation;
            if stored.is_empty() {
                set.revisions.remove(&source.path);
            } else {
                set.by_source.insert(source.path.clone(), stored.clone());
                set.revisions.insert(source.path.clone(), generation);
            }
        });

        debug!(
            "Breakpoints for {} replaced ({} set, generation {})",
            source.path.display(),
            stored.len(),
            generation
        );
        (generation, stored)
    }

    pub fn set_exception_filters(&self, filters: ExceptionFilters) {
        self.exception_filters.send_if_modified(|current| {
            if *current == filters {
                false
            } else {
                *current = filters;
                true
            }
        });
    }

    /// Observe the breakpoint set; the receiver starts out with the current value
    pub fn breakpoints(&self) -> watch::Receiver<BreakpointSet> {
        self.breakpoints.subscribe()
    }

    pub fn exception_filters(&self) -> watch::Receiver<ExceptionFilters> {
        self.exception_filters.subscribe()
    }

    pub fn current(&self) -> BreakpointSet {
        self.breakpoints.borrow().clone()
    }

    /// Record that a debuggee installed `generation`; `verified` is the complete
    /// set of breakpoints that resolved to at least one location.
    pub fn report_synced(&self, generation: u64, verified: HashSet<i64>) {
        if let Ok(mut current) = self.verified.lock() {
            *current = verified;
        }
        self.synced_generation.send_modify(|g| *g = (*g).max(generation));
    }

    pub fn mark_verified(&self, id: i64) {
        if let Ok(mut current) = self.verified.lock() {
            current.insert(id);
        }
    }

    /// The debuggee is gone; nothing stays installed
    pub fn clear_verified(&self) {
        if let Ok(mut current) = self.verified.lock() {
            current.clear();
        }
    }

    pub fn is_verified(&self, id: i64) -> bool {
        self.verified
            .lock()
            .map(|v| v.contains(&id))
            .unwrap_or(false)
    }

    /// Wait until a debuggee has installed at least `generation`
    pub async fn wait_synced(&self, generation: u64, timeout: Duration) -> bool {
        let mut rx = self.synced_generation.subscribe();
        let synced = tokio::time::timeout(timeout, rx.wait_for(|g| *g >= generation)).await;
        matches!(synced, Ok(Ok(_)))
    }
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;

    fn at(source: &Source, line: u32) -> SourceBreakpoint {
        SourceBreakpoint {
            position: Position {
                source: source.clone(),
                line,
                column: None,
            },
            condition: None,
        }
    }

    #[test]
    fn test_replace_keeps_ids_of_unchanged_lines() {
        let manager = BreakpointManager::new();
        let source = Source::from_path("/w/Main.kt");

        let (g1, first) = manager.set_source_breakpoints(&source, vec![at(&source, 3), at(&source, 7)]);
        let (g2, second) = manager.set_source_breakpoints(&source, vec![at(&source, 7), at(&source, 9)]);

        assert!(g2 > g1);
        assert_eq!(second[0].id, first[1].id);
        assert!(second[1].id > first[1].id);

        let lines: Vec<u32> = manager.current().all().map(|b| b.line()).collect();
        assert_eq!(lines, vec![7, 9]);
    }

    #[test]
    fn test_same_line_breakpoints_keep_distinct_ids() {
        let manager = BreakpointManager::new();
        let source = Source::from_path("/w/Main.kt");
        let columns = || {
            [3, 10]
                .into_iter()
                .map(|column| SourceBreakpoint {
                    position: Position {
                        source: source.clone(),
                        line: 5,
                        column: Some(column),
                    },
                    condition: None,
                })
                .collect::<Vec<_>>()
        };

        let (_, first) = manager.set_source_breakpoints(&source, columns());
        let (_, second) = manager.set_source_breakpoints(&source, columns());

        assert_ne!(second[0].id, second[1].id);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[1].id, first[1].id);

        // Two plain breakpoints on one line cannot both claim the old id
        let (_, third) = manager.set_source_breakpoints(&source, vec![at(&source, 5), at(&source, 5)]);
        assert_ne!(third[0].id, third[1].id);
    }

    #[test]
    fn test_empty_set_removes_source() {
        let manager = BreakpointManager::new();
        let source = Source::from_path("/w/Main.kt");

        manager.set_source_breakpoints(&source, vec![at(&source, 3)]);
        manager.set_source_breakpoints(&source, Vec::new());

        assert!(manager.current().by_source.is_empty());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_current_value_then_changes() {
        let manager = BreakpointManager::new();
        let source = Source::from_path("/w/Main.kt");
        manager.set_source_breakpoints(&source, vec![at(&source, 3)]);

        let mut rx = manager.breakpoints();
        assert_eq!(rx.borrow_and_update().all().count(), 1);

        manager.set_source_breakpoints(&source, vec![at(&source, 3), at(&source, 4)]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().all().count(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_filters_do_not_refire() {
        let manager = BreakpointManager::new();
        let mut rx = manager.exception_filters();
        rx.borrow_and_update();

        manager.set_exception_filters(ExceptionFilters::new());
        assert!(!rx.has_changed().unwrap());

        manager.set_exception_filters([ExceptionBreakpoint::Uncaught].into_iter().collect());
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_synced() {
        let manager = BreakpointManager::new();
        let source = Source::from_path("/w/Main.kt");
        let (generation, stored) = manager.set_source_breakpoints(&source, vec![at(&source, 3)]);

        assert!(!manager.wait_synced(generation, Duration::from_millis(20)).await);

        manager.report_synced(generation, [stored[0].id].into_iter().collect());
        assert!(manager.wait_synced(generation, Duration::from_millis(20)).await);
        assert!(manager.is_verified(stored[0].id));
    }
}
