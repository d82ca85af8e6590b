use std::collections::BTreeMap;

use serde::Serialize;

use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub file: String,
    pub line: u32,
    pub id: i64,
}

/// Client-side breakpoint table, keyed by normalised file path.
///
/// This is the source of truth: the engine forgets its breakpoints when it
/// disconnects, so the whole table is replayed on every new connection.
#[derive(Debug)]
pub struct BreakpointTable {
    next_id: i64,
    by_file: BTreeMap<String, Vec<Breakpoint>>,
}

impl Default for BreakpointTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            by_file: BTreeMap::new(),
        }
    }
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breakpoint. Adding an existing `(file, line)` returns the
    /// existing entry and `false`.
    pub fn add(&mut self, file: &str, line: u32) -> (Breakpoint, bool) {
        let file = paths::normalize(file);
        let entries = self.by_file.entry(file.clone()).or_default();
        if let Some(existing) = entries.iter().find(|bp| bp.line == line) {
            return (existing.clone(), false);
        }
        let bp = Breakpoint {
            file,
            line,
            id: self.next_id,
        };
        self.next_id += 1;
        entries.push(bp.clone());
        (bp, true)
    }

    pub fn remove(&mut self, file: &str, line: u32) -> Option<Breakpoint> {
        let file = paths::normalize(file);
        let entries = self.by_file.get_mut(&file)?;
        let index = entries.iter().position(|bp| bp.line == line)?;
        let removed = entries.remove(index);
        if entries.is_empty() {
            self.by_file.remove(&file);
        }
        Some(removed)
    }

    /// Makes `file` hold exactly `lines`. Returns the resulting breakpoints
    /// sorted by line plus the ones that were added and removed.
    pub fn sync_file(&mut self, file: &str, lines: &[u32]) -> SyncResult {
        let normalized = paths::normalize(file);
        let existing: Vec<u32> = self
            .by_file
            .get(&normalized)
            .map(|entries| entries.iter().map(|bp| bp.line).collect())
            .unwrap_or_default();

        let mut result = SyncResult::default();
        for line in existing {
            if !lines.contains(&line) {
                if let Some(bp) = self.remove(&normalized, line) {
                    result.removed.push(bp);
                }
            }
        }
        for &line in lines {
            let (bp, added) = self.add(&normalized, line);
            if added {
                result.added.push(bp);
            }
        }
        result.current = self.for_file(&normalized);
        result
    }

    pub fn for_file(&self, file: &str) -> Vec<Breakpoint> {
        let mut list = self
            .by_file
            .get(&paths::normalize(file))
            .cloned()
            .unwrap_or_default();
        list.sort_by_key(|bp| bp.line);
        list
    }

    /// Every breakpoint, grouped by file then sorted by line.
    pub fn all(&self) -> Vec<Breakpoint> {
        self.by_file
            .keys()
            .flat_map(|file| self.for_file(file))
            .collect()
    }

    pub fn contains(&self, file: &str, line: u32) -> bool {
        self.by_file
            .get(&paths::normalize(file))
            .is_some_and(|entries| entries.iter().any(|bp| bp.line == line))
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub current: Vec<Breakpoint>,
    pub added: Vec<Breakpoint>,
    pub removed: Vec<Breakpoint>,
}
