//! Snoop graph: one-way relay of a session's I/O to another observing
//! session (or, for `snoop_by`, any host object — not necessarily a
//! session).

use std::collections::HashMap;

pub type SessionId = usize;

/// A host object reference, either a session or something else the host
/// language tracks. Kept opaque here; the scheduler resolves it when
/// relaying output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Observer {
    Session(SessionId),
    HostObject(u64),
}

#[derive(Debug, Default)]
pub struct SnoopGraph {
    /// session -> session it is observing.
    snoop_on: HashMap<SessionId, SessionId>,
    /// session -> observer watching it.
    snoop_by: HashMap<SessionId, Observer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopError {
    WouldCycle,
}

impl SnoopGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snoop_on(&self, session: SessionId) -> Option<SessionId> {
        self.snoop_on.get(&session).copied()
    }

    pub fn snoop_by(&self, session: SessionId) -> Option<Observer> {
        self.snoop_by.get(&session).copied()
    }

    /// Attach `by` as an observer of `on`. Rejected if it would create a
    /// cycle (walking `snoop_on` from `on` and finding `by` among the
    /// sessions it already transitively watches).
    pub fn set_snoop(&mut self, by: SessionId, on: SessionId) -> Result<(), SnoopError> {
        if self.would_cycle(by, on) {
            return Err(SnoopError::WouldCycle);
        }
        self.snoop_on.insert(by, on);
        self.snoop_by.insert(on, Observer::Session(by));
        Ok(())
    }

    /// Attach a non-session host object as the observer of `on`.
    pub fn set_snoop_by_host_object(&mut self, object: u64, on: SessionId) {
        self.snoop_by.insert(on, Observer::HostObject(object));
    }

    fn would_cycle(&self, by: SessionId, on: SessionId) -> bool {
        if by == on {
            return true;
        }
        let mut visited = std::collections::HashSet::new();
        let mut cursor = on;
        while let Some(&next) = self.snoop_on.get(&cursor) {
            if !visited.insert(cursor) {
                // Already-present cycle elsewhere in the graph; don't
                // loop forever walking it.
                break;
            }
            if next == by {
                return true;
            }
            cursor = next;
        }
        false
    }

    /// Dissolve every snoop relationship touching `session`, on a
    /// disconnect or explicit stop.
    pub fn dissolve(&mut self, session: SessionId) {
        self.snoop_on.remove(&session);
        self.snoop_by.remove(&session);
        self.snoop_on.retain(|_, on| *on != session);
        self.snoop_by.retain(|_, by| *by != Observer::Session(session));
    }

    pub fn has_cycle(&self) -> bool {
        for &start in self.snoop_on.keys() {
            let mut visited = std::collections::HashSet::new();
            let mut cursor = start;
            loop {
                if !visited.insert(cursor) {
                    return true;
                }
                match self.snoop_on.get(&cursor) {
                    Some(&next) => cursor = next,
                    None => break,
                }
            }
        }
        false
    }
}

/// Prefix applied when relaying output from a snooped session to an
/// interactive snooper.
pub const SNOOP_PREFIX: &[u8] = b"%";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_snoop_records_both_directions() {
        let mut graph = SnoopGraph::new();
        graph.set_snoop(1, 2).unwrap();
        assert_eq!(graph.snoop_on(1), Some(2));
        assert_eq!(graph.snoop_by(2), Some(Observer::Session(1)));
    }

    #[test]
    fn direct_cycle_rejected() {
        let mut graph = SnoopGraph::new();
        graph.set_snoop(1, 2).unwrap();
        let err = graph.set_snoop(2, 1).unwrap_err();
        assert_eq!(err, SnoopError::WouldCycle);
    }

    #[test]
    fn transitive_cycle_rejected() {
        let mut graph = SnoopGraph::new();
        graph.set_snoop(1, 2).unwrap();
        graph.set_snoop(2, 3).unwrap();
        let err = graph.set_snoop(3, 1).unwrap_err();
        assert_eq!(err, SnoopError::WouldCycle);
    }

    #[test]
    fn self_snoop_rejected() {
        let mut graph = SnoopGraph::new();
        let err = graph.set_snoop(1, 1).unwrap_err();
        assert_eq!(err, SnoopError::WouldCycle);
    }

    #[test]
    fn dissolve_removes_both_directions() {
        let mut graph = SnoopGraph::new();
        graph.set_snoop(1, 2).unwrap();
        graph.dissolve(1);
        assert_eq!(graph.snoop_on(1), None);
        assert_eq!(graph.snoop_by(2), None);
    }

    #[test]
    fn graph_stays_acyclic_after_valid_inserts() {
        let mut graph = SnoopGraph::new();
        graph.set_snoop(1, 2).unwrap();
        graph.set_snoop(3, 2).unwrap();
        assert!(!graph.has_cycle());
    }
}
