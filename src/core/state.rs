use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use serde::Serialize;

/// Lifecycle state of a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServerState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl ServerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServerState::Starting,
            2 => ServerState::Running,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Starting may fall back to Stopped when binding or a start hook fails.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        matches!(
            (self, next),
            (ServerState::Stopped, ServerState::Starting)
                | (ServerState::Starting, ServerState::Running)
                | (ServerState::Starting, ServerState::Stopped)
                | (ServerState::Running, ServerState::Stopping)
                | (ServerState::Stopping, ServerState::Stopped)
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Stopped => "stopped",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Lock-free holder for [`ServerState`].
///
/// Reads are free for anyone; writes are only issued by the lifecycle
/// controller while it holds its transition gate.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ServerState::Stopped as u8))
    }

    pub(crate) fn get(&self) -> ServerState {
        ServerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn transition(&self, next: ServerState) {
        let current = self.get();
        debug_assert!(
            current.can_transition_to(next),
            "illegal state transition {current} -> {next}"
        );
        tracing::debug!(from = %current, to = %next, "Server state transition");
        self.0.store(next as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_cycle() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ServerState::Stopped);
        for next in [
            ServerState::Starting,
            ServerState::Running,
            ServerState::Stopping,
            ServerState::Stopped,
        ] {
            cell.transition(next);
            assert_eq!(cell.get(), next);
        }
    }

    #[test]
    fn test_no_skipped_states() {
        assert!(!ServerState::Stopped.can_transition_to(ServerState::Running));
        assert!(!ServerState::Running.can_transition_to(ServerState::Stopped));
        assert!(!ServerState::Stopping.can_transition_to(ServerState::Running));
        assert!(ServerState::Starting.can_transition_to(ServerState::Stopped));
    }
}
