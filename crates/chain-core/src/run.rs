use crate::context::ExecutionContext;
use crate::registry::ChainDefinition;
use crate::shell;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Lifecycle of a run.
///
/// Transitions: `Pending → Running → Succeeded | Failed`, or
/// `Pending → Aborted`. Terminal states are never left; a retry is a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
            RunState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Aborted)
    }

    /// Whether `self → next` is a legal forward move.
    pub fn can_move_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Pending, RunState::Aborted)
                | (RunState::Running, RunState::Running)
                | (RunState::Running, RunState::Succeeded)
                | (RunState::Running, RunState::Failed)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ChainRun
// ---------------------------------------------------------------------------

/// One invocation of a chain. Persisted to the ledger at every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainRun {
    pub id: String,
    pub chain_name: String,
    pub state: RunState,
    pub current_step_index: usize,
    pub step_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context: ExecutionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nesting depth when started from another chain's handler.
    #[serde(default)]
    pub depth: u32,
    /// Process that owns the run while it is active.
    #[serde(default)]
    pub pid: u32,
}

impl ChainRun {
    pub fn new(def: &ChainDefinition, context: ExecutionContext, depth: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_name: def.name.clone(),
            state: RunState::Pending,
            current_step_index: 0,
            step_count: def.steps.len(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            context,
            error: None,
            depth,
            pid: std::process::id(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Active in the ledger, but the process that owned it is gone.
    pub fn is_dangling(&self) -> bool {
        !self.is_terminal() && self.pid != std::process::id() && !shell::process_alive(self.pid)
    }

    /// Wall time from start (or creation) to end, or to now while active.
    pub fn elapsed(&self) -> chrono::Duration {
        let from = self.started_at.unwrap_or(self.created_at);
        self.ended_at.unwrap_or_else(Utc::now) - from
    }

    /// Timestamp used to order finished runs.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.created_at)
    }

    pub(crate) fn start(&mut self) {
        self.transition(RunState::Running);
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn advance(&mut self) {
        debug_assert_eq!(self.state, RunState::Running);
        self.current_step_index = (self.current_step_index + 1).min(self.step_count);
    }

    pub(crate) fn finish(&mut self, state: RunState, error: Option<String>) {
        self.transition(state);
        self.ended_at = Some(Utc::now());
        self.error = error;
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_move_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        self.state = next;
    }
}

/// Short human form of a duration: `850ms`, `12s`, `3m04s`, `2h05m`.
pub fn format_elapsed(d: chrono::Duration) -> String {
    let ms = d.num_milliseconds().max(0);
    let secs = ms / 1000;
    if secs == 0 {
        format!("{ms}ms")
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        use RunState::*;
        assert!(Pending.can_move_to(Running));
        assert!(Pending.can_move_to(Aborted));
        assert!(Running.can_move_to(Succeeded));
        assert!(Running.can_move_to(Failed));
        assert!(!Running.can_move_to(Aborted));
        assert!(!Running.can_move_to(Pending));
        for terminal in [Succeeded, Failed, Aborted] {
            assert!(terminal.is_terminal());
            for next in [Pending, Running, Succeeded, Failed, Aborted] {
                assert!(!terminal.can_move_to(next));
            }
        }
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&RunState::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(850)), "850ms");
        assert_eq!(format_elapsed(chrono::Duration::seconds(12)), "12s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(184)), "3m04s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(7500)), "2h05m");
    }
}
