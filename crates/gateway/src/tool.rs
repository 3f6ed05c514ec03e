//! Per-response tool-call lifecycle tracking.

use std::collections::{HashMap, HashSet};

/// Lifecycle of one tool call within a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Started, no argument fragments seen yet.
    Pending,
    /// Accumulating argument JSON.
    Collecting,
    /// Closed; retained in the completed set.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub name: String,
    pub block_index: u32,
    pub phase: Phase,
    pub arg_buffer: String,
}

/// Tracks every tool call in one response.
///
/// At most one call per `tool_use_id` is ever live: duplicate starts are
/// rejected, and stopped ids stay in a completed set so stop-reason
/// arithmetic still sees them after the active map drains.
#[derive(Debug, Default)]
pub struct ToolTracker {
    active: HashMap<String, ToolCall>,
    completed: HashSet<String>,
    finished: Vec<ToolCall>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, tool_use_id: &str) -> bool {
        self.active.contains_key(tool_use_id)
    }

    pub fn is_completed(&self, tool_use_id: &str) -> bool {
        self.completed.contains(tool_use_id)
    }

    /// Whether any tool call was ever started; drives the `tool_use` stop
    /// reason.
    pub fn any_started(&self) -> bool {
        !self.active.is_empty() || !self.completed.is_empty()
    }

    /// Begin a call. Returns `false` (and changes nothing) when the id is
    /// already active or completed; the caller skips emission in that case.
    pub fn start(&mut self, tool_use_id: &str, name: &str, block_index: u32) -> bool {
        if self.is_active(tool_use_id) || self.is_completed(tool_use_id) {
            log::warn!("dropping duplicate tool_use start for {tool_use_id}");
            return false;
        }

        self.active.insert(
            tool_use_id.to_owned(),
            ToolCall {
                tool_use_id: tool_use_id.to_owned(),
                name: name.to_owned(),
                block_index,
                phase: Phase::Pending,
                arg_buffer: String::new(),
            },
        );

        true
    }

    /// Append an argument fragment. Returns `false` for unknown or stopped
    /// ids.
    pub fn append_args(&mut self, tool_use_id: &str, fragment: &str) -> bool {
        let Some(call) = self.active.get_mut(tool_use_id) else {
            log::warn!("argument fragment for unknown tool call {tool_use_id}");
            return false;
        };

        call.phase = Phase::Collecting;
        call.arg_buffer.push_str(fragment);
        true
    }

    /// Close a call, moving it into the finished list and its id into the
    /// completed set. Returns the call's block index.
    pub fn stop(&mut self, tool_use_id: &str) -> Option<u32> {
        let mut call = self.active.remove(tool_use_id)?;
        call.phase = Phase::Stopped;
        self.completed.insert(tool_use_id.to_owned());

        let index = call.block_index;
        self.finished.push(call);
        Some(index)
    }

    /// Calls closed so far, in the order they stopped.
    pub fn finished(&self) -> &[ToolCall] {
        &self.finished
    }

    /// Block index of an active call.
    pub fn block_index(&self, tool_use_id: &str) -> Option<u32> {
        self.active.get(tool_use_id).map(|call| call.block_index)
    }

    pub fn active_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.active.values()
    }

    /// Close every still-active call, in block-index order.
    pub fn stop_all(&mut self) -> Vec<u32> {
        let mut ids: Vec<(u32, String)> = self
            .active
            .values()
            .map(|call| (call.block_index, call.tool_use_id.clone()))
            .collect();
        ids.sort();

        ids.into_iter().filter_map(|(_, id)| self.stop(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_pending_collecting_stopped() {
        let mut tracker = ToolTracker::new();

        assert!(tracker.start("tu_a", "Write", 1));
        assert!(tracker.is_active("tu_a"));

        assert!(tracker.append_args("tu_a", "{\"pat"));
        assert!(tracker.append_args("tu_a", "h\":\"x\"}"));

        assert_eq!(tracker.stop("tu_a"), Some(1));
        assert!(!tracker.is_active("tu_a"));
        assert!(tracker.is_completed("tu_a"));

        let call = &tracker.finished()[0];
        assert_eq!(call.phase, Phase::Stopped);
        assert_eq!(call.arg_buffer, "{\"path\":\"x\"}");
    }

    #[test]
    fn duplicate_start_is_dropped_while_active_and_after_completion() {
        let mut tracker = ToolTracker::new();

        assert!(tracker.start("tu_a", "Write", 1));
        assert!(!tracker.start("tu_a", "Write", 2), "active id rejected");

        tracker.stop("tu_a");
        assert!(!tracker.start("tu_a", "Write", 3), "completed id rejected");
    }

    #[test]
    fn completed_ids_keep_any_started_true() {
        let mut tracker = ToolTracker::new();
        assert!(!tracker.any_started());

        tracker.start("tu_a", "Read", 1);
        tracker.stop("tu_a");

        assert!(tracker.any_started());
    }

    #[test]
    fn fragments_for_unknown_ids_are_rejected() {
        let mut tracker = ToolTracker::new();
        assert!(!tracker.append_args("tu_missing", "{}"));

        tracker.start("tu_a", "Read", 1);
        tracker.stop("tu_a");
        assert!(!tracker.append_args("tu_a", "{}"), "stopped id rejects fragments");
    }
}
