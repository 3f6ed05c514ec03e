//! Per-request mutable state shared by the router and the SSE state machine.

use std::collections::BTreeMap;

use crate::tool::ToolTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
}

/// Runtime state of one content block.
///
/// `started` and `stopped` each flip false to true exactly once, in that
/// order; a stopped block accepts no further deltas.
#[derive(Debug)]
pub struct BlockState {
    pub kind: BlockKind,
    pub tool_use_id: Option<String>,
    pub started: bool,
    pub stopped: bool,
}

/// All mutable state for one in-flight response. Owned by a single request
/// routine; dropped wholesale at request end.
pub struct ResponseContext {
    pub message_id: String,
    pub model: String,
    /// Input-token estimate computed from the request.
    pub input_tokens: u32,
    /// Requested output budget; drives the `max_tokens` stop reason.
    pub max_tokens: u32,

    output_chars: usize,
    blocks: BTreeMap<u32, BlockState>,
    /// Content-block index reserved for streamed text.
    text_index: u32,
    next_tool_index: u32,

    pub tools: ToolTracker,
}

impl ResponseContext {
    pub fn new(model: &str, input_tokens: u32, max_tokens: u32) -> Self {
        Self {
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_owned(),
            input_tokens,
            max_tokens,
            output_chars: 0,
            blocks: BTreeMap::new(),
            text_index: 0,
            next_tool_index: 1,
            tools: ToolTracker::new(),
        }
    }

    /// The index text deltas stream into. A pure text stream uses index 0.
    pub fn text_index(&self) -> u32 {
        self.text_index
    }

    /// Reserve the next unused index for a new tool call. Indices are never
    /// reused within a response.
    pub fn assign_tool_index(&mut self) -> u32 {
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        index
    }

    pub fn add_output_chars(&mut self, chars: usize) {
        self.output_chars += chars;
    }

    pub fn output_chars(&self) -> usize {
        self.output_chars
    }

    pub fn block(&self, index: u32) -> Option<&BlockState> {
        self.blocks.get(&index)
    }

    pub fn block_mut(&mut self, index: u32) -> Option<&mut BlockState> {
        self.blocks.get_mut(&index)
    }

    /// Fetch or create the state for `index`.
    pub fn ensure_block(&mut self, index: u32, kind: BlockKind, tool_use_id: Option<&str>) -> &mut BlockState {
        self.blocks.entry(index).or_insert_with(|| BlockState {
            kind,
            tool_use_id: tool_use_id.map(str::to_owned),
            started: false,
            stopped: false,
        })
    }

    /// Indices of blocks that were started but never stopped, ascending.
    pub fn open_blocks(&self) -> Vec<u32> {
        self.blocks
            .iter()
            .filter(|(_, state)| state.started && !state.stopped)
            .map(|(index, _)| *index)
            .collect()
    }
}
