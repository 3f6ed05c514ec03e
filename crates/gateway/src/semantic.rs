//! The intermediate vocabulary between binary decoding and the client
//! protocol. The router produces these; the SSE state machine and the
//! non-streaming aggregator consume them.

use crate::protocol::anthropic::{StopReason, Usage};

#[derive(Debug, Clone, PartialEq)]
pub enum SemanticEvent {
    TextDelta {
        index: u32,
        text: String,
    },
    ToolUseStart {
        index: u32,
        tool_use_id: String,
        tool_name: String,
    },
    /// An opaque fragment of one tool call's argument JSON; fragments for one
    /// index concatenate to a valid JSON value.
    ToolInputDelta {
        index: u32,
        partial_json: String,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        stop_reason: StopReason,
        usage: Option<Usage>,
    },
    MessageStop,
    UpstreamException {
        kind: String,
        detail: String,
    },
}
