//! Enforces Anthropic's streaming event ordering.
//!
//! A conforming stream is `message_start`, content block lifecycles
//! (`content_block_start` → deltas → `content_block_stop`), one
//! `message_delta`, then `message_stop`. Upstream does not always cooperate:
//! deltas can arrive for blocks that never started and blocks can be left
//! dangling at termination. In lenient mode the machine synthesizes or drops
//! events to restore order; in strict mode violations abort the request.

use serde_json::Value;
use thiserror::Error;

use crate::{
    context::{BlockKind, ResponseContext},
    protocol::anthropic::{
        BlockDelta, MessageDeltaBody, MessageStart, ResponseBlock, Role, StopReason, StreamEvent, Usage,
    },
    semantic::SemanticEvent,
};

#[derive(Debug, Error)]
pub enum SseError {
    #[error("event ordering violation: {0}")]
    Violation(String),
}

pub struct SseStateMachine {
    strict: bool,
    message_started: bool,
    message_delta_sent: bool,
    message_stopped: bool,
}

impl SseStateMachine {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            message_started: false,
            message_delta_sent: false,
            message_stopped: false,
        }
    }

    /// Emit `message_start` and the initial `ping`. Exactly once; repeated
    /// calls emit nothing.
    pub fn open(&mut self, ctx: &ResponseContext) -> Vec<StreamEvent> {
        if self.message_started {
            return Vec::new();
        }
        self.message_started = true;

        vec![
            StreamEvent::MessageStart {
                message: MessageStart {
                    id: ctx.message_id.clone(),
                    r#type: "message".to_owned(),
                    role: Role::Assistant,
                    content: Vec::new(),
                    model: ctx.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage {
                        input_tokens: ctx.input_tokens,
                        output_tokens: 0,
                    },
                },
            },
            StreamEvent::Ping,
        ]
    }

    /// Translate one routed event into zero or more client events.
    pub fn emit(&mut self, ctx: &mut ResponseContext, event: SemanticEvent) -> Result<Vec<StreamEvent>, SseError> {
        if !self.message_started {
            return self.violation("event before message_start".to_owned());
        }
        if self.message_stopped {
            return self.violation("event after message_stop".to_owned());
        }

        match event {
            SemanticEvent::TextDelta { index, text } => self.text_delta(ctx, index, text),
            SemanticEvent::ToolUseStart {
                index,
                tool_use_id,
                tool_name,
            } => self.tool_use_start(ctx, index, tool_use_id, tool_name),
            SemanticEvent::ToolInputDelta { index, partial_json } => self.tool_input_delta(ctx, index, partial_json),
            SemanticEvent::ContentBlockStop { index } => self.content_block_stop(ctx, index),
            // Terminal events are handled by the orchestrator via finalize.
            SemanticEvent::MessageDelta { .. } | SemanticEvent::MessageStop | SemanticEvent::UpstreamException { .. } => {
                Ok(Vec::new())
            }
        }
    }

    fn text_delta(&mut self, ctx: &mut ResponseContext, index: u32, text: String) -> Result<Vec<StreamEvent>, SseError> {
        if ctx.block(index).is_some_and(|block| block.stopped) {
            return self.violation(format!("text delta for stopped block {index}"));
        }

        let mut events = Vec::new();

        if !ctx.block(index).is_some_and(|block| block.started) {
            events.extend(self.close_open_blocks(ctx, Some(index)));

            let block = ctx.ensure_block(index, BlockKind::Text, None);
            block.started = true;

            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseBlock::Text { text: String::new() },
            });
        }

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::TextDelta { text },
        });

        Ok(events)
    }

    fn tool_use_start(
        &mut self,
        ctx: &mut ResponseContext,
        index: u32,
        tool_use_id: String,
        tool_name: String,
    ) -> Result<Vec<StreamEvent>, SseError> {
        if ctx.block(index).is_some_and(|block| block.started) {
            return self.violation(format!("second content_block_start at index {index}"));
        }

        let mut events = self.close_open_blocks(ctx, Some(index));

        let block = ctx.ensure_block(index, BlockKind::ToolUse, Some(&tool_use_id));
        block.started = true;

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseBlock::ToolUse {
                id: tool_use_id,
                name: tool_name,
                input: Value::Object(serde_json::Map::new()),
            },
        });

        Ok(events)
    }

    fn tool_input_delta(
        &mut self,
        ctx: &mut ResponseContext,
        index: u32,
        partial_json: String,
    ) -> Result<Vec<StreamEvent>, SseError> {
        if ctx.block(index).is_some_and(|block| block.stopped) {
            return self.violation(format!("input delta for stopped block {index}"));
        }

        let mut events = Vec::new();

        // Safety net: the router supplies the real id before any fragment,
        // so a missing block here means the upstream skipped the start.
        if !ctx.block(index).is_some_and(|block| block.started) {
            events.extend(self.close_open_blocks(ctx, Some(index)));

            let synthesized = format!("toolu_{}", uuid::Uuid::new_v4().simple());
            let block = ctx.ensure_block(index, BlockKind::ToolUse, Some(&synthesized));
            block.started = true;
            let id = block.tool_use_id.clone().unwrap_or(synthesized);

            log::warn!("synthesizing content_block_start for orphan input delta at index {index}");
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ResponseBlock::ToolUse {
                    id,
                    name: String::new(),
                    input: Value::Object(serde_json::Map::new()),
                },
            });
        }

        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::InputJsonDelta { partial_json },
        });

        Ok(events)
    }

    fn content_block_stop(&mut self, ctx: &mut ResponseContext, index: u32) -> Result<Vec<StreamEvent>, SseError> {
        match ctx.block_mut(index) {
            Some(block) if block.started && !block.stopped => {
                block.stopped = true;
                Ok(vec![StreamEvent::ContentBlockStop { index }])
            }
            Some(block) if block.stopped => self.violation(format!("second content_block_stop at index {index}")),
            _ => self.violation(format!("content_block_stop for unstarted block {index}")),
        }
    }

    /// Close every open block, then emit `message_delta` and `message_stop`.
    /// Safe to call exactly once per request; duplicate terminal events are
    /// suppressed.
    pub fn finalize(&mut self, ctx: &mut ResponseContext, stop_reason: StopReason, usage: Usage) -> Vec<StreamEvent> {
        let mut events = self.close_open_blocks(ctx, None);

        if !self.message_delta_sent {
            self.message_delta_sent = true;
            events.push(StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: Some(usage),
            });
        }

        if !self.message_stopped {
            self.message_stopped = true;
            events.push(StreamEvent::MessageStop);
        }

        events
    }

    /// Stop every started-but-unstopped block except `keep`.
    fn close_open_blocks(&mut self, ctx: &mut ResponseContext, keep: Option<u32>) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for index in ctx.open_blocks() {
            if keep == Some(index) {
                continue;
            }
            if let Some(block) = ctx.block_mut(index) {
                block.stopped = true;
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        events
    }

    fn violation(&self, message: String) -> Result<Vec<StreamEvent>, SseError> {
        if self.strict {
            return Err(SseError::Violation(message));
        }

        log::warn!("{message} (corrected)");
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]

    use super::*;

    fn ctx() -> ResponseContext {
        ResponseContext::new("claude-sonnet-4-20250514", 7, 1000)
    }

    fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|event| match event {
                StreamEvent::MessageStart { .. } => "message_start",
                StreamEvent::ContentBlockStart { .. } => "content_block_start",
                StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
                StreamEvent::ContentBlockStop { .. } => "content_block_stop",
                StreamEvent::MessageDelta { .. } => "message_delta",
                StreamEvent::MessageStop => "message_stop",
                StreamEvent::Ping => "ping",
                StreamEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[test]
    fn text_stream_produces_the_canonical_sequence() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        let mut all = machine.open(&ctx);

        for text in ["Hello", " world"] {
            all.extend(
                machine
                    .emit(
                        &mut ctx,
                        SemanticEvent::TextDelta {
                            index: 0,
                            text: text.to_owned(),
                        },
                    )
                    .expect("lenient"),
            );
        }

        all.extend(machine.finalize(&mut ctx, StopReason::EndTurn, Usage::default()));

        assert_eq!(
            kinds(&all),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn message_start_is_emitted_exactly_once() {
        let ctx = ctx();
        let mut machine = SseStateMachine::new(false);

        assert_eq!(machine.open(&ctx).len(), 2);
        assert!(machine.open(&ctx).is_empty());
    }

    #[test]
    fn opening_a_tool_block_closes_the_text_block() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        machine.open(&ctx);

        machine
            .emit(
                &mut ctx,
                SemanticEvent::TextDelta {
                    index: 0,
                    text: "thinking".to_owned(),
                },
            )
            .expect("lenient");

        let events = machine
            .emit(
                &mut ctx,
                SemanticEvent::ToolUseStart {
                    index: 1,
                    tool_use_id: "tu_a".to_owned(),
                    tool_name: "Write".to_owned(),
                },
            )
            .expect("lenient");

        assert_eq!(kinds(&events), vec!["content_block_stop", "content_block_start"]);
    }

    #[test]
    fn finalize_closes_dangling_blocks_and_orders_terminal_events() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        machine.open(&ctx);

        machine
            .emit(
                &mut ctx,
                SemanticEvent::ToolUseStart {
                    index: 1,
                    tool_use_id: "tu_a".to_owned(),
                    tool_name: "Write".to_owned(),
                },
            )
            .expect("lenient");

        let events = machine.finalize(
            &mut ctx,
            StopReason::ToolUse,
            Usage {
                input_tokens: 7,
                output_tokens: 3,
            },
        );

        assert_eq!(kinds(&events), vec!["content_block_stop", "message_delta", "message_stop"]);

        let StreamEvent::MessageDelta { delta, usage } = &events[1] else {
            panic!("expected message_delta");
        };
        assert_eq!(delta.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(usage.expect("usage").output_tokens, 3);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        machine.open(&ctx);

        let first = machine.finalize(&mut ctx, StopReason::EndTurn, Usage::default());
        assert_eq!(kinds(&first), vec!["message_delta", "message_stop"]);

        let second = machine.finalize(&mut ctx, StopReason::EndTurn, Usage::default());
        assert!(second.is_empty(), "duplicate terminal events are dropped");
    }

    #[test]
    fn orphan_input_delta_synthesizes_a_tool_block() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        machine.open(&ctx);

        let events = machine
            .emit(
                &mut ctx,
                SemanticEvent::ToolInputDelta {
                    index: 1,
                    partial_json: "{}".to_owned(),
                },
            )
            .expect("lenient");

        assert_eq!(kinds(&events), vec!["content_block_start", "content_block_delta"]);

        let StreamEvent::ContentBlockStart { content_block, .. } = &events[0] else {
            panic!("expected content_block_start");
        };
        let ResponseBlock::ToolUse { id, .. } = content_block else {
            panic!("expected tool_use block");
        };
        assert!(id.starts_with("toolu_"), "synthesized id");
    }

    #[test]
    fn lenient_mode_drops_deltas_for_stopped_blocks() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(false);
        machine.open(&ctx);

        machine
            .emit(
                &mut ctx,
                SemanticEvent::TextDelta {
                    index: 0,
                    text: "hi".to_owned(),
                },
            )
            .expect("lenient");
        machine
            .emit(&mut ctx, SemanticEvent::ContentBlockStop { index: 0 })
            .expect("lenient");

        let events = machine
            .emit(
                &mut ctx,
                SemanticEvent::TextDelta {
                    index: 0,
                    text: "late".to_owned(),
                },
            )
            .expect("lenient mode corrects");
        assert!(events.is_empty());
    }

    #[test]
    fn strict_mode_errors_on_violations() {
        let mut ctx = ctx();
        let mut machine = SseStateMachine::new(true);
        machine.open(&ctx);

        machine
            .emit(&mut ctx, SemanticEvent::ContentBlockStop { index: 0 })
            .expect_err("stop for unstarted block");
    }
}
