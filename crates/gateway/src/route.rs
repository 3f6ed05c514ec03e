//! Classifies decoded upstream frames into [`SemanticEvent`]s.
//!
//! The router owns every tool-tracker mutation and all content-block index
//! assignment, so downstream consumers never see a duplicate start or a
//! reused index.

use eventstream::DecodedMessage;

use crate::{context::ResponseContext, protocol::codewhisperer::AssistantEvent, semantic::SemanticEvent};

/// Event types whose payload is an [`AssistantEvent`] JSON document.
const ASSISTANT_EVENTS: [&str; 3] = ["assistantResponseEvent", "completion", "completion_chunk"];

/// Event types that only update tool bookkeeping upstream-side.
const TOOL_LIFECYCLE_EVENTS: [&str; 4] = [
    "tool_execution_start",
    "tool_call_request",
    "tool_call_result",
    "tool_execution_end",
];

pub fn route(message: &DecodedMessage, ctx: &mut ResponseContext) -> Vec<SemanticEvent> {
    match message.message_type() {
        Some("event") => route_event(message, ctx),
        Some("exception") => {
            let kind = message.exception_type().unwrap_or("unknown").to_owned();
            let detail = String::from_utf8_lossy(message.payload()).into_owned();
            vec![SemanticEvent::UpstreamException { kind, detail }]
        }
        other => {
            log::warn!("ignoring frame with unexpected message type {other:?}");
            Vec::new()
        }
    }
}

fn route_event(message: &DecodedMessage, ctx: &mut ResponseContext) -> Vec<SemanticEvent> {
    let Some(event_type) = message.event_type() else {
        log::warn!("event frame without an event type header");
        return Vec::new();
    };

    if ASSISTANT_EVENTS.contains(&event_type) {
        return route_assistant_event(message, ctx);
    }

    if TOOL_LIFECYCLE_EVENTS.contains(&event_type) {
        log::debug!("tool lifecycle event {event_type}");
        return Vec::new();
    }

    match event_type {
        "session_start" | "session_end" => {}
        other => log::debug!("ignoring unknown event type {other}"),
    }

    Vec::new()
}

fn route_assistant_event(message: &DecodedMessage, ctx: &mut ResponseContext) -> Vec<SemanticEvent> {
    let event: AssistantEvent = match serde_json::from_slice(message.payload()) {
        Ok(event) => event,
        Err(err) => {
            log::warn!("skipping malformed assistant event payload: {err}");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if let Some(content) = event.content
        && !content.is_empty()
    {
        events.push(SemanticEvent::TextDelta {
            index: ctx.text_index(),
            text: content,
        });
    }

    let Some(tool_use_id) = event.tool_use_id.as_deref() else {
        return events;
    };

    if event.stop == Some(true) {
        match ctx.tools.stop(tool_use_id) {
            Some(index) => events.push(SemanticEvent::ContentBlockStop { index }),
            None => log::warn!("stop for unknown or already stopped tool call {tool_use_id}"),
        }
        return events;
    }

    let known = ctx.tools.is_active(tool_use_id) || ctx.tools.is_completed(tool_use_id);
    if !known {
        if let Some(name) = event.name.as_deref() {
            let index = ctx.assign_tool_index();
            if ctx.tools.start(tool_use_id, name, index) {
                events.push(SemanticEvent::ToolUseStart {
                    index,
                    tool_use_id: tool_use_id.to_owned(),
                    tool_name: name.to_owned(),
                });
            }
        } else {
            log::warn!("tool event for unknown id {tool_use_id} without a name");
            return events;
        }
    }

    if let Some(fragment) = event.input.as_deref()
        && !fragment.is_empty()
        && ctx.tools.append_args(tool_use_id, fragment)
        && let Some(index) = ctx.tools.block_index(tool_use_id)
    {
        events.push(SemanticEvent::ToolInputDelta {
            index,
            partial_json: fragment.to_owned(),
        });
    }

    events
}
