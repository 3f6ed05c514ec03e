//! Builds the CodeWhisperer request body from a validated Anthropic request.

use base64::Engine;

use crate::{
    error::GatewayError,
    model,
    protocol::{
        anthropic::{ContentBlock, MessagesRequest, Role, ToolChoice},
        codewhisperer::{
            AssistantResponseMessage, ChatTriggerType, ConversationState, CurrentMessage,
            GenerateAssistantResponseRequest, HistoryEntry, ImageBlock, ImageSourceBytes, InputSchema, ToolEntry,
            ToolResult, ToolResultContentBlock, ToolResultStatus, ToolSpecification, ToolUseRecord, UserInputMessage,
            UserInputMessageContext,
        },
    },
};

const ORIGIN: &str = "AI_EDITOR";

/// Appended to the synthesized opener when tools are configured.
const TOOL_INSTRUCTION: &str = "You may call the provided tools when they help you answer.";

pub fn build(request: &MessagesRequest, profile_arn: Option<&str>) -> Result<GenerateAssistantResponseRequest, GatewayError> {
    if request.model.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("model must not be empty".to_owned()));
    }
    let model_id = model::resolve(&request.model);

    let Some((active, past)) = request.messages.split_last() else {
        return Err(GatewayError::InvalidRequest("messages must not be empty".to_owned()));
    };

    if active.role != Role::User {
        return Err(GatewayError::InvalidRequest(
            "the final message must be a user turn".to_owned(),
        ));
    }

    let mut current = user_message(active, model_id)?;

    // Tool definitions ride on the active turn.
    if let Some(tools) = request.tools.as_ref().filter(|tools| !tools.is_empty()) {
        current.user_input_message_context.tools = Some(
            tools
                .iter()
                .map(|tool| ToolEntry {
                    tool_specification: ToolSpecification {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: InputSchema {
                            json: tool.input_schema.clone(),
                        },
                    },
                })
                .collect(),
        );
    }

    let has_tool_results = current
        .user_input_message_context
        .tool_results
        .as_ref()
        .is_some_and(|results| !results.is_empty());

    if current.content.is_empty() && current.images.is_empty() && !has_tool_results {
        return Err(GatewayError::InvalidRequest(
            "the active turn has neither text, images nor tool results".to_owned(),
        ));
    }

    let mut history = Vec::new();

    // The system prompt (plus the tool-usage note) becomes an opening
    // exchange the assistant acknowledged with a literal "OK".
    let mut opener_parts = Vec::new();
    if let Some(system) = request.system_text() {
        opener_parts.push(system);
    }
    if request.tools.as_ref().is_some_and(|tools| !tools.is_empty()) {
        opener_parts.push(TOOL_INSTRUCTION.to_owned());
    }
    if !opener_parts.is_empty() {
        history.push(HistoryEntry::User {
            user_input_message: UserInputMessage {
                content: opener_parts.join("\n\n"),
                model_id: model_id.to_owned(),
                origin: ORIGIN.to_owned(),
                images: Vec::new(),
                user_input_message_context: UserInputMessageContext::default(),
            },
        });
        history.push(HistoryEntry::Assistant {
            assistant_response_message: AssistantResponseMessage {
                content: "OK".to_owned(),
                tool_uses: Vec::new(),
            },
        });
    }

    history.extend(paired_history(past, model_id)?);

    let trigger = match (&request.tools, &request.tool_choice) {
        (Some(tools), Some(ToolChoice::Any | ToolChoice::Tool { .. })) if !tools.is_empty() => ChatTriggerType::Auto,
        _ => ChatTriggerType::Manual,
    };

    Ok(GenerateAssistantResponseRequest {
        conversation_state: ConversationState {
            chat_trigger_type: trigger,
            conversation_id: uuid::Uuid::new_v4().to_string(),
            current_message: CurrentMessage {
                user_input_message: current,
            },
            history,
        },
        profile_arn: profile_arn.map(str::to_owned),
    })
}

/// Convert past turns into alternating user/assistant records: consecutive
/// same-role turns merge, a leading assistant gets an empty user in front,
/// and a trailing user is answered with a literal "OK".
fn paired_history(
    past: &[crate::protocol::anthropic::Message],
    model_id: &str,
) -> Result<Vec<HistoryEntry>, GatewayError> {
    let mut entries: Vec<HistoryEntry> = Vec::new();

    for message in past {
        match message.role {
            Role::User => {
                let record = user_message(message, model_id)?;

                if let Some(HistoryEntry::User { user_input_message }) = entries.last_mut() {
                    merge_user(user_input_message, record);
                } else {
                    entries.push(HistoryEntry::User {
                        user_input_message: record,
                    });
                }
            }
            Role::Assistant => {
                let record = assistant_message(message);

                match entries.last_mut() {
                    Some(HistoryEntry::Assistant {
                        assistant_response_message,
                    }) => merge_assistant(assistant_response_message, record),
                    Some(HistoryEntry::User { .. }) => entries.push(HistoryEntry::Assistant {
                        assistant_response_message: record,
                    }),
                    None => {
                        entries.push(HistoryEntry::User {
                            user_input_message: UserInputMessage {
                                content: String::new(),
                                model_id: model_id.to_owned(),
                                origin: ORIGIN.to_owned(),
                                images: Vec::new(),
                                user_input_message_context: UserInputMessageContext::default(),
                            },
                        });
                        entries.push(HistoryEntry::Assistant {
                            assistant_response_message: record,
                        });
                    }
                }
            }
        }
    }

    if matches!(entries.last(), Some(HistoryEntry::User { .. })) {
        entries.push(HistoryEntry::Assistant {
            assistant_response_message: AssistantResponseMessage {
                content: "OK".to_owned(),
                tool_uses: Vec::new(),
            },
        });
    }

    Ok(entries)
}

fn user_message(
    message: &crate::protocol::anthropic::Message,
    model_id: &str,
) -> Result<UserInputMessage, GatewayError> {
    let mut images = Vec::new();
    let mut tool_results = Vec::new();

    for block in message.content.blocks() {
        match block {
            ContentBlock::Image { source } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&source.data)
                    .map_err(|err| GatewayError::InvalidRequest(format!("image data is not valid base64: {err}")))?;

                images.push(ImageBlock {
                    format: source
                        .media_type
                        .strip_prefix("image/")
                        .unwrap_or("png")
                        .to_owned(),
                    source: ImageSourceBytes { bytes },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let text = content.as_ref().map(|content| content.text()).unwrap_or_default();

                tool_results.push(ToolResult {
                    tool_use_id: tool_use_id.clone(),
                    content: vec![ToolResultContentBlock {
                        text: Some(text),
                        json: None,
                    }],
                    status: if is_error.unwrap_or(false) {
                        ToolResultStatus::Error
                    } else {
                        ToolResultStatus::Success
                    },
                });
            }
            ContentBlock::Text { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    Ok(UserInputMessage {
        content: message.content.text(),
        model_id: model_id.to_owned(),
        origin: ORIGIN.to_owned(),
        images,
        user_input_message_context: UserInputMessageContext {
            tool_results: (!tool_results.is_empty()).then_some(tool_results),
            tools: None,
        },
    })
}

fn assistant_message(message: &crate::protocol::anthropic::Message) -> AssistantResponseMessage {
    let tool_uses: Vec<ToolUseRecord> = message
        .content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(ToolUseRecord {
                tool_use_id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            }),
            _ => None,
        })
        .collect();

    AssistantResponseMessage {
        content: message.content.text(),
        tool_uses,
    }
}

fn merge_user(into: &mut UserInputMessage, from: UserInputMessage) {
    if !from.content.is_empty() {
        if !into.content.is_empty() {
            into.content.push('\n');
        }
        into.content.push_str(&from.content);
    }

    into.images.extend(from.images);

    if let Some(results) = from.user_input_message_context.tool_results {
        into.user_input_message_context
            .tool_results
            .get_or_insert_with(Vec::new)
            .extend(results);
    }
}

fn merge_assistant(into: &mut AssistantResponseMessage, from: AssistantResponseMessage) {
    if !from.content.is_empty() {
        if !into.content.is_empty() {
            into.content.push('\n');
        }
        into.content.push_str(&from.content);
    }

    into.tool_uses.extend(from.tool_uses);
}
