//! OpenAI ⇄ Anthropic translation.
//!
//! The orchestrator speaks the Anthropic vocabulary internally; the
//! chat-completions route converts requests on the way in and responses (or
//! stream events) on the way out.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    error::GatewayError,
    protocol::{anthropic, openai},
};

/// Default output budget when an OpenAI request does not name one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub fn to_messages_request(request: openai::ChatCompletionRequest) -> Result<anthropic::MessagesRequest, GatewayError> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for message in request.messages {
        match message.role {
            openai::ChatRole::System | openai::ChatRole::Developer => {
                if let Some(content) = &message.content {
                    system_parts.push(content.text());
                }
            }
            openai::ChatRole::User => messages.push(anthropic::Message {
                role: anthropic::Role::User,
                content: user_content(message.content.as_ref()),
            }),
            openai::ChatRole::Assistant => messages.push(anthropic::Message {
                role: anthropic::Role::Assistant,
                content: assistant_content(&message),
            }),
            openai::ChatRole::Tool => {
                let Some(tool_call_id) = message.tool_call_id.clone() else {
                    return Err(GatewayError::InvalidRequest(
                        "tool message without tool_call_id".to_owned(),
                    ));
                };

                messages.push(anthropic::Message {
                    role: anthropic::Role::User,
                    content: anthropic::MessageContent::Blocks(vec![anthropic::ContentBlock::ToolResult {
                        tool_use_id: tool_call_id,
                        content: message
                            .content
                            .as_ref()
                            .map(|content| anthropic::ToolResultContent::Text(content.text())),
                        is_error: None,
                    }]),
                });
            }
        }
    }

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| anthropic::Tool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool.function.parameters,
            })
            .collect()
    });

    Ok(anthropic::MessagesRequest {
        model: request.model,
        messages,
        max_tokens: request
            .max_tokens
            .or(request.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        system: (!system_parts.is_empty()).then(|| anthropic::SystemPrompt::Text(system_parts.join("\n"))),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: None,
        stream: request.stream,
        metadata: None,
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(tool_choice),
    })
}

fn user_content(content: Option<&openai::MessageContent>) -> anthropic::MessageContent {
    match content {
        None => anthropic::MessageContent::Text(String::new()),
        Some(openai::MessageContent::Text(text)) => anthropic::MessageContent::Text(text.clone()),
        Some(openai::MessageContent::Parts(parts)) => {
            let blocks = parts
                .iter()
                .filter_map(|part| match part {
                    openai::ContentPart::Text { text } => Some(anthropic::ContentBlock::Text { text: text.clone() }),
                    openai::ContentPart::ImageUrl { image_url } => data_url_image(&image_url.url),
                })
                .collect();

            anthropic::MessageContent::Blocks(blocks)
        }
    }
}

/// Parse a `data:image/...;base64,...` URL into an image block. Remote URLs
/// are not fetched and are dropped with a warning.
fn data_url_image(url: &str) -> Option<anthropic::ContentBlock> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,").or_else(|| {
        log::warn!("dropping image with unsupported URL scheme");
        None
    })?;

    Some(anthropic::ContentBlock::Image {
        source: anthropic::ImageSource {
            source_type: "base64".to_owned(),
            media_type: media_type.to_owned(),
            data: data.to_owned(),
        },
    })
}

fn assistant_content(message: &openai::ChatMessage) -> anthropic::MessageContent {
    let mut blocks = Vec::new();

    if let Some(content) = &message.content {
        let text = content.text();
        if !text.is_empty() {
            blocks.push(anthropic::ContentBlock::Text { text });
        }
    }

    for call in message.tool_calls.iter().flatten() {
        let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| {
            log::warn!("tool call {} carries non-JSON arguments", call.id);
            Value::Object(serde_json::Map::new())
        });

        blocks.push(anthropic::ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }

    anthropic::MessageContent::Blocks(blocks)
}

fn tool_choice(choice: &Value) -> Option<anthropic::ToolChoice> {
    if let Some(name) = choice.as_str() {
        return match name {
            "required" => Some(anthropic::ToolChoice::Any),
            "none" => None,
            _ => Some(anthropic::ToolChoice::Auto),
        };
    }

    let name = choice.get("function")?.get("name")?.as_str()?;
    Some(anthropic::ToolChoice::Tool { name: name.to_owned() })
}

pub fn to_chat_response(response: &anthropic::MessagesResponse, model: &str) -> openai::ChatCompletionResponse {
    let text: String = response
        .content
        .iter()
        .filter_map(|block| match block {
            anthropic::ResponseBlock::Text { text } => Some(text.as_str()),
            anthropic::ResponseBlock::ToolUse { .. } => None,
        })
        .collect();

    let tool_calls: Vec<openai::ToolCall> = response
        .content
        .iter()
        .filter_map(|block| match block {
            anthropic::ResponseBlock::ToolUse { id, name, input } => Some(openai::ToolCall {
                id: id.clone(),
                r#type: openai::ToolType::Function,
                function: openai::FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_owned()),
                },
            }),
            anthropic::ResponseBlock::Text { .. } => None,
        })
        .collect();

    openai::ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_owned(),
        created: epoch_seconds(),
        model: model.to_owned(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ResponseMessage {
                role: openai::ChatRole::Assistant,
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: response
                .stop_reason
                .map(finish_reason)
                .unwrap_or(openai::FinishReason::Stop),
        }],
        usage: openai::Usage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        },
    }
}

fn finish_reason(reason: anthropic::StopReason) -> openai::FinishReason {
    match reason {
        anthropic::StopReason::EndTurn | anthropic::StopReason::StopSequence => openai::FinishReason::Stop,
        anthropic::StopReason::MaxTokens => openai::FinishReason::Length,
        anthropic::StopReason::ToolUse => openai::FinishReason::ToolCalls,
    }
}

fn epoch_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Stateful adapter turning Anthropic stream events into OpenAI chunks.
///
/// Anthropic streams are a typed state machine; OpenAI streams are flat
/// deltas. The adapter tracks message identity and maps content-block
/// indices onto OpenAI tool-call indices.
pub struct ChunkAdapter {
    model: String,
    id: String,
    created: u64,
    tool_indices: HashMap<u32, u32>,
    next_tool_index: u32,
}

impl ChunkAdapter {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_owned(),
            id: String::new(),
            created: epoch_seconds(),
            tool_indices: HashMap::new(),
            next_tool_index: 0,
        }
    }

    pub fn adapt(&mut self, event: &anthropic::StreamEvent) -> Option<openai::ChatCompletionChunk> {
        match event {
            anthropic::StreamEvent::MessageStart { message } => {
                self.id = message.id.clone();

                Some(self.chunk(
                    openai::ChunkDelta {
                        role: Some(openai::ChatRole::Assistant),
                        ..Default::default()
                    },
                    None,
                    None,
                ))
            }

            anthropic::StreamEvent::ContentBlockStart { index, content_block } => match content_block {
                anthropic::ResponseBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.tool_indices.insert(*index, tool_index);
                    self.next_tool_index += 1;

                    Some(self.chunk(
                        openai::ChunkDelta {
                            tool_calls: Some(vec![openai::StreamingToolCall {
                                index: tool_index,
                                id: Some(id.clone()),
                                r#type: Some(openai::ToolType::Function),
                                function: openai::StreamingFunction {
                                    name: Some(name.clone()),
                                    arguments: Some(String::new()),
                                },
                            }]),
                            ..Default::default()
                        },
                        None,
                        None,
                    ))
                }
                anthropic::ResponseBlock::Text { .. } => None,
            },

            anthropic::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                anthropic::BlockDelta::TextDelta { text } => Some(self.chunk(
                    openai::ChunkDelta {
                        content: Some(text.clone()),
                        ..Default::default()
                    },
                    None,
                    None,
                )),
                anthropic::BlockDelta::InputJsonDelta { partial_json } => {
                    let tool_index = *self.tool_indices.get(index)?;

                    Some(self.chunk(
                        openai::ChunkDelta {
                            tool_calls: Some(vec![openai::StreamingToolCall {
                                index: tool_index,
                                id: None,
                                r#type: None,
                                function: openai::StreamingFunction {
                                    name: None,
                                    arguments: Some(partial_json.clone()),
                                },
                            }]),
                            ..Default::default()
                        },
                        None,
                        None,
                    ))
                }
            },

            anthropic::StreamEvent::MessageDelta { delta, usage } => {
                let reason = delta.stop_reason.map(finish_reason).unwrap_or(openai::FinishReason::Stop);
                let usage = usage.map(|usage| openai::Usage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                    total_tokens: usage.input_tokens + usage.output_tokens,
                });

                Some(self.chunk(openai::ChunkDelta::default(), Some(reason), usage))
            }

            anthropic::StreamEvent::ContentBlockStop { .. }
            | anthropic::StreamEvent::MessageStop
            | anthropic::StreamEvent::Ping
            | anthropic::StreamEvent::Error { .. } => None,
        }
    }

    fn chunk(
        &self,
        delta: openai::ChunkDelta,
        finish_reason: Option<openai::FinishReason>,
        usage: Option<openai::Usage>,
    ) -> openai::ChatCompletionChunk {
        openai::ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}
