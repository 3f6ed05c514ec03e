//! Token estimation and the request-complexity heuristic.
//!
//! The upstream reports no usage, so both sides are estimated: roughly four
//! characters per token, with a surcharge when tool traffic inflates the
//! output.

use crate::protocol::anthropic::{ContentBlock, MessagesRequest};

/// Multiplier applied when any tool call occurred.
const TOOL_OUTPUT_FACTOR: f64 = 1.2;

/// History length past which a request counts as complex.
const COMPLEX_MESSAGE_COUNT: usize = 8;

/// Total content size past which a request counts as complex.
const COMPLEX_CONTENT_BYTES: usize = 8 * 1024;

/// Estimated output tokens for a finished response.
pub fn output_tokens(output_chars: usize, any_tool: bool) -> u32 {
    if output_chars == 0 {
        return 0;
    }

    let mut tokens = output_chars as f64 / 4.0;
    if any_tool {
        tokens *= TOOL_OUTPUT_FACTOR;
    }

    (tokens as u32).max(1)
}

/// Estimated input tokens for a request.
pub fn input_tokens(request: &MessagesRequest) -> u32 {
    let mut chars = request.system_text().map(|text| text.len()).unwrap_or(0);

    for message in &request.messages {
        chars += message.content.text().len();
        for block in message.content.blocks() {
            if let ContentBlock::ToolResult { content: Some(content), .. } = block {
                chars += content.text().len();
            }
        }
    }

    ((chars as f64 / 4.0) as u32).max(1)
}

/// Heavy requests get the long deadline: tool use, long histories, or large
/// payloads.
pub fn is_complex(request: &MessagesRequest) -> bool {
    if request.tools.as_ref().is_some_and(|tools| !tools.is_empty()) {
        return true;
    }

    if request.messages.len() > COMPLEX_MESSAGE_COUNT {
        return true;
    }

    let content_bytes: usize = request.messages.iter().map(|m| m.content.text().len()).sum();
    content_bytes > COMPLEX_CONTENT_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::anthropic::{Message, MessageContent, Role, Tool};

    fn request_with(messages: Vec<Message>) -> MessagesRequest {
        MessagesRequest {
            model: "claude-sonnet-4-20250514".to_owned(),
            messages,
            max_tokens: 1000,
            system: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: None,
            metadata: None,
            tools: None,
            tool_choice: None,
        }
    }

    fn user(text: &str) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.to_owned()),
        }
    }

    #[test]
    fn output_estimate_is_quarter_chars_with_tool_surcharge() {
        assert_eq!(output_tokens(0, false), 0);
        assert_eq!(output_tokens(1, false), 1, "any output floors at one token");
        assert_eq!(output_tokens(400, false), 100);
        assert_eq!(output_tokens(400, true), 120);
    }

    #[test]
    fn input_estimate_counts_system_and_tool_results() {
        let mut request = request_with(vec![user("0123456789012345")]);
        assert_eq!(input_tokens(&request), 4);

        request.system = Some(crate::protocol::anthropic::SystemPrompt::Text("0123456789012345".to_owned()));
        assert_eq!(input_tokens(&request), 8);
    }

    #[test]
    fn tools_make_a_request_complex() {
        let mut request = request_with(vec![user("hi")]);
        assert!(!is_complex(&request));

        request.tools = Some(vec![Tool {
            name: "write".to_owned(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        }]);
        assert!(is_complex(&request));
    }

    #[test]
    fn long_histories_are_complex() {
        let request = request_with((0..9).map(|i| user(&format!("turn {i}"))).collect());
        assert!(is_complex(&request));
    }
}
