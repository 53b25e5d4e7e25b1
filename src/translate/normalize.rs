//! Provider-specific fixes applied to a normalized request before it is sent.
//!
//! Providers without structured multi-part message content get every message
//! collapsed to a plain string and stripped down to the fields they accept.
//! The others keep text and image parts, with tool blocks rendered as text
//! parts since their chat completion endpoints have no such part types.

use serde_json::Value;

use super::openai_types::{ChatBlock, ChatCompletionRequest, ChatContent, ChatMessage, ChatToolChoice};
use crate::providers::Provider;

/// Stand-in for content that would otherwise be empty.
pub const PLACEHOLDER: &str = "...";

const IMAGE_PLACEHOLDER: &str = "[Image content - not displayed in text format]";

/// Apply the destination's constraints to a translated request.
#[must_use]
pub fn prepare_for_provider(req: ChatCompletionRequest, provider: Provider) -> ChatCompletionRequest {
    let mut req = if provider.flattens_content() {
        normalize_for_provider(req)
    } else {
        render_tool_blocks(req)
    };

    // Chat completion endpoints spell "any tool" as "required".
    if let Some(ChatToolChoice::String(choice)) = &mut req.tool_choice {
        if choice == "any" {
            *choice = "required".to_string();
        }
    }

    req
}

/// Collapse structured message content into strings and drop message fields
/// outside `role`, `content`, `name`, `tool_call_id` and `tool_calls`.
#[must_use]
pub fn normalize_for_provider(mut req: ChatCompletionRequest) -> ChatCompletionRequest {
    for msg in &mut req.messages {
        normalize_message(msg);
    }
    for (i, msg) in req.messages.iter_mut().enumerate() {
        validate_content(i, msg);
    }
    req
}

/// Replace `tool_use` and `tool_result` parts with text parts, leaving text
/// and image parts structured.
#[must_use]
pub fn render_tool_blocks(mut req: ChatCompletionRequest) -> ChatCompletionRequest {
    for msg in &mut req.messages {
        lift_message_fields(msg);
        if let Some(ChatContent::Blocks(blocks)) = &mut msg.content {
            for block in blocks.iter_mut() {
                if matches!(block, ChatBlock::ToolUse { .. } | ChatBlock::ToolResult { .. }) {
                    let text = non_empty_or_placeholder(&block_text(block));
                    *block = ChatBlock::Text { text };
                }
            }
        }
    }
    req
}

fn normalize_message(msg: &mut ChatMessage) {
    msg.content = Some(ChatContent::Text(match msg.content.take() {
        Some(ChatContent::Blocks(blocks)) if is_tool_results_only(&blocks) => {
            tool_results_to_text(&blocks)
        }
        Some(ChatContent::Blocks(blocks)) => blocks_to_text(&blocks),
        Some(ChatContent::Text(text)) => text,
        None => PLACEHOLDER.to_string(),
    }));

    lift_message_fields(msg);
    for key in std::mem::take(&mut msg.extra).keys() {
        tracing::warn!(field = %key, "Removing unsupported field from message");
    }
}

/// Move `name`, `tool_call_id` and `tool_calls` carried as extra fields onto
/// the message itself.
fn lift_message_fields(msg: &mut ChatMessage) {
    if let Some(Value::String(name)) = msg.extra.remove("name") {
        if msg.name.is_none() {
            msg.name = Some(name);
        }
    }
    if let Some(Value::String(id)) = msg.extra.remove("tool_call_id") {
        if msg.tool_call_id.is_none() {
            msg.tool_call_id = Some(id);
        }
    }
    if let Some(calls) = msg.extra.remove("tool_calls") {
        match serde_json::from_value(calls) {
            Ok(calls) if msg.tool_calls.is_none() => msg.tool_calls = Some(calls),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Dropping malformed tool_calls on message"),
        }
    }
}

fn is_tool_results_only(blocks: &[ChatBlock]) -> bool {
    !blocks.is_empty()
        && blocks
            .iter()
            .all(|b| matches!(b, ChatBlock::ToolResult { .. }))
}

fn tool_results_to_text(blocks: &[ChatBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        if let ChatBlock::ToolResult { content, .. } = block {
            text.push_str("Tool Result:\n");
            text.push_str(&result_text(content));
        }
    }
    non_empty_or_placeholder(&text)
}

fn blocks_to_text(blocks: &[ChatBlock]) -> String {
    let text: String = blocks.iter().map(block_text).collect();
    non_empty_or_placeholder(&text)
}

fn block_text(block: &ChatBlock) -> String {
    match block {
        ChatBlock::Text { text } => format!("{text}\n"),
        ChatBlock::ToolResult {
            tool_use_id,
            content,
        } => format!("[Tool Result ID: {tool_use_id}]\n{}", result_text(content)),
        ChatBlock::ToolUse { id, name, input } => {
            let input = serde_json::to_string(input).unwrap_or_else(|_| format!("{input:?}"));
            format!("[Tool: {name} (ID: {id})]\nInput: {input}\n\n")
        }
        ChatBlock::ImageUrl { .. } => format!("{IMAGE_PLACEHOLDER}\n"),
    }
}

/// One line per sub-block: its `text` if it has one, otherwise its JSON.
fn result_text(items: &[Value]) -> String {
    let mut text = String::new();
    for item in items {
        match item {
            Value::String(s) => text.push_str(s),
            other => match other.get("text").and_then(Value::as_str) {
                Some(t) => text.push_str(t),
                None => text.push_str(&other.to_string()),
            },
        }
        text.push('\n');
    }
    text
}

fn non_empty_or_placeholder(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        PLACEHOLDER.to_string()
    } else {
        trimmed.to_string()
    }
}

fn validate_content(index: usize, msg: &mut ChatMessage) {
    match &msg.content {
        Some(ChatContent::Text(_)) => {}
        Some(ChatContent::Blocks(blocks)) => {
            tracing::warn!(index, "Message still has block content after normalization");
            let json = serde_json::to_string(blocks).unwrap_or_else(|_| format!("{blocks:?}"));
            msg.content = Some(ChatContent::Text(format!("Content as JSON: {json}")));
        }
        None => {
            tracing::warn!(index, "Message has no content, using placeholder");
            msg.content = Some(ChatContent::Text(PLACEHOLDER.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::ImageUrlDetail;
    use serde_json::json;

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "openai/gpt-4o".to_string(),
            messages,
            max_tokens: 100,
            temperature: 1.0,
            stream: false,
            stream_options: None,
            stop: None,
            top_p: None,
            top_k: None,
            tools: None,
            tool_choice: None,
            user: None,
            api_key: None,
        }
    }

    fn blocks(role: &str, blocks: Vec<ChatBlock>) -> ChatMessage {
        ChatMessage::new(role, ChatContent::Blocks(blocks))
    }

    #[test]
    fn test_tool_result_only_message() {
        let req = request(vec![blocks(
            "user",
            vec![ChatBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: vec![json!({"type": "text", "text": "42"})],
            }],
        )]);

        let out = normalize_for_provider(req);
        assert_eq!(out.messages[0].content_text(), Some("Tool Result:\n42"));
    }

    #[test]
    fn test_empty_tool_result_keeps_header() {
        let req = request(vec![blocks(
            "user",
            vec![
                ChatBlock::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: vec![json!({"type": "text", "text": ""})],
                },
                ChatBlock::ToolResult {
                    tool_use_id: "t2".to_string(),
                    content: vec![json!({"rows": 2})],
                },
            ],
        )]);

        let out = normalize_for_provider(req);
        assert_eq!(
            out.messages[0].content_text(),
            Some("Tool Result:\n\nTool Result:\n{\"rows\":2}")
        );
    }

    #[test]
    fn test_mixed_blocks_become_text() {
        let mut input = serde_json::Map::new();
        input.insert("x".to_string(), json!(1));

        let req = request(vec![blocks(
            "assistant",
            vec![
                ChatBlock::Text {
                    text: "Let me check".to_string(),
                },
                ChatBlock::ToolUse {
                    id: "t9".to_string(),
                    name: "calc".to_string(),
                    input,
                },
                ChatBlock::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: "https://example.com/a.png".to_string(),
                        detail: None,
                    },
                },
                ChatBlock::ToolResult {
                    tool_use_id: "t8".to_string(),
                    content: vec![json!({"type": "text", "text": "done"})],
                },
            ],
        )]);

        let out = normalize_for_provider(req);
        assert_eq!(
            out.messages[0].content_text(),
            Some(
                "Let me check\n[Tool: calc (ID: t9)]\nInput: {\"x\":1}\n\n\
                 [Image content - not displayed in text format]\n\
                 [Tool Result ID: t8]\ndone"
            )
        );
    }

    #[test]
    fn test_missing_content_and_extra_fields() {
        let mut msg = ChatMessage::text("user", "hi");
        msg.content = None;
        msg.extra.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
        let empty = blocks("assistant", Vec::new());

        let out = normalize_for_provider(request(vec![msg, empty]));
        assert_eq!(out.messages[0].content_text(), Some(PLACEHOLDER));
        assert!(out.messages[0].extra.is_empty());
        assert_eq!(out.messages[1].content_text(), Some(PLACEHOLDER));
    }

    #[test]
    fn test_prepare_only_flattens_when_required() {
        let make = || {
            let mut req = request(vec![blocks(
                "user",
                vec![ChatBlock::Text {
                    text: "a".to_string(),
                }],
            )]);
            req.tool_choice = Some(ChatToolChoice::String("any".to_string()));
            req
        };

        let openai = prepare_for_provider(make(), Provider::OpenAi);
        assert_eq!(openai.messages[0].content_text(), Some("a"));
        assert_eq!(
            openai.tool_choice,
            Some(ChatToolChoice::String("required".to_string()))
        );

        let gemini = prepare_for_provider(make(), Provider::Gemini);
        assert!(matches!(gemini.messages[0].content, Some(ChatContent::Blocks(_))));
        assert_eq!(
            gemini.tool_choice,
            Some(ChatToolChoice::String("required".to_string()))
        );
    }

    #[test]
    fn test_known_message_fields_survive_normalization() {
        let mut msg = ChatMessage::text("user", "hi");
        msg.extra.insert("name".to_string(), json!("alice"));
        msg.extra.insert("cache_control".to_string(), json!({"type": "ephemeral"}));
        let mut tool = ChatMessage::text("tool", "42");
        tool.extra.insert("tool_call_id".to_string(), json!("call_1"));

        let out = normalize_for_provider(request(vec![msg, tool]));
        assert_eq!(out.messages[0].name.as_deref(), Some("alice"));
        assert!(out.messages[0].extra.is_empty());
        assert_eq!(out.messages[1].tool_call_id.as_deref(), Some("call_1"));

        let body = serde_json::to_value(&out.messages[0]).unwrap();
        assert_eq!(body, json!({"role": "user", "content": "hi", "name": "alice"}));
    }

    #[test]
    fn test_structured_providers_get_tool_blocks_as_text() {
        let mut input = serde_json::Map::new();
        input.insert("city".to_string(), json!("London"));
        let mut req = request(vec![
            blocks(
                "assistant",
                vec![
                    ChatBlock::Text {
                        text: "Checking".to_string(),
                    },
                    ChatBlock::ToolUse {
                        id: "t1".to_string(),
                        name: "get_weather".to_string(),
                        input,
                    },
                ],
            ),
            blocks(
                "user",
                vec![
                    ChatBlock::ToolResult {
                        tool_use_id: "t1".to_string(),
                        content: vec![json!({"type": "text", "text": "sunny"})],
                    },
                    ChatBlock::Text {
                        text: "thanks".to_string(),
                    },
                ],
            ),
        ]);
        req.tool_choice = Some(ChatToolChoice::String("any".to_string()));

        let out = prepare_for_provider(req, Provider::Gemini);
        let body = serde_json::to_value(&out).unwrap();
        assert_eq!(
            body["messages"][0]["content"],
            json!([
                {"type": "text", "text": "Checking"},
                {"type": "text", "text": "[Tool: get_weather (ID: t1)]\nInput: {\"city\":\"London\"}"}
            ])
        );
        assert_eq!(
            body["messages"][1]["content"],
            json!([
                {"type": "text", "text": "[Tool Result ID: t1]\nsunny"},
                {"type": "text", "text": "thanks"}
            ])
        );
        assert_eq!(body["tool_choice"], "required");
    }
}
