//! Translate Anthropic Messages API requests into normalized chat-completion
//! requests.
//!
//! Handles system prompts, multi-part content (text, images, tool use, tool
//! results), tool declarations with schema sanitizing for strict providers,
//! tool choice mapping, and the per-provider output-token ceiling.

use serde_json::{Map, Value};

use super::anthropic_types::{
    ContentBlock, ImageSource, Message, MessageContent, MessagesRequest, Role, Tool, ToolChoice,
    ToolResultContent,
};
use super::openai_types::{
    ChatBlock, ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool,
    ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific, ImageUrlDetail, StreamOptions,
};
use crate::providers::Provider;
use crate::router::RoutedModel;

const DEFAULT_TEMPERATURE: f64 = 1.0;

/// String formats a schema-strict provider accepts on `type: string`.
const STRICT_STRING_FORMATS: &[&str] = &["enum", "date-time"];

/// Translate an Anthropic request into the normalized request shape.
/// Pure function: the routed model decides prefixing, clamping and schema
/// handling; nothing else about the destination is consulted.
#[must_use]
pub fn to_normalized_request(req: &MessagesRequest, route: &RoutedModel) -> ChatCompletionRequest {
    let provider = route.provider;
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    messages.extend(req.messages.iter().map(translate_message));

    let max_tokens = clamp_max_tokens(req.max_tokens, provider);
    let strict_schema = provider.is_some_and(Provider::strict_tool_schema);

    let tools = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| tools.iter().map(|t| translate_tool(t, strict_schema)).collect());

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let stream = req.is_streaming();
    let stream_options = stream.then_some(StreamOptions {
        include_usage: true,
    });

    ChatCompletionRequest {
        model: route.model.clone(),
        messages,
        max_tokens,
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        stream,
        stream_options,
        stop: req.stop_sequences.clone().filter(|s| !s.is_empty()),
        top_p: req.top_p.filter(|p| *p != 0.0),
        top_k: req.top_k.filter(|k| *k != 0),
        tools,
        tool_choice,
        user: req.metadata.as_ref().and_then(|m| m.user_id.clone()),
        api_key: None,
    }
}

fn clamp_max_tokens(requested: u64, provider: Option<Provider>) -> u64 {
    match provider.and_then(Provider::max_tokens_ceiling) {
        Some(ceiling) if requested > ceiling => {
            tracing::debug!(requested, ceiling, "Capping max_tokens to provider ceiling");
            ceiling
        }
        _ => requested,
    }
}

fn translate_message(msg: &Message) -> ChatMessage {
    let content = match &msg.content {
        MessageContent::Text(text) => ChatContent::Text(text.clone()),
        MessageContent::Blocks(blocks) if msg.role == Role::User && is_tool_results_only(blocks) => {
            ChatContent::Text(flatten_tool_results(blocks))
        }
        MessageContent::Blocks(blocks) => {
            ChatContent::Blocks(blocks.iter().filter_map(translate_block).collect())
        }
    };

    let mut translated = ChatMessage::new(msg.role.as_str(), content);
    translated.extra = msg.extra.clone();
    translated
}

fn is_tool_results_only(blocks: &[ContentBlock]) -> bool {
    !blocks.is_empty()
        && blocks
            .iter()
            .all(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

/// Providers reject user messages with no text, so a turn that only returns
/// tool results becomes one synthetic text message.
fn flatten_tool_results(blocks: &[ContentBlock]) -> String {
    let mut text = String::new();
    for block in blocks {
        if let ContentBlock::ToolResult {
            tool_use_id,
            content,
        } = block
        {
            text.push_str(&format!(
                "Tool result for {tool_use_id}:\n{}\n",
                tool_result_text(content)
            ));
        }
    }
    text.trim().to_string()
}

/// Plain-text rendering of a tool result's content.
#[must_use]
pub fn tool_result_text(content: &ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(text) => text.clone(),
        ToolResultContent::Blocks(items) => {
            let mut text = String::new();
            for item in items {
                match item.get("text").and_then(Value::as_str) {
                    Some(t) => text.push_str(t),
                    None => text.push_str(&stringify(item)),
                }
                text.push('\n');
            }
            text
        }
        ToolResultContent::Json(Value::Object(obj)) if is_text_object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ToolResultContent::Json(value) => stringify(value),
    }
}

fn is_text_object(obj: &Map<String, Value>) -> bool {
    obj.get("type").and_then(Value::as_str) == Some("text")
}

/// Strings render bare, everything else as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn translate_block(block: &ContentBlock) -> Option<ChatBlock> {
    match block {
        ContentBlock::Text { text } => Some(ChatBlock::Text { text: text.clone() }),
        ContentBlock::Image { source } => Some(ChatBlock::ImageUrl {
            image_url: ImageUrlDetail {
                url: image_url(source),
                detail: None,
            },
        }),
        ContentBlock::ToolUse { id, name, input } => Some(ChatBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => Some(ChatBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: tool_result_blocks(content),
        }),
        ContentBlock::Unsupported => {
            tracing::warn!("Dropping unsupported content block");
            None
        }
    }
}

fn image_url(source: &ImageSource) -> String {
    match (&source.url, &source.data) {
        (Some(url), _) => url.clone(),
        (None, Some(data)) => format!(
            "data:{};base64,{}",
            source.media_type.as_deref().unwrap_or("image/png"),
            data
        ),
        (None, None) => String::new(),
    }
}

/// Tool result content always travels as a block list.
fn tool_result_blocks(content: &ToolResultContent) -> Vec<Value> {
    let text_block = |text: String| {
        let mut block = Map::new();
        block.insert("type".to_string(), Value::String("text".to_string()));
        block.insert("text".to_string(), Value::String(text));
        Value::Object(block)
    };

    match content {
        ToolResultContent::Text(text) => vec![text_block(text.clone())],
        ToolResultContent::Blocks(items) => items.clone(),
        ToolResultContent::Json(Value::Null) => vec![text_block(String::new())],
        ToolResultContent::Json(value) => vec![text_block(stringify(value))],
    }
}

fn translate_tool(tool: &Tool, strict_schema: bool) -> ChatTool {
    let parameters = if strict_schema {
        tracing::debug!(tool = %tool.name, "Sanitizing tool schema for strict provider");
        sanitize_schema(tool.input_schema.clone())
    } else {
        tool.input_schema.clone()
    };

    ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters,
        },
    }
}

/// Recursively drop JSON-Schema keywords strict providers refuse to parse:
/// `additionalProperties`, `default`, and unsupported string `format`s.
#[must_use]
pub fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(mut obj) => {
            obj.remove("additionalProperties");
            obj.remove("default");

            let is_string = obj.get("type").and_then(Value::as_str) == Some("string");
            let bad_format = obj
                .get("format")
                .and_then(Value::as_str)
                .is_some_and(|f| !STRICT_STRING_FORMATS.contains(&f));
            if is_string && bad_format {
                obj.remove("format");
            }

            Value::Object(
                obj.into_iter()
                    .map(|(k, v)| (k, sanitize_schema(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Any => ChatToolChoice::String("any".to_string()),
        ToolChoice::Tool { name: Some(name) } => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
        ToolChoice::Auto | ToolChoice::Tool { name: None } | ToolChoice::Other => {
            ChatToolChoice::String("auto".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouteRule;
    use serde_json::json;

    fn route(model: &str, provider: Option<Provider>) -> RoutedModel {
        RoutedModel {
            requested: model.to_string(),
            model: model.to_string(),
            provider,
            rule: RouteRule::Prefixed,
        }
    }

    fn request(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_simple_text_request() {
        let req = request(json!({
            "model": "claude-3-5-haiku",
            "max_tokens": 1024,
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "Hello"}]
        }));

        let result = to_normalized_request(&req, &route("openai/gpt-4.1-mini", Some(Provider::OpenAi)));

        assert_eq!(result.model, "openai/gpt-4.1-mini");
        assert_eq!(result.messages.len(), 2); // system + user
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[0].content_text(), Some("You are helpful"));
        assert_eq!(result.messages[1].content_text(), Some("Hello"));
        assert!((result.temperature - 1.0).abs() < f64::EPSILON);
        assert!(!result.stream);
        assert!(result.stream_options.is_none());
        assert!(result.top_p.is_none());
    }

    #[test]
    fn test_system_blocks_are_joined() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 10,
            "system": [{"type": "text", "text": "A"}, {"type": "text", "text": "B"}],
            "messages": [{"role": "user", "content": "x"}]
        }));
        let result = to_normalized_request(&req, &route("m", None));
        assert_eq!(result.messages[0].content_text(), Some("A\n\nB"));
    }

    #[test]
    fn test_tool_result_only_message_is_flattened() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "toolu_1", "content": "result 1"},
                {"type": "tool_result", "tool_use_id": "toolu_2", "content": [
                    {"type": "text", "text": "part a"},
                    {"kind": "json", "v": 1}
                ]}
            ]}]
        }));

        let result = to_normalized_request(&req, &route("m", None));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(
            result.messages[0].content_text(),
            Some("Tool result for toolu_1:\nresult 1\nTool result for toolu_2:\npart a\n{\"kind\":\"json\",\"v\":1}")
        );
    }

    #[test]
    fn test_mixed_blocks_map_one_to_one() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [
                {"role": "user", "content": [
                    {"type": "text", "text": "look"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "AAAA"}},
                    {"type": "thinking", "thinking": "dropped"},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "ok"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t2", "name": "calc", "input": {"x": 1}}
                ]}
            ]
        }));

        let result = to_normalized_request(&req, &route("m", None));
        let Some(ChatContent::Blocks(user)) = &result.messages[0].content else {
            panic!("expected blocks");
        };
        assert_eq!(user.len(), 3);
        assert!(matches!(
            &user[1],
            ChatBlock::ImageUrl { image_url } if image_url.url == "data:image/jpeg;base64,AAAA"
        ));
        assert!(matches!(
            &user[2],
            ChatBlock::ToolResult { content, .. } if content[0] == json!({"type": "text", "text": "ok"})
        ));

        let Some(ChatContent::Blocks(assistant)) = &result.messages[1].content else {
            panic!("expected blocks");
        };
        assert!(matches!(&assistant[0], ChatBlock::ToolUse { name, .. } if name == "calc"));
    }

    #[test]
    fn test_max_tokens_clamped_per_provider() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 32000,
            "messages": [{"role": "user", "content": "x"}]
        }));
        assert_eq!(
            to_normalized_request(&req, &route("openai/gpt-4o", Some(Provider::OpenAi))).max_tokens,
            16_384
        );
        assert_eq!(
            to_normalized_request(&req, &route("anthropic/claude-opus-4", Some(Provider::Anthropic)))
                .max_tokens,
            32_000
        );
    }

    #[test]
    fn test_tools_and_choice() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 10,
            "stream": true,
            "stop_sequences": [],
            "top_k": 5,
            "messages": [{"role": "user", "content": "x"}],
            "tools": [{
                "name": "get_weather",
                "input_schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "city": {"type": "string", "format": "uri", "default": "Paris"},
                        "when": {"type": "string", "format": "date-time"}
                    },
                    "required": ["city"]
                }
            }],
            "tool_choice": {"type": "tool", "name": "get_weather"}
        }));

        let gemini = to_normalized_request(&req, &route("gemini/gemini-2.0-flash", Some(Provider::Gemini)));
        let tools = gemini.tools.as_ref().unwrap();
        assert_eq!(tools[0].function.description, "");
        assert_eq!(
            tools[0].function.parameters,
            json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string"},
                    "when": {"type": "string", "format": "date-time"}
                },
                "required": ["city"]
            })
        );
        assert_eq!(
            gemini.tool_choice,
            Some(ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction {
                    name: "get_weather".to_string()
                },
            }))
        );
        assert!(gemini.stream);
        assert!(gemini.stream_options.is_some());
        assert!(gemini.stop.is_none());
        assert_eq!(gemini.top_k, Some(5));

        // non-strict providers get the schema untouched
        let openai = to_normalized_request(&req, &route("openai/gpt-4o", Some(Provider::OpenAi)));
        assert_eq!(
            openai.tools.unwrap()[0].function.parameters,
            req.tools.as_ref().unwrap()[0].input_schema
        );
    }

    #[test]
    fn test_tool_choice_mapping() {
        assert_eq!(
            translate_tool_choice(&ToolChoice::Any),
            ChatToolChoice::String("any".to_string())
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::Tool { name: None }),
            ChatToolChoice::String("auto".to_string())
        );
        assert_eq!(
            translate_tool_choice(&ToolChoice::Other),
            ChatToolChoice::String("auto".to_string())
        );
    }

    #[test]
    fn test_extra_message_fields_are_carried() {
        let req = request(json!({
            "model": "m",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "x", "cache_control": {"type": "ephemeral"}}]
        }));
        let result = to_normalized_request(&req, &route("m", None));
        assert!(result.messages[0].extra.contains_key("cache_control"));
    }
}
