//! Upstream chat completions translated back into Anthropic messages and errors.

use serde_json::{Map, Value};

use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock};
use super::openai_types::ChatErrorResponse;
use super::view::{CompletionView, ToolCall};
use crate::error::Result;
use crate::router::RoutedModel;

/// Translate a complete upstream response into an Anthropic Messages response.
///
/// Never fails: a response that cannot be converted comes back as a single
/// text block describing the problem, with zero usage and `end_turn`.
pub fn to_anthropic_response<R>(resp: &R, route: &RoutedModel) -> MessagesResponse
where
    R: CompletionView + ?Sized,
{
    match convert(resp, route) {
        Ok(message) => message,
        Err(e) => {
            tracing::error!(error = %e, model = %route.requested, "Error converting response");
            let mut message = MessagesResponse::empty(new_message_id(), &route.requested);
            message.content.push(ResponseContentBlock::Text {
                text: format!("Error converting response: {e}. Please check server logs."),
            });
            message.stop_reason = Some("end_turn".to_string());
            message
        }
    }
}

fn convert<R>(resp: &R, route: &RoutedModel) -> Result<MessagesResponse>
where
    R: CompletionView + ?Sized,
{
    let text = resp.content()?.filter(|t| !t.is_empty());
    let tool_calls = resp.tool_calls()?;

    let id = resp
        .response_id()
        .map_or_else(new_message_id, |id| {
            format!("msg_{}", id.trim_start_matches("chatcmpl-"))
        });

    let mut message = MessagesResponse::empty(id, &route.requested);

    if let Some(text) = text {
        message.content.push(ResponseContentBlock::Text { text });
    }

    if !tool_calls.is_empty() {
        if route.supports_native_tool_use() {
            message
                .content
                .extend(tool_calls.into_iter().map(tool_use_block));
        } else {
            let rendered = render_tool_calls(&tool_calls);
            match message.content.first_mut() {
                Some(ResponseContentBlock::Text { text }) => text.push_str(&rendered),
                _ => message
                    .content
                    .push(ResponseContentBlock::Text { text: rendered }),
            }
        }
    }

    // Clients expect at least one block.
    if message.content.is_empty() {
        message.content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    message.stop_reason = Some(
        resp.finish_reason()
            .map_or_else(|| "end_turn".to_string(), |r| map_finish_reason(&r).to_string()),
    );
    message.usage = resp.usage();

    Ok(message)
}

fn new_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

fn tool_use_block(call: ToolCall) -> ResponseContentBlock {
    let input = match call.arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| {
            tracing::warn!(arguments = %raw, "Failed to parse tool arguments as JSON");
            let mut wrapped = Map::new();
            wrapped.insert("raw".to_string(), Value::String(raw));
            Value::Object(wrapped)
        }),
        other => other,
    };

    ResponseContentBlock::ToolUse {
        id: call
            .id
            .unwrap_or_else(|| format!("tool_{}", uuid::Uuid::new_v4())),
        name: call.name,
        input,
    }
}

/// Human-readable rendering for destinations without native tool-use blocks.
fn render_tool_calls(calls: &[ToolCall]) -> String {
    let mut text = String::from("\n\nTool usage:\n");
    for call in calls {
        let arguments = match &call.arguments {
            Value::String(raw) => serde_json::from_str::<Value>(raw)
                .ok()
                .and_then(|v| serde_json::to_string_pretty(&v).ok())
                .unwrap_or_else(|| raw.clone()),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        };
        text.push_str(&format!("Tool: {}\nArguments: {arguments}\n\n", call.name));
    }
    text
}

/// Map an upstream finish reason to an Anthropic stop reason.
#[must_use]
pub fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        _ => "end_turn",
    }
}

/// Translate an upstream error body into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    ErrorResponse::new(anthropic_error_type(&err.error.error_type), &err.error.message)
}

/// Anthropic error `type` for an upstream error type.
#[must_use]
pub fn anthropic_error_type(upstream: &str) -> &'static str {
    match upstream {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" | "invalid_api_key" => "authentication_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => "api_error",
    }
}
