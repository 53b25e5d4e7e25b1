//! Read-only accessors over upstream completion shapes.
//!
//! Upstream results arrive either as the typed structs in
//! [`openai_types`](super::openai_types) or, when a vendor's payload does not
//! fit them, as a raw JSON mapping. The response and stream translators only
//! talk to [`CompletionView`] and [`ChunkView`], which are implemented for both.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::anthropic_types::Usage;
use super::openai_types::{ChatCompletionChunk, ChatCompletionResponse};
use crate::error::{ProxyError, Result};

/// A complete tool call from a non-streaming response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    /// Usually a JSON string; some vendors send the object itself.
    pub arguments: Value,
}

/// One streamed piece of a tool call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallFragment {
    pub index: u64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

pub trait CompletionView {
    fn response_id(&self) -> Option<String>;
    fn content(&self) -> Result<Option<String>>;
    fn tool_calls(&self) -> Result<Vec<ToolCall>>;
    fn finish_reason(&self) -> Option<String>;
    fn usage(&self) -> Usage;
}

pub trait ChunkView {
    fn usage(&self) -> Option<Usage>;
    fn content(&self) -> Result<Option<String>>;
    fn tool_calls(&self) -> Result<Vec<ToolCallFragment>>;
    fn finish_reason(&self) -> Option<String>;
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.filter(|s| !s.is_empty()).cloned()
}

// ---------------------------------------------------------------------------
// Typed shapes
// ---------------------------------------------------------------------------

impl CompletionView for ChatCompletionResponse {
    fn response_id(&self) -> Option<String> {
        non_empty(Some(&self.id))
    }

    fn content(&self) -> Result<Option<String>> {
        Ok(self.choices.first().and_then(|c| c.message.content.clone()))
    }

    fn tool_calls(&self) -> Result<Vec<ToolCall>> {
        let calls = self
            .choices
            .first()
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: non_empty(Some(&tc.id)),
                        name: tc.function.name.clone(),
                        arguments: Value::String(tc.function.arguments.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(calls)
    }

    fn finish_reason(&self) -> Option<String> {
        self.choices.first().and_then(|c| c.finish_reason.clone())
    }

    fn usage(&self) -> Usage {
        self.usage.as_ref().map_or_else(Usage::default, |u| {
            Usage::new(u.prompt_tokens, u.completion_tokens)
        })
    }
}

impl ChunkView for ChatCompletionChunk {
    fn usage(&self) -> Option<Usage> {
        self.usage
            .as_ref()
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
    }

    // Only `content` is answer text; reasoning fields are never surfaced.
    fn content(&self) -> Result<Option<String>> {
        Ok(self.choices.first().and_then(|c| c.delta.content.clone()))
    }

    fn tool_calls(&self) -> Result<Vec<ToolCallFragment>> {
        let fragments = self
            .choices
            .first()
            .and_then(|c| c.delta.tool_calls.as_ref())
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCallFragment {
                        index: tc.index,
                        id: tc.id.clone(),
                        name: tc.function.as_ref().and_then(|f| f.name.clone()),
                        arguments: tc.function.as_ref().and_then(|f| f.arguments.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(fragments)
    }

    fn finish_reason(&self) -> Option<String> {
        self.choices.first().and_then(|c| c.finish_reason.clone())
    }
}

// ---------------------------------------------------------------------------
// Mapping shapes
// ---------------------------------------------------------------------------

fn first_choice(value: &Value) -> Option<&Value> {
    value.get("choices").and_then(Value::as_array).and_then(|c| c.first())
}

/// `message` for completions, `delta` for chunks, whichever is present.
fn choice_body(value: &Value) -> Option<&Value> {
    let choice = first_choice(value)?;
    choice.get("delta").or_else(|| choice.get("message"))
}

fn usage_from(value: &Value) -> Option<Usage> {
    let usage = value.get("usage").filter(|u| u.is_object())?;
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage::new(count("prompt_tokens"), count("completion_tokens")))
}

fn content_from(body: Option<&Value>) -> Result<Option<String>> {
    match body.and_then(|b| b.get("content")) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        // Content-part arrays: keep the text parts.
        Some(Value::Array(parts)) => Ok(Some(
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>(),
        )),
        Some(other) => Err(ProxyError::translation(format!(
            "unexpected message content: {other}"
        ))),
    }
}

fn tool_call_entries(body: Option<&Value>) -> Result<Vec<&Value>> {
    match body.and_then(|b| b.get("tool_calls")) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(calls)) => calls
            .iter()
            .map(|c| {
                if c.is_object() {
                    Ok(c)
                } else {
                    Err(ProxyError::translation(format!("tool call is not an object: {c}")))
                }
            })
            .collect(),
        Some(single @ Value::Object(_)) => Ok(vec![single]),
        Some(other) => Err(ProxyError::translation(format!(
            "unexpected tool_calls value: {other}"
        ))),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

impl CompletionView for Value {
    fn response_id(&self) -> Option<String> {
        string_field(self, "id").filter(|id| !id.is_empty())
    }

    fn content(&self) -> Result<Option<String>> {
        content_from(choice_body(self))
    }

    fn tool_calls(&self) -> Result<Vec<ToolCall>> {
        tool_call_entries(choice_body(self))?
            .into_iter()
            .map(|call| {
                let function = call.get("function");
                Ok(ToolCall {
                    id: string_field(call, "id").filter(|id| !id.is_empty()),
                    name: function.and_then(|f| string_field(f, "name")).unwrap_or_default(),
                    arguments: function
                        .and_then(|f| f.get("arguments"))
                        .cloned()
                        .unwrap_or_else(|| Value::String("{}".to_string())),
                })
            })
            .collect()
    }

    fn finish_reason(&self) -> Option<String> {
        first_choice(self).and_then(|c| string_field(c, "finish_reason"))
    }

    fn usage(&self) -> Usage {
        usage_from(self).unwrap_or_default()
    }
}

impl ChunkView for Value {
    fn usage(&self) -> Option<Usage> {
        usage_from(self)
    }

    fn content(&self) -> Result<Option<String>> {
        content_from(choice_body(self))
    }

    fn tool_calls(&self) -> Result<Vec<ToolCallFragment>> {
        tool_call_entries(choice_body(self))?
            .into_iter()
            .map(|call| {
                let function = call.get("function");
                let arguments = match function.and_then(|f| f.get("arguments")) {
                    None | Some(Value::Null) => None,
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(other) => Some(other.to_string()),
                };
                Ok(ToolCallFragment {
                    index: call.get("index").and_then(Value::as_u64).unwrap_or(0),
                    id: string_field(call, "id"),
                    name: function.and_then(|f| string_field(f, "name")),
                    arguments,
                })
            })
            .collect()
    }

    fn finish_reason(&self) -> Option<String> {
        first_choice(self).and_then(|c| string_field(c, "finish_reason"))
    }
}

// ---------------------------------------------------------------------------
// Either shape
// ---------------------------------------------------------------------------

/// An upstream payload: the typed struct when the body fits it, the raw
/// mapping otherwise.
#[derive(Debug, Clone)]
pub enum UpstreamPayload<T> {
    Typed(T),
    Raw(Value),
}

impl<T: DeserializeOwned> UpstreamPayload<T> {
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<T>(value.clone()) {
            Ok(typed) => UpstreamPayload::Typed(typed),
            Err(e) => {
                tracing::debug!(error = %e, "Upstream payload does not fit the typed shape");
                UpstreamPayload::Raw(value)
            }
        }
    }
}

impl<T: CompletionView> CompletionView for UpstreamPayload<T> {
    fn response_id(&self) -> Option<String> {
        match self {
            UpstreamPayload::Typed(t) => t.response_id(),
            UpstreamPayload::Raw(v) => CompletionView::response_id(v),
        }
    }

    fn content(&self) -> Result<Option<String>> {
        match self {
            UpstreamPayload::Typed(t) => t.content(),
            UpstreamPayload::Raw(v) => CompletionView::content(v),
        }
    }

    fn tool_calls(&self) -> Result<Vec<ToolCall>> {
        match self {
            UpstreamPayload::Typed(t) => t.tool_calls(),
            UpstreamPayload::Raw(v) => CompletionView::tool_calls(v),
        }
    }

    fn finish_reason(&self) -> Option<String> {
        match self {
            UpstreamPayload::Typed(t) => t.finish_reason(),
            UpstreamPayload::Raw(v) => CompletionView::finish_reason(v),
        }
    }

    fn usage(&self) -> Usage {
        match self {
            UpstreamPayload::Typed(t) => t.usage(),
            UpstreamPayload::Raw(v) => CompletionView::usage(v),
        }
    }
}

impl<T: ChunkView> ChunkView for UpstreamPayload<T> {
    fn usage(&self) -> Option<Usage> {
        match self {
            UpstreamPayload::Typed(t) => t.usage(),
            UpstreamPayload::Raw(v) => ChunkView::usage(v),
        }
    }

    fn content(&self) -> Result<Option<String>> {
        match self {
            UpstreamPayload::Typed(t) => t.content(),
            UpstreamPayload::Raw(v) => ChunkView::content(v),
        }
    }

    fn tool_calls(&self) -> Result<Vec<ToolCallFragment>> {
        match self {
            UpstreamPayload::Typed(t) => t.tool_calls(),
            UpstreamPayload::Raw(v) => ChunkView::tool_calls(v),
        }
    }

    fn finish_reason(&self) -> Option<String> {
        match self {
            UpstreamPayload::Typed(t) => t.finish_reason(),
            UpstreamPayload::Raw(v) => ChunkView::finish_reason(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mapping_completion() {
        let resp = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "content": "hi",
                    "tool_calls": [{"id": "c1", "function": {"name": "f", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 2}
        });

        assert_eq!(CompletionView::content(&resp).unwrap().as_deref(), Some("hi"));
        assert_eq!(CompletionView::finish_reason(&resp).as_deref(), Some("tool_calls"));
        assert_eq!(CompletionView::usage(&resp), Usage::new(7, 2));
        let calls = CompletionView::tool_calls(&resp).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("c1"));
        assert_eq!(calls[0].arguments, json!("{}"));
    }

    #[test]
    fn test_mapping_rejects_malformed_tool_calls() {
        let resp = json!({"choices": [{"message": {"tool_calls": "nope"}}]});
        assert!(CompletionView::tool_calls(&resp).is_err());

        let chunk = json!({"choices": [{"delta": {"tool_calls": [1, 2]}}]});
        assert!(ChunkView::tool_calls(&chunk).is_err());
    }

    #[test]
    fn test_mapping_chunk_fragments() {
        let chunk = json!({
            "choices": [{"delta": {"tool_calls": [
                {"index": 3, "id": "call_1", "function": {"name": "search", "arguments": "{\"q\""}},
                {"function": {"arguments": {"k": 1}}}
            ]}}]
        });
        let fragments = ChunkView::tool_calls(&chunk).unwrap();
        assert_eq!(fragments[0].index, 3);
        assert_eq!(fragments[0].name.as_deref(), Some("search"));
        assert_eq!(fragments[0].arguments.as_deref(), Some("{\"q\""));
        assert_eq!(fragments[1].index, 0);
        assert_eq!(fragments[1].arguments.as_deref(), Some("{\"k\":1}"));
        assert_eq!(ChunkView::usage(&chunk), None);
    }

    #[test]
    fn test_reasoning_is_not_content_in_either_shape() {
        let payload = json!({
            "choices": [{"delta": {"reasoning_content": "secret thoughts"}}]
        });
        let typed: ChatCompletionChunk = serde_json::from_value(payload.clone()).unwrap();
        assert_eq!(ChunkView::content(&typed).unwrap(), None);
        assert_eq!(ChunkView::content(&payload).unwrap(), None);

        let both = json!({
            "choices": [{"delta": {"content": "answer", "reasoning_content": "secret thoughts"}}]
        });
        let typed: ChatCompletionChunk = serde_json::from_value(both.clone()).unwrap();
        assert_eq!(ChunkView::content(&typed).unwrap().as_deref(), Some("answer"));
        assert_eq!(ChunkView::content(&both).unwrap().as_deref(), Some("answer"));
    }

    #[test]
    fn test_payload_falls_back_to_mapping() {
        let typed: UpstreamPayload<ChatCompletionResponse> = UpstreamPayload::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{"message": {"content": "hi"}, "finish_reason": "stop"}]
        }));
        assert!(matches!(typed, UpstreamPayload::Typed(_)));
        assert_eq!(CompletionView::content(&typed).unwrap().as_deref(), Some("hi"));

        // content parts do not fit the typed struct
        let raw: UpstreamPayload<ChatCompletionResponse> = UpstreamPayload::from_value(json!({
            "choices": [{"message": {"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}}]
        }));
        assert!(matches!(raw, UpstreamPayload::Raw(_)));
        assert_eq!(CompletionView::content(&raw).unwrap().as_deref(), Some("ab"));
    }
}
