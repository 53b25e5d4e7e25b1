//! HTTP client for the OpenAI-compatible chat completion endpoints.
//!
//! Sends a prepared request to `<base_url>/chat/completions` with bearer auth.
//! Non-streaming calls return the whole body; streaming calls return the
//! upstream SSE stream decoded into chunks, ending at `[DONE]`.

use std::collections::HashMap;
use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::{future, Stream, StreamExt};
use serde_json::Value;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::providers::Provider;
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse};
use crate::translate::view::UpstreamPayload;

pub type UpstreamCompletion = UpstreamPayload<ChatCompletionResponse>;
pub type UpstreamChunk = UpstreamPayload<ChatCompletionChunk>;

/// Decoded upstream chunks. Malformed chunk payloads surface as
/// [`ProxyError::Json`] items; transport failures as any other error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<UpstreamChunk>> + Send>>;

const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_urls: HashMap<Provider, String>,
}

impl UpstreamClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: &ProxyConfig) -> Self {
        let base_urls = Provider::ALL
            .into_iter()
            .map(|p| (p, config.base_url(p)))
            .collect();
        Self { http, base_urls }
    }

    #[must_use]
    pub fn endpoint(&self, provider: Provider) -> String {
        let base = self
            .base_urls
            .get(&provider)
            .map_or(provider.preset().base_url, String::as_str);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    /// Non-streaming completion.
    pub async fn complete(
        &self,
        req: &ChatCompletionRequest,
        provider: Provider,
    ) -> Result<UpstreamCompletion> {
        let response = self.send(req, provider).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::provider(format!("Failed to read response body: {e}")))?;

        let value: Value = serde_json::from_slice(&body).map_err(|e| {
            ProxyError::provider(format!(
                "Failed to parse provider response: {e}. Body: {}",
                truncate(&String::from_utf8_lossy(&body), ERROR_BODY_LIMIT)
            ))
        })?;
        Ok(UpstreamPayload::from_value(value))
    }

    /// Streaming completion. Errors before the first byte (connection, non-2xx
    /// status) are returned here; later ones arrive as stream items.
    pub async fn stream(&self, req: &ChatCompletionRequest, provider: Provider) -> Result<ChunkStream> {
        let response = self.send(req, provider).await?;

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            })
            .filter_map(|event| {
                future::ready(match event {
                    Ok(e) if e.data.trim().is_empty() => None,
                    Ok(e) => Some(decode_chunk(&e.data)),
                    Err(e) => Some(Err(ProxyError::provider(format!("Upstream stream error: {e}")))),
                })
            });

        Ok(Box::pin(chunks))
    }

    async fn send(&self, req: &ChatCompletionRequest, provider: Provider) -> Result<reqwest::Response> {
        let api_key = req
            .api_key
            .as_deref()
            .ok_or_else(|| ProxyError::missing_credential(provider.to_string()))?;

        // Upstreams want the bare model name.
        let mut body = req.clone();
        if let Some((_, bare)) = Provider::split_prefixed(&req.model) {
            body.model = bare.to_string();
        }

        let url = self.endpoint(provider);
        tracing::debug!(url = %url, model = %body.model, stream = body.stream, "Upstream request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProxyError::provider(format!("Request to {provider} failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(upstream_error(status.as_u16(), &text))
    }
}

fn decode_chunk(data: &str) -> Result<UpstreamChunk> {
    let value: Value = serde_json::from_str(data)?;

    // Some providers report failures in-band after the stream has started.
    if let Some(error) = value.get("error").filter(|e| e.is_object()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("upstream stream error");
        let error_type = error
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("api_error");
        return Err(ProxyError::upstream(500, error_type, message));
    }

    Ok(UpstreamPayload::from_value(value))
}

fn upstream_error(status: u16, body: &str) -> ProxyError {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) => ProxyError::upstream(status, err.error.error_type, err.error.message),
        Err(_) => ProxyError::upstream(
            status,
            "api_error",
            format!("Provider returned status {status}: {}", truncate(body, ERROR_BODY_LIMIT)),
        ),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::view::ChunkView;

    #[test]
    fn test_endpoint_uses_config_override() {
        let mut config = ProxyConfig::default();
        config.providers.insert(
            "openai".to_string(),
            crate::config::ProviderOverride {
                base_url: Some("http://127.0.0.1:9000/v1/".to_string()),
                ..Default::default()
            },
        );
        let client = UpstreamClient::new(reqwest::Client::new(), &config);
        assert_eq!(
            client.endpoint(Provider::OpenAi),
            "http://127.0.0.1:9000/v1/chat/completions"
        );
        assert_eq!(
            client.endpoint(Provider::Gemini),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
    }

    #[test]
    fn test_upstream_error_parsing() {
        let err = upstream_error(
            429,
            r#"{"error": {"message": "Too many requests", "type": "rate_limit_exceeded"}}"#,
        );
        assert!(matches!(
            err,
            ProxyError::Upstream { status: 429, ref error_type, ref message }
                if error_type == "rate_limit_exceeded" && message == "Too many requests"
        ));

        let err = upstream_error(502, "<html>bad gateway</html>");
        assert!(matches!(err, ProxyError::Upstream { status: 502, .. }));
    }

    #[test]
    fn test_decode_chunk() {
        let chunk = decode_chunk(r#"{"choices": [{"delta": {"content": "hi"}}]}"#).unwrap();
        assert_eq!(ChunkView::content(&chunk).unwrap().as_deref(), Some("hi"));

        let bad = decode_chunk("{not json").unwrap_err();
        assert!(bad.is_chunk_local());

        let in_band = decode_chunk(r#"{"error": {"message": "overloaded", "type": "server_error"}}"#)
            .unwrap_err();
        assert!(!in_band.is_chunk_local());
    }

    #[test]
    fn test_request_without_key_is_not_sent() {
        let req: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "openai/gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 16,
            "temperature": 1.0,
            "stream": false
        }))
        .unwrap();
        let client = UpstreamClient::new(reqwest::Client::new(), &ProxyConfig::default());

        let err = tokio_test::block_on(client.complete(&req, Provider::OpenAi)).unwrap_err();
        assert!(matches!(err, ProxyError::MissingCredential { .. }));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 10), "short");
    }
}
