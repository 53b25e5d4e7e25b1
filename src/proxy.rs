//! Per-request pipeline: route, translate, normalize, attach credentials, call
//! upstream, translate back.

use futures::stream::{BoxStream, StreamExt};

use crate::config::CredentialSource;
use crate::error::{ProxyError, Result};
use crate::providers::Provider;
use crate::router::{ModelRouter, RoutedModel};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse};
use crate::translate::normalize::prepare_for_provider;
use crate::translate::openai_types::{ChatCompletionRequest, ChatContent};
use crate::translate::request::to_normalized_request;
use crate::translate::response::to_anthropic_response;
use crate::translate::streaming::{translate_stream, SseFrame};
use crate::upstream::UpstreamClient;

const CHARS_PER_TOKEN: usize = 4;

/// A client request translated for one destination.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub route: RoutedModel,
    pub provider: Provider,
    pub request: ChatCompletionRequest,
}

impl Prepared {
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.request.tools.as_ref().map_or(0, Vec::len)
    }
}

/// Validate, route and translate a client request. Models no rule recognizes
/// go to the preferred provider under their own name.
pub fn prepare(req: &MessagesRequest, router: &ModelRouter) -> Result<Prepared> {
    req.validate()?;

    let mut route = router.route(&req.model);
    let provider = *route.provider.get_or_insert(router.preferred());

    let request = prepare_for_provider(to_normalized_request(req, &route), provider);

    Ok(Prepared {
        route,
        provider,
        request,
    })
}

/// Fill in the destination's API key.
pub fn attach_credentials(prepared: &mut Prepared, credentials: &dyn CredentialSource) -> Result<()> {
    let key = credentials
        .api_key(prepared.provider)
        .ok_or_else(|| ProxyError::missing_credential(prepared.provider.to_string()))?;
    tracing::debug!(provider = %prepared.provider, model = %prepared.route.model, "Using API key for provider");
    prepared.request.api_key = Some(key);
    Ok(())
}

pub async fn proxy_non_streaming(
    prepared: &Prepared,
    upstream: &UpstreamClient,
) -> Result<MessagesResponse> {
    let completion = upstream
        .complete(&prepared.request, prepared.provider)
        .await?;
    Ok(to_anthropic_response(&completion, &prepared.route))
}

/// Open the upstream stream and translate it. Fails only if the upstream
/// cannot be reached or rejects the request; everything after that is
/// reported inside the event stream.
pub async fn proxy_streaming(
    prepared: &Prepared,
    upstream: &UpstreamClient,
) -> Result<BoxStream<'static, SseFrame>> {
    let chunks = upstream.stream(&prepared.request, prepared.provider).await?;
    Ok(translate_stream(chunks, prepared.route.requested.clone()).boxed())
}

/// Rough input token count: about four characters per token over the
/// normalized messages, with tools counted by their JSON declaration.
#[must_use]
pub fn estimate_input_tokens(request: &ChatCompletionRequest) -> u64 {
    let message_chars: usize = request
        .messages
        .iter()
        .map(|m| match &m.content {
            Some(ChatContent::Text(text)) => text.chars().count(),
            Some(ChatContent::Blocks(blocks)) => serde_json::to_string(blocks)
                .map(|s| s.chars().count())
                .unwrap_or(0),
            None => 0,
        })
        .sum();

    let tool_chars: usize = request
        .tools
        .iter()
        .flatten()
        .map(|t| serde_json::to_string(t).map(|s| s.chars().count()).unwrap_or(0))
        .sum();

    let chars = message_chars + tool_chars;
    let tokens = chars.div_ceil(CHARS_PER_TOKEN).max(1);
    u64::try_from(tokens).unwrap_or(u64::MAX)
}
