//! Built-in provider presets for the upstream model families the bridge can
//! route to.
//!
//! Each preset carries the base URL of the provider's OpenAI-compatible
//! endpoint, the environment variable holding its key, the catalog of model
//! names it is known to serve, and the request constraints the translators
//! have to honour for it.

use std::fmt;

/// Upstream provider family. The routed model identifier is always
/// `<prefix>/<model>` where the prefix is [`Provider::prefix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    OpenAi,
    Gemini,
    Anthropic,
}

impl Provider {
    /// Order in which catalogs are consulted when prefixing a bare model name.
    pub const ALL: [Provider; 3] = [Provider::Gemini, Provider::OpenAi, Provider::Anthropic];

    /// Provider used when the preferred one cannot serve an aliased model.
    pub const DEFAULT: Provider = Provider::OpenAi;

    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
        }
    }

    /// Parse a provider name as written in config or environment.
    /// "google" is accepted as an alias for Gemini.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Provider> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAi),
            "gemini" | "google" => Some(Provider::Gemini),
            "anthropic" => Some(Provider::Anthropic),
            _ => None,
        }
    }

    /// Split a `provider/model` identifier into its provider and bare model.
    #[must_use]
    pub fn split_prefixed(model: &str) -> Option<(Provider, &str)> {
        let (prefix, rest) = model.split_once('/')?;
        Self::ALL
            .into_iter()
            .find(|p| p.prefix() == prefix)
            .map(|p| (p, rest))
    }

    #[must_use]
    pub fn preset(self) -> &'static ProviderPreset {
        match self {
            Provider::OpenAi => &PRESETS[0],
            Provider::Gemini => &PRESETS[1],
            Provider::Anthropic => &PRESETS[2],
        }
    }

    /// Hard per-response output ceiling, if the family has one.
    #[must_use]
    pub fn max_tokens_ceiling(self) -> Option<u64> {
        self.preset().max_tokens_ceiling
    }

    /// Whether tool schemas must be stripped of keywords the provider rejects.
    #[must_use]
    pub fn strict_tool_schema(self) -> bool {
        self.preset().strict_tool_schema
    }

    /// Whether message content has to be collapsed into plain strings.
    #[must_use]
    pub fn flattens_content(self) -> bool {
        self.preset().flattens_content
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderPreset {
    pub provider: Provider,
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
    pub models: &'static [&'static str],
    pub max_tokens_ceiling: Option<u64>,
    pub strict_tool_schema: bool,
    pub flattens_content: bool,
}

const OPENAI_MODELS: &[&str] = &[
    "o3-mini",
    "o1",
    "o1-mini",
    "o1-pro",
    "gpt-4.5-preview",
    "gpt-4o",
    "gpt-4o-audio-preview",
    "chatgpt-4o-latest",
    "gpt-4o-mini",
    "gpt-4o-mini-audio-preview",
    "gpt-4.1",
    "gpt-4.1-mini",
];

const GEMINI_MODELS: &[&str] = &[
    "gemini-2.5-pro-preview-03-25",
    "gemini-2.0-flash",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
];

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-opus-4-20250514",
    "claude-3-opus-20240229",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
];

// Indexed by `Provider::preset`.
const PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        provider: Provider::OpenAi,
        base_url: "https://api.openai.com/v1",
        default_api_key_env: "OPENAI_API_KEY",
        models: OPENAI_MODELS,
        max_tokens_ceiling: Some(16_384),
        strict_tool_schema: false,
        flattens_content: true,
    },
    ProviderPreset {
        provider: Provider::Gemini,
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai",
        default_api_key_env: "GEMINI_API_KEY",
        models: GEMINI_MODELS,
        max_tokens_ceiling: Some(16_384),
        strict_tool_schema: true,
        flattens_content: false,
    },
    ProviderPreset {
        provider: Provider::Anthropic,
        base_url: "https://api.anthropic.com/v1",
        default_api_key_env: "ANTHROPIC_API_KEY",
        models: ANTHROPIC_MODELS,
        max_tokens_ceiling: None,
        strict_tool_schema: false,
        flattens_content: false,
    },
];

impl ProviderPreset {
    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }
}
