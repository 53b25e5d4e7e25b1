//! Maps the model name a client asks for onto a `provider/model` identifier.
//!
//! Claude model aliases ("haiku", "sonnet") are redirected to the configured
//! small and big models; bare names found in a provider catalog get that
//! provider's prefix. The router only ever looks at the model string.

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::providers::Provider;

/// Which rule produced a [`RoutedModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRule {
    /// "haiku" alias, redirected to the small model.
    SmallAlias,
    /// "sonnet" alias, redirected to the big model.
    BigAlias,
    /// Bare name found in a provider catalog and prefixed.
    Catalog,
    /// Already carried a known provider prefix; left alone.
    Prefixed,
    /// No rule matched and no prefix present; passed through as-is.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedModel {
    /// What the client sent.
    pub requested: String,
    /// Normalized identifier, `provider/model` unless unrecognized.
    pub model: String,
    pub provider: Option<Provider>,
    pub rule: RouteRule,
}

impl RoutedModel {
    /// Model name with the provider prefix removed.
    #[must_use]
    pub fn bare_name(&self) -> &str {
        Provider::split_prefixed(&self.model).map_or(self.model.as_str(), |(_, bare)| bare)
    }

    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.rule == RouteRule::Unrecognized
    }

    /// Claude destinations understand `tool_use` content blocks natively.
    #[must_use]
    pub fn supports_native_tool_use(&self) -> bool {
        self.bare_name().starts_with("claude-")
    }
}

#[derive(Debug, Clone)]
pub struct ModelRouter {
    preferred: Provider,
    big_model: String,
    small_model: String,
    catalogs: Vec<(Provider, Vec<String>)>,
}

impl ModelRouter {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        Ok(Self {
            preferred: config.preferred()?,
            big_model: config.big_model.clone(),
            small_model: config.small_model.clone(),
            catalogs: Provider::ALL
                .into_iter()
                .map(|p| (p, config.catalog(p)))
                .collect(),
        })
    }

    #[must_use]
    pub fn preferred(&self) -> Provider {
        self.preferred
    }

    /// Known models per provider, in catalog order.
    pub fn catalogs(&self) -> impl Iterator<Item = (Provider, &[String])> {
        self.catalogs.iter().map(|(p, models)| (*p, models.as_slice()))
    }

    fn serves(&self, provider: Provider, model: &str) -> bool {
        self.catalogs
            .iter()
            .any(|(p, models)| *p == provider && models.iter().any(|m| m == model))
    }

    fn alias_target(&self, model: &str) -> (Provider, String) {
        let provider = if self.serves(self.preferred, model) {
            self.preferred
        } else {
            Provider::DEFAULT
        };
        (provider, format!("{}/{model}", provider.prefix()))
    }

    #[must_use]
    pub fn route(&self, requested: &str) -> RoutedModel {
        let existing = Provider::split_prefixed(requested);
        let bare = existing.map_or(requested, |(_, bare)| bare);
        let lowered = bare.to_lowercase();

        let (provider, model, rule) = if lowered.contains("haiku") {
            let (p, m) = self.alias_target(&self.small_model);
            (Some(p), m, RouteRule::SmallAlias)
        } else if lowered.contains("sonnet") {
            let (p, m) = self.alias_target(&self.big_model);
            (Some(p), m, RouteRule::BigAlias)
        } else if let Some(p) = Provider::ALL.into_iter().find(|p| self.serves(*p, bare)) {
            if existing.map(|(e, _)| e) == Some(p) {
                (Some(p), requested.to_string(), RouteRule::Prefixed)
            } else {
                (Some(p), format!("{}/{bare}", p.prefix()), RouteRule::Catalog)
            }
        } else if let Some((p, _)) = existing {
            (Some(p), requested.to_string(), RouteRule::Prefixed)
        } else {
            (None, requested.to_string(), RouteRule::Unrecognized)
        };

        match rule {
            RouteRule::Unrecognized => {
                tracing::warn!(model = requested, "No prefix or mapping rule for model, using as is");
            }
            RouteRule::Prefixed => {}
            _ => tracing::debug!(from = requested, to = %model, "Model mapping"),
        }

        RoutedModel {
            requested: requested.to_string(),
            model,
            provider,
            rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router_with(preferred: &str, big: &str, small: &str) -> ModelRouter {
        let config = ProxyConfig {
            preferred_provider: preferred.to_string(),
            big_model: big.to_string(),
            small_model: small.to_string(),
            ..ProxyConfig::default()
        };
        ModelRouter::from_config(&config).unwrap()
    }

    #[test]
    fn test_aliases_go_to_default_provider() {
        let router = router_with("openai", "gpt-4.1", "gpt-4.1-mini");

        let haiku = router.route("claude-3-5-haiku-20241022");
        assert_eq!(haiku.model, "openai/gpt-4.1-mini");
        assert_eq!(haiku.rule, RouteRule::SmallAlias);

        let sonnet = router.route("anthropic/claude-3-7-SONNET-20250219");
        assert_eq!(sonnet.model, "openai/gpt-4.1");
        assert_eq!(sonnet.provider, Some(Provider::OpenAi));
    }

    #[test]
    fn test_preferred_provider_needs_model_in_catalog() {
        let router = router_with("google", "gemini-2.5-pro", "gpt-4.1-mini");

        assert_eq!(router.route("claude-sonnet-4").model, "gemini/gemini-2.5-pro");
        // small model is not a gemini model, so the default provider wins
        assert_eq!(router.route("claude-haiku").model, "openai/gpt-4.1-mini");
    }

    #[test]
    fn test_catalog_prefixing() {
        let router = router_with("openai", "gpt-4.1", "gpt-4.1-mini");

        let routed = router.route("gemini-2.0-flash");
        assert_eq!(routed.model, "gemini/gemini-2.0-flash");
        assert_eq!(routed.rule, RouteRule::Catalog);

        assert_eq!(router.route("gpt-4o").model, "openai/gpt-4o");
        assert_eq!(router.route("openai/gpt-4o").rule, RouteRule::Prefixed);
    }

    #[test]
    fn test_unknown_model_is_flagged() {
        let router = router_with("openai", "gpt-4.1", "gpt-4.1-mini");

        let routed = router.route("llama-3-70b");
        assert_eq!(routed.model, "llama-3-70b");
        assert!(routed.is_flagged());
        assert_eq!(routed.provider, None);

        let prefixed = router.route("openai/my-finetune");
        assert_eq!(prefixed.model, "openai/my-finetune");
        assert!(!prefixed.is_flagged());
    }

    #[test]
    fn test_route_is_idempotent() {
        let router = router_with("openai", "gpt-4.1", "gpt-4.1-mini");

        for name in [
            "claude-3-5-haiku-20241022",
            "claude-sonnet-4-20250514",
            "gpt-4o",
            "gemini-2.5-flash",
            "claude-opus-4-20250514",
            "something-else",
        ] {
            let once = router.route(name);
            let twice = router.route(&once.model);
            assert_eq!(once.model, twice.model, "re-routing {name}");
            assert_eq!(router.route(name), once, "routing {name} is deterministic");
        }
    }

    #[test]
    fn test_native_tool_use_detection() {
        let router = router_with("openai", "gpt-4.1", "gpt-4.1-mini");
        assert!(router.route("claude-opus-4-20250514").supports_native_tool_use());
        assert!(!router.route("claude-sonnet-4").supports_native_tool_use());
        assert_eq!(router.route("claude-opus-4-20250514").bare_name(), "claude-opus-4-20250514");
    }
}
