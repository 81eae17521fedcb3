//! Provider router: builds priced provider instances from config.
//!
//! Agents name a provider and a model; the router resolves the API key,
//! base URL and pricing for that pair and hands back a ready provider.

use std::collections::HashMap;
use std::sync::Arc;
use taskloom_config::{AppConfig, ProviderConfig};
use taskloom_core::error::ProviderError;
use taskloom_core::provider::{ModelInfo, Provider};
use taskloom_telemetry::{ModelPricing, PricingTable};
use tracing::{debug, warn};

use crate::anthropic::AnthropicProvider;

const ANTHROPIC_CONTEXT_WINDOW: u64 = 200_000;

/// Routes provider requests to the configured backend.
pub struct ProviderRouter {
    default_provider: String,
    default_model: String,
    max_tokens: u32,
    global_api_key: Option<String>,
    providers: HashMap<String, ProviderConfig>,
    pricing: Arc<PricingTable>,
}

impl ProviderRouter {
    /// Create a router with defaults and no provider settings.
    pub fn new(
        default_provider: impl Into<String>,
        default_model: impl Into<String>,
        pricing: Arc<PricingTable>,
    ) -> Self {
        Self {
            default_provider: default_provider.into(),
            default_model: default_model.into(),
            max_tokens: 4096,
            global_api_key: None,
            providers: HashMap::new(),
            pricing,
        }
    }

    /// Register settings for a provider.
    pub fn register(&mut self, name: impl Into<String>, config: ProviderConfig) {
        self.providers.insert(name.into(), config);
    }

    /// Text prepended to every system prompt sent through `provider`.
    pub fn system_prompt_prefix(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.system_prompt_prefix.as_deref())
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    /// Provider names the router can build, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = SUPPORTED_PROVIDERS.to_vec();
        names.sort();
        names
    }

    /// Describe `model` on `provider`, with prices filled in.
    pub fn model_info(&self, provider: &str, model: &str) -> ModelInfo {
        let mut info = ModelInfo {
            id: model.to_string(),
            name: model.to_string(),
            provider: provider.to_string(),
            default_max_tokens: self.max_tokens,
            ..Default::default()
        };
        if provider == "anthropic" {
            info.context_window = ANTHROPIC_CONTEXT_WINDOW;
            info.supports_attachments = true;
            info.can_reason = ["claude-opus-4", "claude-sonnet-4", "claude-3-7-sonnet"]
                .iter()
                .any(|prefix| model.starts_with(prefix));
        }
        self.pricing.price_model(&mut info);
        info
    }

    /// Build a provider for the given pair, falling back to the defaults.
    pub fn resolve(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let provider = provider.unwrap_or(&self.default_provider);
        let model = model.unwrap_or(&self.default_model);
        let settings = self.providers.get(provider);

        let api_key = settings
            .and_then(|s| s.api_key.clone())
            .or_else(|| self.global_api_key.clone())
            .ok_or_else(|| {
                ProviderError::NotConfigured(format!("no API key configured for {provider}"))
            })?;

        match provider {
            "anthropic" => {
                let info = self.model_info(provider, model);
                debug!(provider, model, "Building provider");
                let mut built = AnthropicProvider::new(api_key, info);
                if let Some(settings) = settings {
                    if let Some(url) = &settings.api_url {
                        built = built.with_base_url(url);
                    }
                    built = built.with_extra_headers(settings.extra_headers.clone());
                }
                Ok(Arc::new(built))
            }
            other => Err(ProviderError::NotConfigured(format!(
                "unsupported provider: {other}"
            ))),
        }
    }
}

const SUPPORTED_PROVIDERS: &[&str] = &["anthropic"];

/// Build a router from configuration, applying custom pricing overrides.
pub fn build_from_config(config: &AppConfig, pricing: Arc<PricingTable>) -> ProviderRouter {
    let mut router = ProviderRouter::new(
        &config.default_provider,
        &config.default_model,
        pricing,
    );
    for (model, price) in &config.telemetry.custom_pricing {
        let pricing = ModelPricing::new(price.input_per_m, price.output_per_m)
            .with_cache(price.cache_write_per_m, price.cache_read_per_m);
        if let Err(e) = router.pricing.set(model.clone(), pricing) {
            warn!(model = %model, error = %e, "Ignoring invalid pricing override");
        }
    }
    router.max_tokens = config.max_tokens;
    router.global_api_key = config.api_key.clone();
    for (name, provider_config) in &config.providers {
        router.register(name.clone(), provider_config.clone());
    }
    router
}
