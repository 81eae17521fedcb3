//! Built-in pricing table for common LLM models.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price plus prompt-cache prices: writing to the cache is billed
//! at `cache_write_per_m`, reading from it at `cache_read_per_m`.
//! Custom pricing can be added at runtime via TOML config.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use taskloom_core::{ModelInfo, TokenUsage};

use crate::TelemetryError;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
    /// Price per 1M cache-creation tokens in USD.
    #[serde(default)]
    pub cache_write_per_m: f64,
    /// Price per 1M cache-read tokens in USD.
    #[serde(default)]
    pub cache_read_per_m: f64,
}

impl ModelPricing {
    /// Create a pricing entry without cache prices.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_write_per_m: 0.0,
            cache_read_per_m: 0.0,
        }
    }

    pub fn with_cache(mut self, write_per_m: f64, read_per_m: f64) -> Self {
        self.cache_write_per_m = write_per_m;
        self.cache_read_per_m = read_per_m;
        self
    }

    /// Compute cost for one response's usage.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.cache_creation_tokens as f64 * self.cache_write_per_m
            + usage.cache_read_tokens as f64 * self.cache_read_per_m
            + usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }

    /// Copy these prices into a model description.
    pub fn apply(&self, info: &mut ModelInfo) {
        info.cost_per_1m_in = self.input_per_m;
        info.cost_per_1m_out = self.output_per_m;
        info.cost_per_1m_in_cached = self.cache_write_per_m;
        info.cost_per_1m_out_cached = self.cache_read_per_m;
    }

    fn validate(&self, model: &str) -> Result<(), TelemetryError> {
        let prices = [
            self.input_per_m,
            self.output_per_m,
            self.cache_write_per_m,
            self.cache_read_per_m,
        ];
        if prices.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(TelemetryError::InvalidPrice {
                model: model.to_string(),
                reason: "prices must be finite and non-negative".into(),
            });
        }
        Ok(())
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "anthropic/claude-opus-4".into(),
            ModelPricing::new(15.0, 75.0).with_cache(18.75, 1.5),
        );
        prices.insert(
            "anthropic/claude-sonnet-4".into(),
            ModelPricing::new(3.0, 15.0).with_cache(3.75, 0.3),
        );
        prices.insert(
            "anthropic/claude-3-7-sonnet".into(),
            ModelPricing::new(3.0, 15.0).with_cache(3.75, 0.3),
        );
        prices.insert(
            "anthropic/claude-3-5-sonnet".into(),
            ModelPricing::new(3.0, 15.0).with_cache(3.75, 0.3),
        );
        prices.insert(
            "anthropic/claude-3-5-haiku".into(),
            ModelPricing::new(0.8, 4.0).with_cache(1.0, 0.08),
        );
        prices.insert(
            "anthropic/claude-3-haiku".into(),
            ModelPricing::new(0.25, 1.25).with_cache(0.3, 0.03),
        );

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert(
            "openai/gpt-4o".into(),
            ModelPricing::new(2.5, 10.0).with_cache(0.0, 1.25),
        );
        prices.insert(
            "openai/gpt-4o-mini".into(),
            ModelPricing::new(0.15, 0.6).with_cache(0.0, 0.075),
        );
        prices.insert(
            "openai/o3-mini".into(),
            ModelPricing::new(1.1, 4.4).with_cache(0.0, 0.55),
        );

        // ── Google ─────────────────────────────────────────────────
        prices.insert(
            "google/gemini-2.0-flash".into(),
            ModelPricing::new(0.1, 0.4).with_cache(0.0, 0.025),
        );
        prices.insert(
            "google/gemini-2.5-pro".into(),
            ModelPricing::new(1.25, 10.0).with_cache(0.0, 0.31),
        );

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Exact lookup. See [`PricingTable::lookup`] for fuzzy matching.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices.read().get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) -> Result<(), TelemetryError> {
        let model = model.into();
        pricing.validate(&model)?;
        tracing::debug!(model = %model, "Pricing override registered");
        self.prices.write().insert(model, pricing);
        Ok(())
    }

    /// Find pricing for a model id as a vendor reports it.
    ///
    /// Tries an exact match, then the id under the given provider prefix
    /// (`claude-sonnet-4` → `anthropic/claude-sonnet-4`), then the longest
    /// known bare name that prefixes the id, so dated snapshots such as
    /// `claude-sonnet-4-20250514` resolve.
    pub fn lookup(&self, provider: &str, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read();

        if let Some(p) = prices.get(model) {
            return Some(*p);
        }
        if let Some(p) = prices.get(&format!("{provider}/{model}")) {
            return Some(*p);
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        // Longest prefix wins; on a tie a bare (override) key beats a
        // provider-qualified one.
        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some(((bare_key.len(), !key.contains('/')), *pricing))
            })
            .max_by_key(|(rank, _)| *rank)
            .map(|(_, p)| p)
    }

    /// Fill `info` with the prices known for it. Unknown models stay free.
    pub fn price_model(&self, info: &mut ModelInfo) {
        match self.lookup(&info.provider, &info.id) {
            Some(pricing) => pricing.apply(info),
            None => tracing::warn!(
                model = %info.id,
                provider = %info.provider,
                "No pricing known for model, cost will be reported as zero"
            ),
        }
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.prices.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.prices.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(input: u64, output: u64, write: u64, read: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cache_creation_tokens: write,
            cache_read_tokens: read,
        }
    }

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 10);
        assert!(!table.is_empty());
    }

    #[test]
    fn known_model_cost() {
        let table = PricingTable::with_defaults();
        let p = table.get("anthropic/claude-sonnet-4").unwrap();
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        let cost = p.cost(&usage(1000, 500, 0, 0));
        assert!((cost - 0.0105).abs() < 1e-10);
    }

    #[test]
    fn cache_tokens_are_priced() {
        let p = ModelPricing::new(3.0, 15.0).with_cache(3.75, 0.3);
        // (1M * 3.75 + 1M * 0.3) / 1M = 4.05
        let cost = p.cost(&usage(0, 0, 1_000_000, 1_000_000));
        assert!((cost - 4.05).abs() < 1e-10);
    }

    #[test]
    fn lookup_resolves_dated_snapshot() {
        let table = PricingTable::with_defaults();
        let p = table.lookup("anthropic", "claude-sonnet-4-20250514").unwrap();
        assert!((p.input_per_m - 3.0).abs() < 1e-10);
        // gpt-4o-mini must not fall back to gpt-4o
        let mini = table.lookup("openai", "gpt-4o-mini-2024-07-18").unwrap();
        assert!((mini.input_per_m - 0.15).abs() < 1e-10);
    }

    #[test]
    fn unknown_model_is_none() {
        let table = PricingTable::with_defaults();
        assert!(table.lookup("acme", "model-xyz").is_none());
    }

    #[test]
    fn price_model_fills_info() {
        let table = PricingTable::with_defaults();
        let mut info = ModelInfo {
            id: "claude-3-5-haiku-latest".into(),
            provider: "anthropic".into(),
            ..ModelInfo::default()
        };
        table.price_model(&mut info);
        assert!((info.cost_per_1m_in - 0.8).abs() < 1e-10);
        assert!((info.cost_per_1m_out_cached - 0.08).abs() < 1e-10);
    }

    #[test]
    fn custom_pricing() {
        let table = PricingTable::empty();
        assert!(table.is_empty());

        table.set("custom/model", ModelPricing::new(1.0, 2.0)).unwrap();
        assert_eq!(table.len(), 1);

        let cost = table.get("custom/model").unwrap().cost(&usage(1_000_000, 1_000_000, 0, 0));
        assert!((cost - 3.0).abs() < 1e-10);
    }

    #[test]
    fn negative_price_rejected() {
        let table = PricingTable::empty();
        let err = table.set("bad", ModelPricing::new(-1.0, 2.0)).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(table.is_empty());
    }

    #[test]
    fn list_models_sorted() {
        let models = PricingTable::with_defaults().models();
        assert!(models.contains(&"openai/gpt-4o".to_string()));
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}
