//! Static realtime-model pricing and cost accounting.
//!
//! A usage delta is always priced with the rates of the model that was
//! active while the tokens accrued; the orchestrator snapshots usage
//! around model switches so deltas never straddle two price tables.

use voxgate_realtime_ai::{ModelKey, UsageSnapshot};

/// USD per 1M tokens for one model, by billing category.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_text: f64,
    pub input_audio: f64,
    pub output_text: f64,
    pub output_audio: f64,
}

/// Rates per model.
pub fn pricing_for(model: ModelKey) -> ModelPricing {
    match model {
        ModelKey::Mini => ModelPricing {
            input_text: 0.60,
            input_audio: 10.00,
            output_text: 2.40,
            output_audio: 20.00,
        },
        ModelKey::Premium => ModelPricing {
            input_text: 5.00,
            input_audio: 40.00,
            output_text: 20.00,
            output_audio: 80.00,
        },
    }
}

/// Cost of a usage delta in euro-cents (provider bills USD; the
/// dashboard shows cents without currency conversion).
pub fn delta_cost_cents(delta: &UsageSnapshot, model: ModelKey) -> f64 {
    let rates = pricing_for(model);
    let per_million = |tokens: u64, rate: f64| (tokens as f64) * rate / 1_000_000.0;
    let usd = per_million(delta.input_text_tokens, rates.input_text)
        + per_million(delta.input_audio_tokens, rates.input_audio)
        + per_million(delta.output_text_tokens, rates.output_text)
        + per_million(delta.output_audio_tokens, rates.output_audio);
    usd * 100.0
}
