//! Realtime model selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

const MODEL_MINI: &str = "gpt-4o-mini-realtime-preview-2024-12-17";
const MODEL_PREMIUM: &str = "gpt-4o-realtime-preview-2024-12-17";

/// The two realtime models the gateway offers.
///
/// `Mini` is the cheap default; `Premium` is what callers get when they
/// ask for the expensive model. The key is sticky per call: it survives
/// agent switches unless an agent forces its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKey {
    Mini,
    Premium,
}

impl ModelKey {
    /// Provider model identifier for the WebSocket URL.
    pub fn model_id(self) -> &'static str {
        match self {
            ModelKey::Mini => MODEL_MINI,
            ModelKey::Premium => MODEL_PREMIUM,
        }
    }

    /// Short name used by tools and the dashboard.
    pub fn short_name(self) -> &'static str {
        match self {
            ModelKey::Mini => "mini",
            ModelKey::Premium => "premium",
        }
    }
}

impl Default for ModelKey {
    fn default() -> Self {
        ModelKey::Mini
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for ModelKey {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mini" => Ok(ModelKey::Mini),
            "premium" => Ok(ModelKey::Premium),
            other => Err(RealtimeError::UnknownModel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_round_trip() {
        for key in [ModelKey::Mini, ModelKey::Premium] {
            assert_eq!(key.short_name().parse::<ModelKey>().unwrap(), key);
        }
        assert!("thinking".parse::<ModelKey>().is_err());
    }

    #[test]
    fn mini_is_the_default() {
        assert_eq!(ModelKey::default(), ModelKey::Mini);
    }
}
