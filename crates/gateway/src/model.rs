//! Static model table mapping Anthropic model ids onto CodeWhisperer ids.

use crate::protocol::openai;

pub struct ModelEntry {
    pub anthropic_id: &'static str,
    pub codewhisperer_id: &'static str,
    pub display_name: &'static str,
}

pub const MODELS: &[ModelEntry] = &[
    ModelEntry {
        anthropic_id: "claude-sonnet-4-20250514",
        codewhisperer_id: "CLAUDE_SONNET_4_20250514_V1_0",
        display_name: "Claude Sonnet 4",
    },
    ModelEntry {
        anthropic_id: "claude-3-7-sonnet-20250219",
        codewhisperer_id: "CLAUDE_3_7_SONNET_20250219_V1_0",
        display_name: "Claude 3.7 Sonnet",
    },
    ModelEntry {
        anthropic_id: "claude-3-5-haiku-20241022",
        codewhisperer_id: "CLAUDE_3_5_HAIKU_20241022_V1_0",
        display_name: "Claude 3.5 Haiku",
    },
];

/// Unknown models fall back to the most capable mapped model.
pub const DEFAULT_CODEWHISPERER_MODEL: &str = "CLAUDE_SONNET_4_20250514_V1_0";

/// Translate a client model id to the upstream id, falling back to the
/// default for unmapped names.
pub fn resolve(model: &str) -> &'static str {
    MODELS
        .iter()
        .find(|entry| entry.anthropic_id == model)
        .map(|entry| entry.codewhisperer_id)
        .unwrap_or(DEFAULT_CODEWHISPERER_MODEL)
}

/// The `/v1/models` listing.
pub fn listing() -> openai::ModelsResponse {
    openai::ModelsResponse {
        object: "list".to_owned(),
        data: MODELS
            .iter()
            .map(|entry| openai::Model {
                id: entry.anthropic_id.to_owned(),
                object: "model".to_owned(),
                created: 0,
                owned_by: "anthropic".to_owned(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_models_resolve_exactly() {
        assert_eq!(resolve("claude-sonnet-4-20250514"), "CLAUDE_SONNET_4_20250514_V1_0");
        assert_eq!(resolve("claude-3-7-sonnet-20250219"), "CLAUDE_3_7_SONNET_20250219_V1_0");
    }

    #[test]
    fn unmapped_models_fall_back_to_the_default() {
        insta::assert_snapshot!(resolve("claude-9-experimental"), @"CLAUDE_SONNET_4_20250514_V1_0");
    }

    #[test]
    fn listing_exposes_every_mapped_model() {
        let listing = listing();
        assert_eq!(listing.data.len(), MODELS.len());
        assert!(listing.data.iter().any(|m| m.id == "claude-3-5-haiku-20241022"));
    }
}
