//! Text-model catalog: listing, capability helpers and filters.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, auth_headers, get_with_headers};

const POLLINATIONS_MODELS_URL: &str = "https://gen.pollinations.ai/text/models";

/// Per-token prices; a missing entry counts as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelPricing {
    pub currency: String,
    pub prompt_text_tokens: f64,
    pub prompt_cached_tokens: f64,
    pub prompt_audio_tokens: f64,
    pub completion_text_tokens: f64,
    pub completion_audio_tokens: f64,
}

/// One catalog entry. `raw` keeps the element exactly as the service returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Model {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub pricing: Option<ModelPricing>,
    pub input_modalities: Vec<String>,
    pub output_modalities: Vec<String>,
    pub tools: bool,
    pub reasoning: bool,
    pub is_specialized: bool,
    pub paid_only: bool,
    pub context_window: u64,
    pub voices: Vec<String>,
    #[serde(skip)]
    pub raw: Value,
}

impl Model {
    pub fn has_input_modality(&self, modality: &str) -> bool {
        self.input_modalities.iter().any(|m| m == modality)
    }

    pub fn has_output_modality(&self, modality: &str) -> bool {
        self.output_modalities.iter().any(|m| m == modality)
    }

    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }

    /// Prompt plus completion text price for 1000 tokens, zero without pricing.
    pub fn effective_price_per_1k_tokens(&self) -> f64 {
        self.pricing
            .as_ref()
            .map(|p| (p.prompt_text_tokens + p.completion_text_tokens) * 1000.0)
            .unwrap_or(0.0)
    }
}

/// Keeps models that accept `input` and produce `output`; an empty modality matches anything.
pub fn filter_by_modality(models: &[Model], input: &str, output: &str) -> Vec<Model> {
    models
        .iter()
        .filter(|m| input.is_empty() || m.has_input_modality(input))
        .filter(|m| output.is_empty() || m.has_output_modality(output))
        .cloned()
        .collect()
}

/// Keeps models offering every requested capability; `false` means "don't care".
pub fn filter_by_capability(models: &[Model], tools: bool, reasoning: bool) -> Vec<Model> {
    models
        .iter()
        .filter(|m| !tools || m.tools)
        .filter(|m| !reasoning || m.reasoning)
        .cloned()
        .collect()
}

pub fn filter_free(models: &[Model]) -> Vec<Model> {
    models.iter().filter(|m| !m.paid_only).cloned().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelsRequest {
    pub provider: String,
    pub api_key: Option<String>,
}

impl ModelsRequest {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelsResponse {
    pub models: Vec<Model>,
    /// Undecoded response body.
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait ModelsProvider: Send + Sync {
    async fn list_models(&self, request: &ModelsRequest) -> Result<ModelsResponse, LLMError>;
}

pub type DynModelsProvider = Arc<dyn ModelsProvider>;

/// Decodes a JSON array of models, attaching each element's raw JSON.
pub fn parse_models(raw: &[u8]) -> Result<Vec<Model>, LLMError> {
    let elements: Vec<Value> = serde_json::from_slice(raw)
        .map_err(|err| LLMError::transport("parse response", err.to_string()))?;
    elements
        .into_iter()
        .map(|element| {
            let mut model = Model::deserialize(&element)
                .map_err(|err| LLMError::transport("parse response", err.to_string()))?;
            model.raw = element;
            Ok(model)
        })
        .collect()
}

pub struct PollinationsModels {
    transport: DynHttpTransport,
}

impl PollinationsModels {
    pub const NAME: &'static str = "pollinations";

    pub fn new(transport: DynHttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ModelsProvider for PollinationsModels {
    async fn list_models(&self, request: &ModelsRequest) -> Result<ModelsResponse, LLMError> {
        let raw = get_with_headers(
            self.transport.as_ref(),
            POLLINATIONS_MODELS_URL,
            auth_headers(request.api_key.as_deref()),
        )
        .await?;
        let models = parse_models(&raw)?;
        Ok(ModelsResponse { models, raw })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const CATALOG: &str = r#"[
        {"name": "openai", "aliases": ["gpt"], "input_modalities": ["text", "image"],
         "output_modalities": ["text"], "tools": true,
         "pricing": {"currency": "USD", "promptTextTokens": 0.0001, "completionTextTokens": 0.0003}},
        {"name": "deep", "input_modalities": ["text"], "output_modalities": ["text"],
         "reasoning": true, "paid_only": true, "context_window": 128000},
        {"name": "voice", "input_modalities": ["text"], "output_modalities": ["audio"],
         "voices": ["alloy"], "extra": 1}
    ]"#;

    fn catalog() -> Vec<Model> {
        parse_models(CATALOG.as_bytes()).expect("catalog")
    }

    #[test]
    fn parse_keeps_per_element_raw_json() {
        let models = catalog();
        assert_eq!(models.len(), 3);
        assert_eq!(models[2].raw["extra"], json!(1));
        assert_eq!(models[2].raw["name"], json!("voice"));
        assert_eq!(models[1].context_window, 128000);
    }

    #[test]
    fn parse_rejects_non_array_bodies() {
        let err = parse_models(br#"{"models": []}"#).expect_err("not an array");
        assert!(matches!(err, LLMError::Transport { stage: "parse response", .. }));
    }

    #[test]
    fn helpers_inspect_modalities_aliases_and_pricing() {
        let models = catalog();
        assert!(models[0].has_input_modality("image"));
        assert!(!models[1].has_input_modality("image"));
        assert!(models[2].has_output_modality("audio"));
        assert!(models[0].has_alias("gpt"));
        assert!((models[0].effective_price_per_1k_tokens() - 0.4).abs() < 1e-9);
        assert_eq!(models[1].effective_price_per_1k_tokens(), 0.0);
    }

    #[test]
    fn filters_combine_criteria() {
        let models = catalog();
        let names = |models: Vec<Model>| models.into_iter().map(|m| m.name).collect::<Vec<_>>();
        assert_eq!(names(filter_by_modality(&models, "text", "text")), ["openai", "deep"]);
        assert_eq!(names(filter_by_modality(&models, "", "audio")), ["voice"]);
        assert_eq!(names(filter_by_modality(&models, "", "")).len(), 3);
        assert_eq!(names(filter_by_capability(&models, true, false)), ["openai"]);
        assert!(filter_by_capability(&models, true, true).is_empty());
        assert_eq!(names(filter_free(&models)), ["openai", "voice"]);
    }
}
