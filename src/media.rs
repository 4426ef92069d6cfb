//! Image and audio generation plus speech transcription.
//!
//! Only the Pollinations gateway offers these surfaces; any other provider name is rejected before
//! a request is built.

use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::error::LLMError;
use crate::http::{
    DynHttpTransport, FormField, auth_headers, get_with_headers, post_multipart_with_headers,
};
use crate::provider::normalize_name;

const POLLINATIONS_IMAGE_URL: &str = "https://gen.pollinations.ai/image";
const POLLINATIONS_AUDIO_URL: &str = "https://gen.pollinations.ai/audio";
const POLLINATIONS_TRANSCRIPTION_URL: &str = "https://gen.pollinations.ai/v1/audio/transcriptions";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRequest {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
}

impl ImageRequest {
    pub fn new(provider: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioRequest {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub prompt: String,
}

impl AudioRequest {
    pub fn new(provider: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// Raw bytes returned by image or audio generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaResponse {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptionRequest {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Only the base name is sent.
    pub file_name: String,
    pub file_data: Vec<u8>,
    pub language: String,
    pub prompt: String,
    pub response_format: String,
    pub temperature: Option<f64>,
}

impl TranscriptionRequest {
    pub fn new(
        provider: impl Into<String>,
        file_name: impl Into<String>,
        file_data: Vec<u8>,
    ) -> Self {
        Self {
            provider: provider.into(),
            file_name: file_name.into(),
            file_data,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_response_format(mut self, format: impl Into<String>) -> Self {
        self.response_format = format.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionResponse {
    pub text: String,
    pub raw: Vec<u8>,
}

/// Media endpoints of the Pollinations gateway.
pub struct PollinationsMedia {
    transport: DynHttpTransport,
}

impl PollinationsMedia {
    pub const NAME: &'static str = "pollinations";

    /// Binds the gateway for `provider`, which must name it. `kind` labels the error, e.g. `"image "`.
    pub fn for_provider(
        kind: &'static str,
        provider: &str,
        transport: &DynHttpTransport,
    ) -> Result<Self, LLMError> {
        if normalize_name(provider) == Self::NAME {
            Ok(Self {
                transport: transport.clone(),
            })
        } else {
            Err(LLMError::unknown_provider(kind, provider))
        }
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<MediaResponse, LLMError> {
        let mut query = Vec::new();
        if let Some(height) = request.height {
            query.push(("height", height.to_string()));
        }
        if !request.model.is_empty() {
            query.push(("model", request.model.clone()));
        }
        if let Some(seed) = request.seed {
            query.push(("seed", seed.to_string()));
        }
        if let Some(width) = request.width {
            query.push(("width", width.to_string()));
        }
        let url = prompt_url(POLLINATIONS_IMAGE_URL, &request.prompt, &query)?;
        let data = get_with_headers(
            self.transport.as_ref(),
            url,
            auth_headers(request.api_key.as_deref()),
        )
        .await?;
        Ok(MediaResponse { data })
    }

    pub async fn generate_audio(&self, request: &AudioRequest) -> Result<MediaResponse, LLMError> {
        let mut query = Vec::new();
        if !request.model.is_empty() {
            query.push(("model", request.model.clone()));
        }
        let url = prompt_url(POLLINATIONS_AUDIO_URL, &request.prompt, &query)?;
        let data = get_with_headers(
            self.transport.as_ref(),
            url,
            auth_headers(request.api_key.as_deref()),
        )
        .await?;
        Ok(MediaResponse { data })
    }

    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse, LLMError> {
        let raw = post_multipart_with_headers(
            self.transport.as_ref(),
            POLLINATIONS_TRANSCRIPTION_URL,
            auth_headers(request.api_key.as_deref()),
            transcription_form(request),
        )
        .await?;
        Ok(TranscriptionResponse {
            text: transcription_text(&raw),
            raw,
        })
    }
}

/// Appends `prompt` as one escaped path segment, then the query pairs in the given order.
fn prompt_url(base: &str, prompt: &str, query: &[(&str, String)]) -> Result<String, LLMError> {
    let mut url = Url::parse(base)
        .map_err(|err| LLMError::validation(format!("invalid endpoint {base}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| LLMError::validation(format!("endpoint {base} cannot take a path")))?
        .push(prompt);
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in query {
            pairs.append_pair(key, value);
        }
    }
    Ok(url.into())
}

fn transcription_form(request: &TranscriptionRequest) -> Vec<FormField> {
    let file_name = Path::new(&request.file_name)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.file_name.clone());
    let mut fields = vec![FormField::File {
        name: "file".to_string(),
        file_name,
        data: request.file_data.clone(),
    }];
    let optional = [
        ("model", &request.model),
        ("language", &request.language),
        ("prompt", &request.prompt),
        ("response_format", &request.response_format),
    ];
    for (name, value) in optional {
        if !value.is_empty() {
            fields.push(FormField::Text {
                name: name.to_string(),
                value: value.clone(),
            });
        }
    }
    if let Some(temperature) = request.temperature {
        fields.push(FormField::Text {
            name: "temperature".to_string(),
            value: format!("{temperature:.2}"),
        });
    }
    fields
}

#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    text: String,
}

/// JSON `text` when present and non-empty, otherwise the whole body.
fn transcription_text(raw: &[u8]) -> String {
    match serde_json::from_slice::<TranscriptionBody>(raw) {
        Ok(body) if !body.text.is_empty() => body.text,
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_a_single_escaped_segment() {
        let url = prompt_url(
            POLLINATIONS_IMAGE_URL,
            "a cat/dog at 50% ?",
            &[("height", "512".to_string()), ("model", "flux".to_string())],
        )
        .expect("url");
        assert_eq!(
            url,
            "https://gen.pollinations.ai/image/a%20cat%2Fdog%20at%2050%25%20%3F?height=512&model=flux"
        );
        let bare = prompt_url(POLLINATIONS_AUDIO_URL, "hello", &[]).expect("url");
        assert_eq!(bare, "https://gen.pollinations.ai/audio/hello");
    }

    #[test]
    fn only_the_gateway_offers_media() {
        let transport = crate::http::reqwest::default_dyn_transport().expect("transport");
        assert!(PollinationsMedia::for_provider("image ", " Pollinations", &transport).is_ok());
        let err = PollinationsMedia::for_provider("audio ", "Acme", &transport)
            .err()
            .expect("unknown");
        assert_eq!(err.to_string(), "unknown audio provider: Acme");
    }

    #[test]
    fn transcription_form_uses_base_name_and_two_decimals() {
        let request = TranscriptionRequest::new("pollinations", "/tmp/rec/clip.mp3", vec![1, 2])
            .with_language("en")
            .with_temperature(0.2);
        let fields = transcription_form(&request);
        assert_eq!(
            fields,
            vec![
                FormField::File {
                    name: "file".to_string(),
                    file_name: "clip.mp3".to_string(),
                    data: vec![1, 2],
                },
                FormField::Text {
                    name: "language".to_string(),
                    value: "en".to_string(),
                },
                FormField::Text {
                    name: "temperature".to_string(),
                    value: "0.20".to_string(),
                },
            ]
        );
    }

    #[test]
    fn transcription_text_falls_back_to_body() {
        assert_eq!(transcription_text(br#"{"text":"hello"}"#), "hello");
        assert_eq!(transcription_text(br#"{"text":""}"#), r#"{"text":""}"#);
        assert_eq!(transcription_text(b"plain words"), "plain words");
    }
}
