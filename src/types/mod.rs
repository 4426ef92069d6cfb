//! Shared data structures describing chat requests, messages and streamed results.
//!
//! These types are provider-neutral: strategies translate them into the OpenAI-style wire shape
//! through [`crate::provider::request`].

use std::borrow::Cow;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chat role understood by every supported provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
///
/// When `content_parts` is present it is the payload sent to the provider; `content` then only
/// mirrors the first text part for logging and local inspection.
///
/// # Examples
///
/// ```
/// # use llm_relay::types::{ContentPart, ImageDetail, Message, Role};
/// let msg = Message::with_parts(
///     Role::User,
///     vec![
///         ContentPart::Text { text: "Describe this image".into() },
///         ContentPart::ImageUrl { url: "https://example.com/img.png".into(), detail: Some(ImageDetail::High) },
///     ],
/// );
/// assert_eq!(msg.content, "Describe this image");
/// assert_eq!(msg.content_parts.as_ref().map(Vec::len), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_parts: Option<Vec<ContentPart>>,
}

impl Message {
    /// Plain-text message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            content_parts: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Multi-part message; `content` is derived from the first text part.
    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        let content = parts
            .iter()
            .find_map(|part| match part {
                ContentPart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        Self {
            role,
            content,
            content_parts: Some(parts),
        }
    }
}

/// Segment of a multi-part (vision) message. Only ever sent, never parsed back from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },
    /// Image reachable by URL (absolute or `data:` URI).
    ImageUrl {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<ImageDetail>,
    },
    /// Inline base64 image bytes.
    ImageBase64 { media_type: String, data: String },
}

/// Detail preset requested for image inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageDetail {
    Auto,
    Low,
    High,
}

impl ImageDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDetail::Auto => "auto",
            ImageDetail::Low => "low",
            ImageDetail::High => "high",
        }
    }
}

/// Optional sampling controls forwarded to the provider when set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub seed: Option<i64>,
}

/// Chat request accepted by [`crate::client::LLMClient`].
///
/// `provider` is either a built-in name (`ollama`, `pollinations`, `openrouter`), the name of a
/// registered strategy, or a bare `http(s)://` URL of an OpenAI-compatible endpoint. A single
/// `prompt` is sugar for a one-element user history; when `messages` is non-empty it wins.
///
/// # Examples
///
/// ```
/// # use llm_relay::types::{ChatRequest, Message, Role};
/// let request = ChatRequest::new("ollama", "llama3")
///     .with_system_prompt("You are concise.")
///     .with_prompt("Summarize Rust traits.");
/// assert_eq!(request.history().len(), 1);
/// assert_eq!(request.history()[0].role, Role::User);
///
/// let request = request.with_messages(vec![Message::user("a"), Message::assistant("b")]);
/// assert_eq!(request.history().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Endpoint override; replaces a built-in default or selects the generic strategy.
    pub endpoint: Option<String>,
    pub system_prompt: String,
    pub prompt: Option<String>,
    pub messages: Vec<Message>,
    /// Image URLs or `data:` URIs attached to the final user turn.
    pub images: Vec<String>,
    pub options: SamplingOptions,
    /// Whole-call deadline, including the streamed body.
    pub timeout: Option<Duration>,
}

impl ChatRequest {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.options.seed = Some(seed);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Conversation that will be sent: `messages` when present, otherwise the prompt as a single
    /// user turn, otherwise nothing.
    pub fn history(&self) -> Cow<'_, [Message]> {
        if !self.messages.is_empty() {
            return Cow::Borrowed(&self.messages);
        }
        match self.prompt.as_deref() {
            Some(prompt) if !prompt.is_empty() => Cow::Owned(vec![Message::user(prompt)]),
            _ => Cow::Borrowed(&[]),
        }
    }
}

/// Buffered chat answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text recovered from the response body.
    pub content: String,
}

/// One decoded streaming event. Terminal chunks never carry content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub content: String,
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            content: String::new(),
            done: true,
        }
    }
}

/// Result of a streamed call: every non-terminal delta concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub content: String,
}
