use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::GatewayAttribution;
use crate::error::LLMError;
use crate::extract::extract_content;
use crate::http::{
    DynHttpTransport, apply_gateway_headers, auth_headers, post_json_stream_with_headers,
    post_json_with_headers,
};
use crate::provider::registry::ProviderContext;
use crate::provider::{ChatProvider, ProviderKind};
use crate::stream::{ChunkStream, decode_stream};
use crate::types::{ChatRequest, ChatResponse};

use super::request::{assemble_messages, build_chat_body};

/// OpenAI 兼容的 chat/completions 策略 行为差异由 [`ProviderKind`] 决定
pub struct CompletionProvider {
    kind: ProviderKind,
    transport: DynHttpTransport,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    attribution: GatewayAttribution,
}

impl CompletionProvider {
    /// 绑定端点与上下文
    pub fn new(kind: ProviderKind, endpoint: impl Into<String>, context: ProviderContext) -> Self {
        Self {
            kind,
            transport: context.transport,
            endpoint: endpoint.into(),
            model: context.model,
            api_key: context.api_key,
            attribution: context.attribution,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn build_headers(&self, streaming: bool) -> HashMap<String, String> {
        let key = if self.kind.sends_api_key() {
            self.api_key.as_deref()
        } else {
            None
        };
        let mut headers = auth_headers(key);
        if streaming {
            headers.insert("Accept".to_string(), "text/event-stream".to_string());
        }
        apply_gateway_headers(&self.endpoint, &self.attribution, &mut headers);
        headers
    }

    fn build_body(&self, request: &ChatRequest, streaming: bool) -> Value {
        let messages = assemble_messages(&request.history(), &request.images, &request.system_prompt);
        let stream_flag = if streaming {
            Some(true)
        } else if self.kind.explicit_stream_flag() {
            Some(false)
        } else {
            None
        };
        build_chat_body(&self.model, messages, &request.options, stream_flag)
    }
}

#[async_trait]
impl ChatProvider for CompletionProvider {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let body = self.build_body(request, false);
        let raw = post_json_with_headers(
            self.transport.as_ref(),
            &self.endpoint,
            self.build_headers(false),
            &body,
            request.timeout,
        )
        .await?;
        let content = extract_content(&raw)?;
        Ok(ChatResponse { content })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, LLMError> {
        let body = self.build_body(request, true);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            &self.endpoint,
            self.build_headers(true),
            &body,
            request.timeout,
        )
        .await?;
        Ok(decode_stream(response))
    }

    fn name(&self) -> &str {
        self.kind.name()
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures_util::{StreamExt, stream};
    use serde_json::json;

    use super::*;
    use crate::http::{
        HttpBody, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
    };
    use crate::types::{Message, StreamChunk};

    /// 记录请求并返回固定响应的 Transport
    struct RecordingTransport {
        requests: Mutex<Vec<HttpRequest>>,
        status: u16,
        body: Vec<u8>,
    }

    impl RecordingTransport {
        fn new(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                status,
                body: body.as_bytes().to_vec(),
            })
        }

        fn last(&self) -> HttpRequest {
            self.requests
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .expect("a request was sent")
        }

        fn last_body(&self) -> Value {
            match self.last().body {
                Some(HttpBody::Bytes(bytes)) => serde_json::from_slice(&bytes).expect("json body"),
                other => panic!("unexpected body: {other:?}"),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for RecordingTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
            self.requests.lock().expect("lock").push(request);
            Ok(HttpResponse {
                status: self.status,
                headers: HashMap::new(),
                body: self.body.clone(),
            })
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            self.requests.lock().expect("lock").push(request);
            Ok(HttpStreamResponse {
                status: self.status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(vec![Ok(self.body.clone())])),
            })
        }
    }

    fn provider(kind: ProviderKind, endpoint: &str, transport: Arc<RecordingTransport>) -> CompletionProvider {
        CompletionProvider::new(
            kind,
            endpoint,
            ProviderContext {
                transport,
                model: "test-model".to_string(),
                api_key: Some("sk-test".to_string()),
                endpoint: None,
                attribution: GatewayAttribution::default(),
            },
        )
    }

    #[tokio::test]
    async fn local_inference_sends_stream_false_without_credentials() {
        let transport = RecordingTransport::new(200, r#"{"choices":[{"message":{"content":"pong"}}]}"#);
        let provider = provider(ProviderKind::Ollama, "http://localhost:11434/v1/chat/completions", transport.clone());

        let response = provider
            .send(&ChatRequest::new("ollama", "ignored").with_prompt("ping"))
            .await
            .expect("send");

        assert_eq!(response.content, "pong");
        let request = transport.last();
        assert!(!request.headers.contains_key("Authorization"));
        assert_eq!(
            transport.last_body(),
            json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "ping"}],
                "stream": false
            })
        );
    }

    #[tokio::test]
    async fn gateway_requests_carry_attribution_and_bearer() {
        let transport = RecordingTransport::new(200, r#"{"content":"ok"}"#);
        let provider = provider(
            ProviderKind::OpenRouter,
            "https://openrouter.ai/api/v1/chat/completions",
            transport.clone(),
        );

        provider
            .send(&ChatRequest::new("openrouter", "m").with_prompt("hi"))
            .await
            .expect("send");

        let request = transport.last();
        assert_eq!(request.headers.get("Authorization"), Some(&"Bearer sk-test".to_string()));
        assert!(request.headers.contains_key("HTTP-Referer"));
        assert!(request.headers.contains_key("X-Title"));
        assert!(transport.last_body().get("stream").is_none());
    }

    #[tokio::test]
    async fn provider_reported_error_is_surfaced() {
        let transport = RecordingTransport::new(200, r#"{"error":"model not found"}"#);
        let provider = provider(ProviderKind::Generic, "https://api.example.com/v1/chat/completions", transport);

        let err = provider
            .send(&ChatRequest::new("x", "m").with_prompt("hi"))
            .await
            .expect_err("reported error");
        assert!(matches!(err, LLMError::Reported { .. }));
        assert_eq!(err.to_string(), "model not found");
    }

    #[tokio::test]
    async fn streaming_requests_event_stream_and_decodes_deltas() {
        let transport = RecordingTransport::new(
            200,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n",
        );
        let provider = provider(ProviderKind::Pollinations, "https://gen.pollinations.ai/v1/chat/completions", transport.clone());

        let request = ChatRequest::new("pollinations", "m")
            .with_messages(vec![Message::user("hello")])
            .with_seed(42);
        let chunks: Vec<StreamChunk> = provider
            .stream(&request)
            .await
            .expect("stream")
            .map(|chunk| chunk.expect("chunk"))
            .collect()
            .await;

        assert_eq!(chunks, vec![StreamChunk::delta("Hi"), StreamChunk::done()]);
        let sent = transport.last();
        assert_eq!(sent.headers.get("Accept"), Some(&"text/event-stream".to_string()));
        let body = transport.last_body();
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["seed"], json!(42));
    }

    #[tokio::test]
    async fn streaming_non_success_status_fails_before_decoding() {
        let transport = RecordingTransport::new(429, "slow down");
        let provider = provider(ProviderKind::Generic, "https://api.example.com/v1/chat/completions", transport);

        let err = provider
            .stream(&ChatRequest::new("x", "m").with_prompt("hi"))
            .await
            .err()
            .expect("status error");
        assert_eq!(err.to_string(), "api error 429: slow down");
    }
}
