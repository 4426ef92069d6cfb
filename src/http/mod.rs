//! Minimal HTTP abstraction shared by every provider strategy.
//!
//! Strategies never talk to `reqwest` directly: they build an [`HttpRequest`], hand it to a
//! [`HttpTransport`] and classify the answer with [`ensure_success`]. Tests swap the transport for
//! an in-memory implementation.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use tracing::debug;

use crate::config::GatewayAttribution;
use crate::error::LLMError;

/// Hostname fragment identifying the gateway that requires attribution headers.
const ATTRIBUTION_HOST_HINT: &str = "openrouter";

/// Enumerates HTTP methods understood by the transport abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// One field of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormField {
    /// Plain text field.
    Text { name: String, value: String },
    /// File field carrying raw bytes and the advertised file name.
    File {
        name: String,
        file_name: String,
        data: Vec<u8>,
    },
}

/// Request body variants.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpBody {
    /// Pre-serialized bytes, usually JSON.
    Bytes(Vec<u8>),
    /// Multipart form; the transport chooses the boundary and content type.
    Multipart(Vec<FormField>),
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<HttpBody>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(HttpBody::Bytes(body)),
            timeout: None,
        }
    }

    /// Builds a body-less GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Builds a multipart POST request.
    pub fn post_multipart(url: impl Into<String>, fields: Vec<FormField>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::new(),
            body: Some(HttpBody::Multipart(fields)),
            timeout: None,
        }
    }

    /// Merges additional headers into the request, replacing duplicates.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use llm_relay::http::HttpRequest;
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec())
    ///     .with_headers(HashMap::from([("Authorization".into(), "Bearer test".into())]));
    /// assert_eq!(request.headers.get("Authorization"), Some(&"Bearer test".to_string()));
    /// assert!(request.headers.contains_key("Content-Type"));
    /// ```
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets a per-request deadline covering connect, send and body read.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::http::HttpResponse;
    ///
    /// let response = HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() };
    /// assert_eq!(response.into_string().unwrap(), "ok");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::Transport`] when the body cannot be interpreted as UTF-8.
    pub fn into_string(self) -> Result<String, LLMError> {
        String::from_utf8(self.body).map_err(|err| LLMError::transport("read response", err.to_string()))
    }

    /// Consumes the response, returning the body when the status is 2xx.
    pub fn into_success_body(self) -> Result<Vec<u8>, LLMError> {
        ensure_success(self.status, self.body)
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, LLMError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
///
/// One transport instance is shared by every strategy built from the same client and must be
/// safe for concurrent use.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response body is available.
    ///
    /// # Errors
    ///
    /// Implementations map construction, network and read failures to
    /// [`LLMError::Transport`]. Non-2xx statuses are returned as a normal response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError>;

    /// Sends a request and returns as soon as the response head arrives.
    ///
    /// # Examples
    ///
    /// ```
    /// # use async_trait::async_trait;
    /// # use llm_relay::http::{HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
    /// # use llm_relay::error::LLMError;
    /// # use futures_util::{stream, StreamExt};
    /// struct EchoTransport;
    ///
    /// #[async_trait]
    /// impl HttpTransport for EchoTransport {
    ///     async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
    ///         Ok(HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() })
    ///     }
    ///     async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
    ///         let stream = stream::once(async move { Ok(b"data: [DONE]\n".to_vec()) });
    ///         Ok(HttpStreamResponse { status: 200, headers: request.headers, body: Box::pin(stream) })
    ///     }
    /// }
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let response = EchoTransport
    ///     .send_stream(HttpRequest::post_json("https://example.com", br"{}".to_vec()))
    ///     .await
    ///     .unwrap();
    /// let chunks: Vec<_> = response.body.collect::<Vec<_>>().await;
    /// assert_eq!(chunks.len(), 1);
    /// # });
    /// ```
    ///
    /// # Errors
    ///
    /// Same contract as [`HttpTransport::send`]; body read failures surface as stream items.
    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

/// Classifies a fully read response: 2xx returns the body, anything else is [`LLMError::Api`].
///
/// # Examples
///
/// ```
/// use llm_relay::error::LLMError;
/// use llm_relay::http::ensure_success;
///
/// assert_eq!(ensure_success(200, b"ok".to_vec()).unwrap(), b"ok");
/// let err = ensure_success(302, b"moved".to_vec()).unwrap_err();
/// assert!(matches!(err, LLMError::Api { status: 302, .. }));
/// ```
pub fn ensure_success(status: u16, body: Vec<u8>) -> Result<Vec<u8>, LLMError> {
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(LLMError::Api {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Returns an `Authorization: Bearer` header when the key is non-empty.
pub fn auth_headers(api_key: Option<&str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    if let Some(key) = api_key.filter(|key| !key.is_empty()) {
        headers.insert("Authorization".to_string(), format!("Bearer {key}"));
    }
    headers
}

/// Adds the attribution headers required by the OpenRouter gateway when `url` targets it.
pub fn apply_gateway_headers(
    url: &str,
    attribution: &GatewayAttribution,
    headers: &mut HashMap<String, String>,
) {
    if url.contains(ATTRIBUTION_HOST_HINT) {
        headers.insert("HTTP-Referer".to_string(), attribution.referer.clone());
        headers.insert("X-Title".to_string(), attribution.title.clone());
    }
}

/// Reads a streaming body to completion.
pub async fn collect_body(mut body: HttpBodyStream) -> Result<Vec<u8>, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    Ok(bytes)
}

fn serialize_body<T: Serialize>(body: &T) -> Result<Vec<u8>, LLMError> {
    serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Serializes a body to JSON, POSTs it, reads the whole answer and fails on status ≥ 300.
///
/// This is the single buffered primitive every chat strategy goes through.
///
/// # Examples
///
/// ```
/// # use std::collections::HashMap;
/// # use async_trait::async_trait;
/// # use llm_relay::http::{post_json_with_headers, HttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};
/// # use llm_relay::error::LLMError;
/// # use serde_json::json;
/// struct MockTransport;
///
/// #[async_trait]
/// impl HttpTransport for MockTransport {
///     async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
///         assert_eq!(request.headers.get("X-Test"), Some(&"ok".to_string()));
///         Ok(HttpResponse { status: 200, headers: Default::default(), body: b"pong".to_vec() })
///     }
///     async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
///         panic!("streaming not used in this example");
///     }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let headers = HashMap::from([("X-Test".to_string(), "ok".to_string())]);
/// let body = post_json_with_headers(&MockTransport, "https://example.com", headers, &json!({"ping": 1}), None)
///     .await
///     .unwrap();
/// assert_eq!(body, b"pong");
/// # });
/// ```
///
/// # Errors
///
/// Returns [`LLMError::Validation`] if serialization fails, [`LLMError::Api`] for non-2xx
/// statuses, or forwards the error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, LLMError> {
    let payload = serialize_body(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    debug!(method = request.method.as_str(), url = %request.url, "sending request");
    transport.send(request).await?.into_success_body()
}

/// Issues a JSON POST request and returns the open body stream of a 2xx response.
///
/// A non-2xx response is drained and turned into [`LLMError::Api`] before returning.
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpBodyStream, LLMError> {
    let payload = serialize_body(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    debug!(method = request.method.as_str(), url = %request.url, "opening stream");
    let response = transport.send_stream(request).await?;
    if !(200..300).contains(&response.status) {
        let text = collect_body(response.body).await?;
        return Err(LLMError::Api {
            status: response.status,
            body: String::from_utf8_lossy(&text).into_owned(),
        });
    }
    Ok(response.body)
}

/// Issues a GET request and returns the body of a 2xx response.
pub async fn get_with_headers(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
) -> Result<Vec<u8>, LLMError> {
    let request = HttpRequest::get(url).with_headers(headers);
    debug!(method = request.method.as_str(), url = %request.url, "sending request");
    transport.send(request).await?.into_success_body()
}

/// Issues a multipart POST request and returns the body of a 2xx response.
pub async fn post_multipart_with_headers(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    fields: Vec<FormField>,
) -> Result<Vec<u8>, LLMError> {
    let request = HttpRequest::post_multipart(url, fields).with_headers(headers);
    debug!(method = request.method.as_str(), url = %request.url, "sending multipart request");
    transport.send(request).await?.into_success_body()
}

pub mod reqwest;
