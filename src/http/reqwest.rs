use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};

use crate::error::LLMError;

use super::{
    DynHttpTransport, FormField, HttpBody, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse,
    HttpStreamResponse, HttpTransport,
};

/// Whole-request deadline used when no configuration overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default [`HttpTransport`] backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps an existing `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with the given whole-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, LLMError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map(Self::new)
            .map_err(|err| {
                LLMError::transport("create client", format!("failed to create reqwest client: {err}"))
            })
    }

    /// Builds a client with [`DEFAULT_TIMEOUT`].
    pub fn default_client() -> Result<Self, LLMError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        }
    }

    fn build_form(fields: Vec<FormField>) -> Form {
        fields.into_iter().fold(Form::new(), |form, field| match field {
            FormField::Text { name, value } => form.text(name, value),
            FormField::File {
                name,
                file_name,
                data,
            } => form.part(name, Part::bytes(data).file_name(file_name)),
        })
    }

    fn build_request(&self, mut request: HttpRequest) -> Result<reqwest::RequestBuilder, LLMError> {
        let method = Self::method(request.method);
        let mut builder = self.client.request(method, &request.url);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        for (name, value) in request.headers.drain() {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(
                |err| LLMError::transport("create request", format!("invalid header name: {err}")),
            )?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                LLMError::transport(
                    "create request",
                    format!("invalid header value for {header_name}: {err}"),
                )
            })?;
            builder = builder.header(header_name, header_value);
        }

        match request.body.take() {
            Some(HttpBody::Bytes(body)) => builder = builder.body(body),
            Some(HttpBody::Multipart(fields)) => builder = builder.multipart(Self::build_form(fields)),
            None => {}
        }

        Ok(builder)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::transport("request", err.to_string()))?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| LLMError::transport("read response", err.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|err| LLMError::transport("request", err.to_string()))?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| LLMError::transport("read stream", err.to_string()))
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Builds a shareable transport with the given timeout.
pub fn dyn_transport_with_timeout(timeout: Duration) -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::with_timeout(timeout)?))
}

/// Builds a shareable transport with [`DEFAULT_TIMEOUT`].
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    dyn_transport_with_timeout(DEFAULT_TIMEOUT)
}
