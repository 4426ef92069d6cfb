use tokio_util::sync::CancellationToken;

use crate::account::{AccountRequest, AccountResponse, Balance, Profile, Usage, UsageRequest};
use crate::catalog::{ModelsRequest, ModelsResponse};
use crate::config::{ClientConfig, build_client_from_config};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::dyn_transport_with_timeout;
use crate::media::{
    AudioRequest, ImageRequest, MediaResponse, PollinationsMedia, TranscriptionRequest,
    TranscriptionResponse,
};
use crate::provider::DynProvider;
use crate::provider::registry::ProviderRegistry;
use crate::stream::{ChunkStream, deliver};
use crate::types::{ChatRequest, ChatResponse, Message, StreamChunk, StreamResponse};

/// LLM 调用入口 持有共享 transport 与 Provider 注册表
///
/// 一个实例可以被多个并发请求共享 注册表在构建后只读
#[derive(Clone)]
pub struct LLMClient {
    transport: DynHttpTransport,
    registry: ProviderRegistry,
    config: ClientConfig,
}

impl LLMClient {
    /// 创建 Builder 便于注入 transport 与注册表
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder::default()
    }

    /// 使用默认配置与空注册表
    pub fn new() -> Result<Self, LLMError> {
        Self::builder().build()
    }

    /// 根据配置构建 使用共享的 reqwest transport
    pub fn from_config(config: &ClientConfig) -> Result<Self, LLMError> {
        build_client_from_config(config, ProviderRegistry::new())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn transport(&self) -> &DynHttpTransport {
        &self.transport
    }

    /// 为请求解析 Provider 不发生网络 I/O
    pub fn resolve(&self, request: &ChatRequest) -> Result<DynProvider, LLMError> {
        self.registry
            .resolve_chat(request, &self.transport, &self.config)
    }

    /// 发送非流式聊天请求
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError> {
        let provider = self.resolve(request)?;
        provider.send(request).await
    }

    /// 发送非流式聊天请求 取消令牌触发时立即返回 [`LLMError::Aborted`]
    pub async fn send_with_cancel(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let provider = self.resolve(request)?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LLMError::Aborted {
                message: "request cancelled".to_string(),
            }),
            response = provider.send(request) => response,
        }
    }

    /// 打开惰性增量流 由调用方自行驱动
    pub async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, LLMError> {
        let provider = self.resolve(request)?;
        provider.stream(request).await
    }

    /// 流式请求 每个增量在读取下一个之前回调一次 返回聚合后的完整文本
    pub async fn send_stream<F>(
        &self,
        request: &ChatRequest,
        on_chunk: F,
    ) -> Result<StreamResponse, LLMError>
    where
        F: FnMut(StreamChunk) -> Result<(), LLMError>,
    {
        let chunks = self.stream(request).await?;
        deliver(chunks, None, on_chunk).await
    }

    /// 同 [`LLMClient::send_stream`] 但连接建立与读取都受取消令牌约束
    pub async fn send_stream_with_cancel<F>(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        on_chunk: F,
    ) -> Result<StreamResponse, LLMError>
    where
        F: FnMut(StreamChunk) -> Result<(), LLMError>,
    {
        let chunks = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LLMError::Aborted {
                    message: "request cancelled".to_string(),
                });
            }
            chunks = self.stream(request) => chunks?,
        };
        deliver(chunks, Some(cancel), on_chunk).await
    }

    pub async fn generate_image(&self, request: &ImageRequest) -> Result<MediaResponse, LLMError> {
        PollinationsMedia::for_provider("image ", &request.provider, &self.transport)?
            .generate_image(request)
            .await
    }

    pub async fn generate_audio(&self, request: &AudioRequest) -> Result<MediaResponse, LLMError> {
        PollinationsMedia::for_provider("audio ", &request.provider, &self.transport)?
            .generate_audio(request)
            .await
    }

    pub async fn transcribe(
        &self,
        request: &TranscriptionRequest,
    ) -> Result<TranscriptionResponse, LLMError> {
        PollinationsMedia::for_provider("transcription ", &request.provider, &self.transport)?
            .transcribe(request)
            .await
    }

    pub async fn list_text_models(
        &self,
        request: &ModelsRequest,
    ) -> Result<ModelsResponse, LLMError> {
        self.registry
            .resolve_models(&request.provider, &self.transport)?
            .list_models(request)
            .await
    }

    pub async fn balance(
        &self,
        request: &AccountRequest,
    ) -> Result<AccountResponse<Balance>, LLMError> {
        self.registry
            .resolve_balance(&request.provider, &self.transport)?
            .balance(request)
            .await
    }

    pub async fn profile(
        &self,
        request: &AccountRequest,
    ) -> Result<AccountResponse<Profile>, LLMError> {
        self.registry
            .resolve_profile(&request.provider, &self.transport)?
            .profile(request)
            .await
    }

    pub async fn usage(&self, request: &UsageRequest) -> Result<AccountResponse<Usage>, LLMError> {
        self.registry
            .resolve_usage(&request.provider, &self.transport)?
            .usage(request)
            .await
    }
}

/// 负责组装 LLMClient 的 Builder
#[derive(Default)]
pub struct LLMClientBuilder {
    transport: Option<DynHttpTransport>,
    registry: ProviderRegistry,
    config: ClientConfig,
}

impl LLMClientBuilder {
    /// 注入自定义 transport 测试中常用内存实现
    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 注入已注册好自定义 Provider 的注册表
    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// 构建最终的 LLMClient 未注入 transport 时按配置超时创建 reqwest transport
    ///
    /// `timeout_secs` 为 0 时返回 `Validation` 错误 无论是否注入了 transport
    pub fn build(self) -> Result<LLMClient, LLMError> {
        if self.config.timeout_secs == 0 {
            return Err(LLMError::validation("timeout_secs must be greater than zero"));
        }
        let transport = match self.transport {
            Some(transport) => transport,
            None => dyn_transport_with_timeout(self.config.timeout())?,
        };
        Ok(LLMClient {
            transport,
            registry: self.registry,
            config: self.config,
        })
    }
}

fn optional_key(api_key: &str) -> Option<String> {
    Some(api_key.trim())
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// 使用默认客户端发送单条提示 空字符串的 key 表示不鉴权
pub async fn send(
    provider: &str,
    model: &str,
    api_key: &str,
    system_prompt: &str,
    prompt: &str,
) -> Result<String, LLMError> {
    send_with_images(provider, model, api_key, system_prompt, prompt, Vec::new()).await
}

/// 同 [`send`] 图片附加到这条用户消息上
pub async fn send_with_images(
    provider: &str,
    model: &str,
    api_key: &str,
    system_prompt: &str,
    prompt: &str,
    images: Vec<String>,
) -> Result<String, LLMError> {
    let mut request = ChatRequest::new(provider, model)
        .with_system_prompt(system_prompt)
        .with_prompt(prompt)
        .with_images(images);
    request.api_key = optional_key(api_key);
    let response = LLMClient::new()?.send(&request).await?;
    Ok(response.content)
}

/// 使用默认客户端发送完整对话
pub async fn send_messages(
    provider: &str,
    model: &str,
    api_key: &str,
    system_prompt: &str,
    messages: Vec<Message>,
) -> Result<String, LLMError> {
    let mut request = ChatRequest::new(provider, model)
        .with_system_prompt(system_prompt)
        .with_messages(messages);
    request.api_key = optional_key(api_key);
    let response = LLMClient::new()?.send(&request).await?;
    Ok(response.content)
}
