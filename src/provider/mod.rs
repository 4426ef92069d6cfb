use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::LLMError;
use crate::stream::ChunkStream;
use crate::types::{ChatRequest, ChatResponse};

pub mod completion;
pub mod registry;
pub mod request;

/// 统一的 Provider Trait 内置策略与注册的自定义策略都实现该接口
///
/// 实例在解析时绑定模型 密钥与端点 每次调用只读取请求中的对话 图片与采样参数
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 提交完整请求并提取助手文本
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse, LLMError>;

    /// 以流式方式返回增量
    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream, LLMError>;

    /// 策略名称
    fn name(&self) -> &str;

    /// 目标端点
    fn endpoint(&self) -> &str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn ChatProvider>;

/// 内置策略 以及通过 URL 选中的通用 OpenAI 兼容策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// 本地推理服务
    Ollama,
    /// Pollinations 托管网关
    Pollinations,
    /// OpenRouter 托管网关
    OpenRouter,
    /// 任意 OpenAI 兼容端点
    Generic,
}

impl ProviderKind {
    /// 按归一化后的名称查找内置策略 `Generic` 不能按名称选中
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "ollama" => Some(Self::Ollama),
            "pollinations" => Some(Self::Pollinations),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::Pollinations => "pollinations",
            Self::OpenRouter => "openrouter",
            Self::Generic => "generic",
        }
    }

    /// 内置默认端点
    pub fn default_endpoint(&self) -> Option<&'static str> {
        match self {
            Self::Ollama => Some("http://localhost:11434/v1/chat/completions"),
            Self::Pollinations => Some("https://gen.pollinations.ai/v1/chat/completions"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1/chat/completions"),
            Self::Generic => None,
        }
    }

    /// 本地服务不需要鉴权
    pub fn sends_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// 非流式请求是否显式写入 `"stream": false`
    pub fn explicit_stream_flag(&self) -> bool {
        matches!(self, Self::Ollama)
    }
}

/// 去除首尾空白并转为小写
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// 判断是否为带主机名的 http(s) 绝对 URL
pub fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}
