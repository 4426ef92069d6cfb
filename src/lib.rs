//! 多后端 LLM 中继库 统一 OpenAI 兼容的聊天 流式增量与网关附属接口

pub mod account;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod media;
pub mod provider;
pub mod stream;
pub mod types;

pub use client::{LLMClient, LLMClientBuilder, send, send_messages, send_with_images};
pub use config::ClientConfig;
pub use error::LLMError;
pub use provider::registry::{ProviderContext, ProviderHandle, ProviderRegistry};
pub use provider::{ChatProvider, DynProvider, ProviderKind};
pub use stream::ChunkStream;
pub use types::*;
