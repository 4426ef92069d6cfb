use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::client::LLMClient;
use crate::error::LLMError;
use crate::provider::registry::ProviderRegistry;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_REFERER: &str = "https://github.com/llm-relay/llm-relay";
const DEFAULT_TITLE: &str = "llm-relay";

/// 客户端配置 所有字段都有默认值
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// 单次请求的整体超时 包括流式读取
    pub timeout_secs: u64,
    /// 内置 provider 名称到端点的覆盖 例如 `ollama -> http://gpu-box:11434/v1/chat/completions`
    ///
    /// 反序列化时键会被去空白并转小写
    #[serde(deserialize_with = "deserialize_endpoints")]
    pub endpoints: HashMap<String, String>,
    /// 网关要求的来源标识
    pub attribution: GatewayAttribution,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            endpoints: HashMap::new(),
            attribution: GatewayAttribution::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// 查找内置 provider 的端点覆盖 名称不区分大小写
    ///
    /// 已规范化的键优先 其余大小写变体按字典序取第一个
    pub fn endpoint_override(&self, builtin: &str) -> Option<&str> {
        let name = builtin.trim().to_ascii_lowercase();
        self.endpoints
            .get(&name)
            .or_else(|| {
                self.endpoints
                    .iter()
                    .filter(|(key, _)| key.trim().eq_ignore_ascii_case(&name))
                    .min_by(|left, right| left.0.cmp(right.0))
                    .map(|(_, url)| url)
            })
            .map(String::as_str)
            .filter(|url| !url.trim().is_empty())
    }
}

fn deserialize_endpoints<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    let mut endpoints = HashMap::with_capacity(raw.len());
    for (key, url) in raw {
        let name = key.trim().to_ascii_lowercase();
        if name == key {
            endpoints.insert(name, url);
        } else {
            endpoints.entry(name).or_insert(url);
        }
    }
    Ok(endpoints)
}

/// `HTTP-Referer` 与 `X-Title` 两个头部的取值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayAttribution {
    pub referer: String,
    pub title: String,
}

impl Default for GatewayAttribution {
    fn default() -> Self {
        Self {
            referer: DEFAULT_REFERER.to_string(),
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

/// 根据配置构建 LLMClient 使用共享的 reqwest transport
pub fn build_client_from_config(
    config: &ClientConfig,
    registry: ProviderRegistry,
) -> Result<LLMClient, LLMError> {
    LLMClient::builder()
        .registry(registry)
        .config(config.clone())
        .build()
}
