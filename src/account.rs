//! Account endpoints: balance, profile and usage history.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::http::{DynHttpTransport, auth_headers, get_with_headers};

const POLLINATIONS_BALANCE_URL: &str = "https://gen.pollinations.ai/account/balance";
const POLLINATIONS_PROFILE_URL: &str = "https://gen.pollinations.ai/account/profile";
const POLLINATIONS_USAGE_URL: &str = "https://gen.pollinations.ai/account/usage";

/// Provider name plus the optional bearer key, shared by balance and profile lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRequest {
    pub provider: String,
    pub api_key: Option<String>,
}

impl AccountRequest {
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

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Balance {
    pub credits: f64,
    pub balance: f64,
    pub currency: String,
    #[serde(skip)]
    pub raw: Value,
}

impl Balance {
    pub fn has_credits(&self) -> bool {
        self.credits > 0.0 || self.balance > 0.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileUsage {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_requests: i64,
    pub total_cost: f64,
    pub period_start: String,
    pub period_end: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileLimits {
    pub requests_per_day: i64,
    pub tokens_per_day: i64,
    pub tokens_per_month: i64,
    pub requests_used: i64,
    pub tokens_used: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub username: String,
    pub credits: f64,
    pub balance: f64,
    pub usage: Option<ProfileUsage>,
    pub limits: Option<ProfileLimits>,
    pub created_at: String,
    pub plan: String,
    pub subscription: String,
    #[serde(skip)]
    pub raw: Value,
}

impl Profile {
    pub fn has_credits(&self) -> bool {
        self.credits > 0.0 || self.balance > 0.0
    }

    /// Monthly token usage in percent, zero when no monthly limit is known.
    pub fn usage_percent(&self) -> f64 {
        match &self.limits {
            Some(limits) if limits.tokens_per_month != 0 => {
                limits.tokens_used as f64 / limits.tokens_per_month as f64 * 100.0
            }
            _ => 0.0,
        }
    }
}

/// Representation requested from the usage endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum UsageFormat {
    #[default]
    Json,
    Csv,
}

impl UsageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for UsageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageFormat {
    type Err = LLMError;

    /// An empty string selects JSON.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(LLMError::validation(format!("unsupported usage format: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRequest {
    pub provider: String,
    pub api_key: Option<String>,
    pub format: UsageFormat,
}

impl UsageRequest {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_format(mut self, format: UsageFormat) -> Self {
        self.format = format;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRecord {
    pub timestamp: String,
    pub model: String,
    pub provider: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub prompt: String,
    pub tokens: i64,
    pub cost: f64,
    pub currency: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageTotals {
    pub total_requests: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub currency: String,
}

/// Usage history. For CSV requests only `csv` is filled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub records: Vec<UsageRecord>,
    pub totals: Option<UsageTotals>,
    #[serde(skip)]
    pub csv: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

/// Decoded payload plus the undecoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountResponse<T> {
    pub data: T,
    pub raw: Vec<u8>,
}

#[async_trait]
pub trait BalanceProvider: Send + Sync {
    async fn balance(&self, request: &AccountRequest) -> Result<AccountResponse<Balance>, LLMError>;
}

#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn profile(&self, request: &AccountRequest) -> Result<AccountResponse<Profile>, LLMError>;
}

#[async_trait]
pub trait UsageProvider: Send + Sync {
    async fn usage(&self, request: &UsageRequest) -> Result<AccountResponse<Usage>, LLMError>;
}

pub type DynBalanceProvider = Arc<dyn BalanceProvider>;
pub type DynProfileProvider = Arc<dyn ProfileProvider>;
pub type DynUsageProvider = Arc<dyn UsageProvider>;

fn parse_error(err: serde_json::Error) -> LLMError {
    LLMError::transport("parse response", err.to_string())
}

fn decode_with_raw<T: DeserializeOwned>(raw: &[u8]) -> Result<(T, Value), LLMError> {
    let value: Value = serde_json::from_slice(raw).map_err(parse_error)?;
    let decoded = T::deserialize(&value).map_err(parse_error)?;
    Ok((decoded, value))
}

/// Decodes a JSON usage body. A body without top-level `records` or `totals` may wrap the
/// usage object in `usage` or `data`.
pub fn parse_usage(raw: &[u8]) -> Result<Usage, LLMError> {
    let value: Value = serde_json::from_slice(raw).map_err(parse_error)?;
    let unwrapped = value.get("records").is_none() && value.get("totals").is_none();
    let target = if unwrapped {
        ["usage", "data"]
            .iter()
            .find_map(|key| value.get(key).filter(|inner| inner.is_object()))
            .unwrap_or(&value)
    } else {
        &value
    };
    let mut usage = Usage::deserialize(target).map_err(parse_error)?;
    usage.raw = value;
    Ok(usage)
}

/// Account endpoints of the Pollinations gateway.
pub struct PollinationsAccount {
    transport: DynHttpTransport,
}

impl PollinationsAccount {
    pub const NAME: &'static str = "pollinations";

    pub fn new(transport: DynHttpTransport) -> Self {
        Self { transport }
    }

    async fn get(
        &self,
        url: &str,
        api_key: Option<&str>,
        extra: &[(&str, &str)],
    ) -> Result<Vec<u8>, LLMError> {
        let mut headers: HashMap<String, String> = auth_headers(api_key);
        headers.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        get_with_headers(self.transport.as_ref(), url, headers).await
    }
}

#[async_trait]
impl BalanceProvider for PollinationsAccount {
    async fn balance(&self, request: &AccountRequest) -> Result<AccountResponse<Balance>, LLMError> {
        let raw = self
            .get(POLLINATIONS_BALANCE_URL, request.api_key.as_deref(), &[])
            .await?;
        let (mut data, value): (Balance, Value) = decode_with_raw(&raw)?;
        data.raw = value;
        Ok(AccountResponse { data, raw })
    }
}

#[async_trait]
impl ProfileProvider for PollinationsAccount {
    async fn profile(&self, request: &AccountRequest) -> Result<AccountResponse<Profile>, LLMError> {
        let raw = self
            .get(POLLINATIONS_PROFILE_URL, request.api_key.as_deref(), &[])
            .await?;
        let (mut data, value): (Profile, Value) = decode_with_raw(&raw)?;
        data.raw = value;
        Ok(AccountResponse { data, raw })
    }
}

#[async_trait]
impl UsageProvider for PollinationsAccount {
    async fn usage(&self, request: &UsageRequest) -> Result<AccountResponse<Usage>, LLMError> {
        let api_key = request.api_key.as_deref();
        match request.format {
            UsageFormat::Csv => {
                let raw = self
                    .get(POLLINATIONS_USAGE_URL, api_key, &[("Accept", "text/csv")])
                    .await?;
                let data = Usage {
                    csv: Some(String::from_utf8_lossy(&raw).into_owned()),
                    ..Usage::default()
                };
                Ok(AccountResponse { data, raw })
            }
            UsageFormat::Json => {
                let raw = self.get(POLLINATIONS_USAGE_URL, api_key, &[]).await?;
                let data = parse_usage(&raw)?;
                Ok(AccountResponse { data, raw })
            }
        }
    }
}
