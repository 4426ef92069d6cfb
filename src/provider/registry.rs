//! Provider registry and request-to-strategy resolution.
//!
//! The registry is a plain value owned by [`crate::client::LLMClient`]. It is filled before the
//! client is built and only read afterwards, so dispatch needs no locking. Callers that share a
//! registry across threads while still registering must serialize those writes themselves.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::account::{
    DynBalanceProvider, DynProfileProvider, DynUsageProvider, PollinationsAccount,
};
use crate::catalog::{DynModelsProvider, PollinationsModels};
use crate::config::{ClientConfig, GatewayAttribution};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::types::ChatRequest;

use super::completion::CompletionProvider;
use super::{DynProvider, ProviderKind, is_http_url, normalize_name};

/// Everything a chat strategy is bound to at construction time.
#[derive(Clone)]
pub struct ProviderContext {
    pub transport: DynHttpTransport,
    pub model: String,
    pub api_key: Option<String>,
    /// Endpoint override carried by the request, if any.
    pub endpoint: Option<String>,
    pub attribution: GatewayAttribution,
}

/// Builds a chat strategy for a registered name.
pub type ChatProviderFactory =
    Arc<dyn Fn(ProviderContext) -> Result<DynProvider, LLMError> + Send + Sync>;
/// Builds a model-catalog provider bound to the shared transport.
pub type ModelsProviderFactory = Arc<dyn Fn(DynHttpTransport) -> DynModelsProvider + Send + Sync>;
/// Builds a balance provider bound to the shared transport.
pub type BalanceProviderFactory = Arc<dyn Fn(DynHttpTransport) -> DynBalanceProvider + Send + Sync>;
/// Builds a profile provider bound to the shared transport.
pub type ProfileProviderFactory = Arc<dyn Fn(DynHttpTransport) -> DynProfileProvider + Send + Sync>;
/// Builds a usage provider bound to the shared transport.
pub type UsageProviderFactory = Arc<dyn Fn(DynHttpTransport) -> DynUsageProvider + Send + Sync>;

/// Name under which a factory was registered, already normalized.
///
/// Use [`ProviderHandle::name`] as the `provider` field of later requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    name: String,
}

impl ProviderHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Factories for runtime-registered providers, keyed by lower-cased name.
///
/// Registering the same name twice keeps the last factory. There is no removal.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    chat: HashMap<String, ChatProviderFactory>,
    models: HashMap<String, ModelsProviderFactory>,
    balance: HashMap<String, BalanceProviderFactory>,
    profile: HashMap<String, ProfileProviderFactory>,
    usage: HashMap<String, UsageProviderFactory>,
}

fn insert<T>(map: &mut HashMap<String, T>, name: &str, factory: T) -> ProviderHandle {
    let name = normalize_name(name);
    map.insert(name.clone(), factory);
    ProviderHandle { name }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom chat strategy.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use llm_relay::provider::ProviderKind;
    /// use llm_relay::provider::completion::CompletionProvider;
    /// use llm_relay::provider::registry::ProviderRegistry;
    ///
    /// let mut registry = ProviderRegistry::new();
    /// let handle = registry.register_chat(" Together ", |context| {
    ///     Ok(Arc::new(CompletionProvider::new(
    ///         ProviderKind::Generic,
    ///         "https://api.together.xyz/v1/chat/completions",
    ///         context,
    ///     )))
    /// });
    /// assert_eq!(handle.name(), "together");
    /// assert!(registry.contains_chat("TOGETHER"));
    /// ```
    pub fn register_chat<F>(&mut self, name: &str, factory: F) -> ProviderHandle
    where
        F: Fn(ProviderContext) -> Result<DynProvider, LLMError> + Send + Sync + 'static,
    {
        insert(&mut self.chat, name, Arc::new(factory))
    }

    pub fn register_models<F>(&mut self, name: &str, factory: F) -> ProviderHandle
    where
        F: Fn(DynHttpTransport) -> DynModelsProvider + Send + Sync + 'static,
    {
        insert(&mut self.models, name, Arc::new(factory))
    }

    pub fn register_balance<F>(&mut self, name: &str, factory: F) -> ProviderHandle
    where
        F: Fn(DynHttpTransport) -> DynBalanceProvider + Send + Sync + 'static,
    {
        insert(&mut self.balance, name, Arc::new(factory))
    }

    pub fn register_profile<F>(&mut self, name: &str, factory: F) -> ProviderHandle
    where
        F: Fn(DynHttpTransport) -> DynProfileProvider + Send + Sync + 'static,
    {
        insert(&mut self.profile, name, Arc::new(factory))
    }

    pub fn register_usage<F>(&mut self, name: &str, factory: F) -> ProviderHandle
    where
        F: Fn(DynHttpTransport) -> DynUsageProvider + Send + Sync + 'static,
    {
        insert(&mut self.usage, name, Arc::new(factory))
    }

    pub fn contains_chat(&self, name: &str) -> bool {
        self.chat.contains_key(&normalize_name(name))
    }

    /// Resolves the chat strategy for a request. No network I/O happens here.
    ///
    /// Order: built-in name, bare URL as provider, URL endpoint override, registered name.
    ///
    /// # Errors
    ///
    /// [`LLMError::Validation`] for a blank provider without a URL endpoint,
    /// [`LLMError::UnknownProvider`] naming the caller's original identifier, or whatever the
    /// registered factory returns.
    pub fn resolve_chat(
        &self,
        request: &ChatRequest,
        transport: &DynHttpTransport,
        config: &ClientConfig,
    ) -> Result<DynProvider, LLMError> {
        let name = normalize_name(&request.provider);
        let override_endpoint = request
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty());
        let context = ProviderContext {
            transport: transport.clone(),
            model: request.model.clone(),
            api_key: request.api_key.clone(),
            endpoint: override_endpoint.map(str::to_string),
            attribution: config.attribution.clone(),
        };

        if let Some(kind) = ProviderKind::builtin(&name) {
            let endpoint = override_endpoint
                .or_else(|| config.endpoint_override(kind.name()))
                .or_else(|| kind.default_endpoint())
                .unwrap_or_default()
                .to_string();
            debug!(provider = kind.name(), %endpoint, "resolved built-in provider");
            return Ok(Arc::new(CompletionProvider::new(kind, endpoint, context)));
        }

        let raw_name = request.provider.trim();
        if is_http_url(raw_name) {
            debug!(endpoint = raw_name, "resolved provider URL to generic strategy");
            return Ok(Arc::new(CompletionProvider::new(
                ProviderKind::Generic,
                raw_name,
                context,
            )));
        }

        if let Some(endpoint) = override_endpoint.filter(|endpoint| is_http_url(endpoint)) {
            debug!(provider = %name, endpoint, "resolved endpoint override to generic strategy");
            let endpoint = endpoint.to_string();
            return Ok(Arc::new(CompletionProvider::new(
                ProviderKind::Generic,
                endpoint,
                context,
            )));
        }

        if name.is_empty() {
            return Err(LLMError::validation("provider is required"));
        }

        if let Some(factory) = self.chat.get(&name) {
            debug!(provider = %name, "resolved registered provider");
            return factory(context);
        }

        Err(LLMError::unknown_provider("", request.provider.clone()))
    }

    /// Resolves a model-catalog provider: `pollinations` or a registered name.
    pub fn resolve_models(
        &self,
        provider: &str,
        transport: &DynHttpTransport,
    ) -> Result<DynModelsProvider, LLMError> {
        let name = normalize_name(provider);
        if name == PollinationsModels::NAME {
            return Ok(Arc::new(PollinationsModels::new(transport.clone())));
        }
        self.models
            .get(&name)
            .map(|factory| factory(transport.clone()))
            .ok_or_else(|| LLMError::unknown_provider("models ", provider))
    }

    /// Resolves a balance provider: `pollinations` or a registered name.
    pub fn resolve_balance(
        &self,
        provider: &str,
        transport: &DynHttpTransport,
    ) -> Result<DynBalanceProvider, LLMError> {
        let name = normalize_name(provider);
        if name == PollinationsAccount::NAME {
            return Ok(Arc::new(PollinationsAccount::new(transport.clone())));
        }
        self.balance
            .get(&name)
            .map(|factory| factory(transport.clone()))
            .ok_or_else(|| LLMError::unknown_provider("balance ", provider))
    }

    /// Resolves a profile provider: `pollinations` or a registered name.
    pub fn resolve_profile(
        &self,
        provider: &str,
        transport: &DynHttpTransport,
    ) -> Result<DynProfileProvider, LLMError> {
        let name = normalize_name(provider);
        if name == PollinationsAccount::NAME {
            return Ok(Arc::new(PollinationsAccount::new(transport.clone())));
        }
        self.profile
            .get(&name)
            .map(|factory| factory(transport.clone()))
            .ok_or_else(|| LLMError::unknown_provider("profile ", provider))
    }

    /// Resolves a usage provider: `pollinations` or a registered name.
    pub fn resolve_usage(
        &self,
        provider: &str,
        transport: &DynHttpTransport,
    ) -> Result<DynUsageProvider, LLMError> {
        let name = normalize_name(provider);
        if name == PollinationsAccount::NAME {
            return Ok(Arc::new(PollinationsAccount::new(transport.clone())));
        }
        self.usage
            .get(&name)
            .map(|factory| factory(transport.clone()))
            .ok_or_else(|| LLMError::unknown_provider("usage ", provider))
    }
}
