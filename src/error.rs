use thiserror::Error;

/// Aggregates every failure mode exposed by the relay client.
///
/// Every variant is terminal for the call that produced it: nothing in the crate retries.
/// Callers can match on the variant to decide whether to fall back to another provider or
/// surface the message directly.
#[derive(Debug, Error)]
pub enum LLMError {
    /// Invalid request or configuration detected before any network I/O.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// No strategy matched the requested provider identifier.
    #[error("unknown {kind}provider: {name}")]
    UnknownProvider {
        /// Surface being resolved, such as `"image "`; empty for chat providers.
        kind: &'static str,
        /// Identifier as supplied by the caller, before normalization.
        name: String,
    },
    /// Request construction, network or body-read failure, labelled by stage.
    #[error("{stage}: {message}")]
    Transport {
        /// Short label such as `request` or `read response`.
        stage: &'static str,
        /// Underlying error text.
        message: String,
    },
    /// The upstream answered with a non-2xx status.
    #[error("api error {status}: {body}")]
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Raw response body, kept verbatim for debugging.
        body: String,
    },
    /// None of the response interpretations produced any text.
    #[error("{message}")]
    Extraction { message: String },
    /// Error string reported by the provider inside an otherwise successful response.
    #[error("{message}")]
    Reported { message: String },
    /// The call was cancelled through an external cancellation token.
    #[error("request aborted: {message}")]
    Aborted { message: String },
}

impl LLMError {
    /// Creates an [`LLMError::Transport`] tagged with the stage that failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::transport("request", "connection refused");
    /// assert_eq!(err.to_string(), "request: connection refused");
    /// ```
    pub fn transport<T: Into<String>>(stage: &'static str, message: T) -> Self {
        Self::Transport {
            stage,
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::Validation`] from a textual description.
    pub fn validation<T: Into<String>>(message: T) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an [`LLMError::UnknownProvider`] for a chat provider identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_relay::error::LLMError;
    ///
    /// let err = LLMError::unknown_provider("", " Mystery ");
    /// assert_eq!(err.to_string(), "unknown provider:  Mystery ");
    /// ```
    pub fn unknown_provider<T: Into<String>>(kind: &'static str, name: T) -> Self {
        Self::UnknownProvider {
            kind,
            name: name.into(),
        }
    }

    /// Returns `true` when the error came from an external cancellation.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}
