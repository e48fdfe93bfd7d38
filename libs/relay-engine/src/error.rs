use relay_api::RelayError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(String),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}

impl EngineError {
    /// Add context to the error.
    ///
    /// For `Relay` variant, context is added to the inner `RelayError`.
    /// For `Config`, context is prepended to the message.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            EngineError::Relay(e) => EngineError::Relay(e.with_context(ctx)),
            EngineError::Config(msg) => EngineError::Config(format!("{ctx}: {msg}")),
        }
    }
}
