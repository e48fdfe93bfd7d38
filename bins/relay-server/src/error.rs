#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Engine(#[from] relay_engine::EngineError),

    #[error("target: {0}")]
    Target(#[from] relay_api::RelayError),

    #[error("api: {0}")]
    Api(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
