use std::sync::Arc;
use std::time::Duration;

use relay_api::{Clock, DeadLetterSink, SystemClock};
use relay_engine::{Engine, PipeComponents, RelayConfig};
use target_http::{BasicCredentials, HttpTargetClient};

use crate::cli::ConfigArgs;
use crate::error::ServerError;

/// Upper bound on waiting for workers after the shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ConfigArgs) -> Result<(), ServerError> {
    tracing::info!("relay-server starting");

    let config = RelayConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let dead_letters: Arc<dyn DeadLetterSink> = match &config.dead_letter.path {
        Some(path) => {
            tracing::info!(%path, "dead-letter sink: file");
            Arc::new(dead_letter_file::FileDeadLetterSink::new(path))
        }
        None => {
            tracing::warn!("dead-letter sink: memory (entries are lost on restart)");
            Arc::new(dead_letter_memory::MemoryDeadLetterSink::new())
        }
    };

    let credentials = match (&config.target.username, &config.target.password) {
        (Some(username), Some(password)) => Some(BasicCredentials {
            username: username.clone(),
            password: password.clone(),
        }),
        _ => None,
    };
    let client = HttpTargetClient::new(&config.target.endpoint_url, credentials, config.target.timeout())?;
    tracing::info!(endpoint = %config.target.endpoint_url, "target configured");

    let api_port = config.api_port;
    let engine = Engine::bootstrap(
        config,
        PipeComponents {
            store: Arc::new(store_memory::MemoryTtlStore::new(clock.clone())),
            client: Arc::new(client),
            dead_letters,
            clock,
        },
    )
    .await?;

    let api_handle = engine.handle();
    let api_token = engine.token().child_token();
    let api_task = tokio::spawn(async move {
        relay_api_server::run(api_port, api_handle, api_token).await
    });
    tracing::info!(port = api_port, "server ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
        }
        result = api_task => {
            // The API server only stops on its own when it failed to start.
            engine.shutdown().await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ServerError::Api(e)),
                Err(e) => Err(ServerError::Api(e.to_string())),
            };
        }
    }

    if tokio::time::timeout(DRAIN_TIMEOUT, engine.shutdown()).await.is_err() {
        tracing::warn!("workers did not stop in time; leased messages will be redelivered");
    }
    tracing::info!("shutdown complete");
    Ok(())
}
