pub mod bootstrap;
pub mod buffer;
pub mod config;
pub mod dead_letter;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod ingress;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;
pub mod rule;

pub use bootstrap::{Engine, EngineHandle, EngineStatus, PipeComponents};
pub use buffer::{BufferCounts, Message, MessageId, Receipt, SourceBuffer};
pub use config::{AbsentPolicy, PermanentFailurePolicy, RelayConfig};
pub use error::EngineError;
pub use ingress::{Admission, Ingress};
pub use orchestrator::{MessageState, PipeOrchestrator, PipeStatsSnapshot};
