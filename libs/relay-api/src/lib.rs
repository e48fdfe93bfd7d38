pub mod clock;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod outcome;
pub mod record;
pub mod store;
pub mod target;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dead_letter::DeadLetterSink;
pub use error::{ErrorKind, RelayError};
pub use event::Event;
pub use outcome::{DeadLetterEntry, DeliveryOutcome};
pub use record::{Attributes, EnrichedEvent, EnrichmentRecord};
pub use store::TtlStore;
pub use target::{TargetClient, TargetRequest, TargetResponse};
