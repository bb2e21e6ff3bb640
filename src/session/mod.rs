mod exchange;
mod reconciler;

pub use self::exchange::{CommandExchange, PendingRequest};
pub use self::reconciler::{ClimateSession, CycleOutcome, CycleOutcomeKind, CycleState};
