//! Circuit breakers guarding calls to named dependencies.

mod circuit;
mod kind;
mod registry;

pub use circuit::{BreakerError, BreakerOpen, BreakerState, BreakerStats, CircuitBreaker};
pub use kind::{Classify, FailureKind};
pub use registry::{BreakerRegistry, HealthBucket, RegistrySummary};
