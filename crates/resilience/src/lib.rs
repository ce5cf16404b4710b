//! Circuit breakers and guarded calls for downstream dependencies.
//!
//! A [`Breaker`] tracks the health of one (dependency, operation-class) pair.
//! [`GuardedCaller`] combines a breaker with a liveness probe and a fallback,
//! giving every outbound client the same calling convention:
//!
//! - probe fails: the action is skipped and the call is reported unavailable
//! - breaker open: the fallback is returned as a degraded, non-error result
//! - action fails: the failure is recorded and surfaced with the fallback
//! - action succeeds: the result is returned
//!
//! Breakers are handed out by an explicit [`BreakerRegistry`] owned by the
//! application's composition root.

pub mod breaker;
pub mod error;
pub mod guarded;
pub mod registry;

pub use breaker::{Breaker, BreakerConfig, BreakerState};
pub use error::GuardError;
pub use guarded::{GuardedCaller, GuardedOutcome};
pub use registry::BreakerRegistry;
