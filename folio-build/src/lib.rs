//! # folio-build
//!
//! The build loop: decide whether committed data changed since the current
//! release, snapshot it into a new release, run the builder and publish.
//!
//! [`BuildLoop::run`] is the entry point. [`decide`] is the pure "should I
//! build?" function it is driven by.

pub mod builder;
pub mod copy;
pub mod decision;
pub mod error;
pub mod hooks;
pub mod in_flight;
pub mod run;
pub mod triggers;

pub use builder::{BuildContext, Builder, BuilderRegistry, CommandBuilder, NoopBuilder};
pub use decision::{decide, BuildDecision, DecisionInputs};
pub use error::{BuildError, ErrorKind};
pub use hooks::{BuildHook, HookChain, HookContext, HookOutcome};
pub use in_flight::InFlight;
pub use run::{BuildLoop, BuildOutcome, BuildState};
pub use triggers::TriggerSet;
