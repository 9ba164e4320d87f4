//! Core event wire protocol: type + payload + envelope.
//!
//! Defines [`CoreEvent`], the tagged union streamed to callers (spec §3/§6), and the
//! envelope (`step_id`, `thread_id`, `ts`) applied to every event. Does not depend on
//! `idp-core`; the core crate bridges its internal `StreamEvent<S>` into `CoreEvent`
//! and calls [`to_json`] to produce the wire line.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::{CoreEvent, PlanStepWire, ReferenceWire};
