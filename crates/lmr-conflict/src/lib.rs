//! Per-field divergence detection and auto-resolution.
//!
//! Given the canonicalized values of one (CRM entry, page) pair, the engine
//! reports every mapped field where the two sides disagree, and for each
//! divergence either picks a winning side or declines and marks it manual.
//! The decision is a pure function of (direction, timestamps); same inputs,
//! same verdict, always.

mod engine;
mod types;

pub use engine::{detect, resolve_side};
pub use types::{ConflictReport, FieldDivergence, Resolution, Timestamps};
