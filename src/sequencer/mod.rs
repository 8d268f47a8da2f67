//! Step sequencer
//!
//! This module provides:
//! - `StepsBuilder`, the ordered step list with its activation rule
//! - `SequencerEngine`, the task that owns the builder and serialises
//!   user commands with step completions
//! - `SequencerHandle`, the cloneable request interface used by the API

mod builder;
mod engine;

pub use builder::{SequenceSnapshot, StepDescriptor, StepsBuilder};
pub use engine::{SequencerCommand, SequencerEngine, SequencerHandle};
