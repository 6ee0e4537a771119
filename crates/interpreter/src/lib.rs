//! Reconciles declarative node lists into live containers and applies
//! single-operation patches.

mod interpreter;
mod outcome;
mod patch;

pub use interpreter::{Interpreter, DEFAULT_TRANSITION_TIMEOUT};
pub use outcome::{EnvelopeOutcome, PatchOutcome};
