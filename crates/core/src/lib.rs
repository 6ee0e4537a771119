//! Core types for the streamed UI pipeline: wire envelopes and patches, the
//! component capability contract, and the in-memory document the interpreter
//! reconciles.

pub mod component;
pub mod document;
pub mod stats;
pub mod types;

pub use component::{
    factory, ChildRenderer, Component, ComponentError, ComponentFactory, ParseOutcome,
    RenderScope, View, ERROR_TAG,
};
pub use document::{Container, Element, ElementMeta, ElementSnapshot, Phase, Placement, ReconcileKey};
pub use stats::RenderStats;
pub use types::*;
