//! Ordered, queryable envelope history per conversation with pluggable
//! persistence.

pub mod backend;
pub mod store;
pub mod types;

pub use backend::{JsonlBackend, MemoryBackend, PersistenceBackend};
pub use store::{ConversationStore, HandlerId, UpdateHandler};
pub use types::*;
