//! Binds a transport, a conversation store and the interpreter to one root
//! container.

pub mod config;
pub mod manager;

pub use config::{ClientConfig, ConfigError};
pub use manager::{ConversationManager, ManagerError, ReplayReport};
