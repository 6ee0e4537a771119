use crate::error::TransportError;
use crate::events::EventBus;
use crate::state::{ConnectionState, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;
use streamui_core::Envelope;

/// A logical message channel over an unreliable connection.
///
/// Subscriptions live on the [`EventBus`] returned by `events()` and survive
/// reconnects.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts connecting. Resolves once the first attempt settles; a failed
    /// first attempt is returned while reconnects continue per policy.
    async fn open(&self) -> Result<(), TransportError>;

    async fn close(&self);

    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    fn state(&self) -> ConnectionState;

    fn events(&self) -> &Arc<EventBus>;

    fn kind(&self) -> TransportKind;
}
