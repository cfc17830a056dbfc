//! Collaborator seams: the knowledge index, the agent backend and the
//! client push channel.
//!
//! Each is constructed once per process and handed to [`crate::Relay`] as an
//! `Arc<dyn _>`; nothing in the relay reaches for a global client.

use crate::error::{BackendError, DeliveryError};
use crate::item::RawStreamItem;
use async_trait::async_trait;
use courier_types::{InvocationRequest, OutboundEvent, RetrievalResult};
use futures_util::stream::BoxStream;

/// The agent's response, item by item. An `Err` ends the response.
pub type ItemStream = BoxStream<'static, Result<RawStreamItem, BackendError>>;

/// Looks up passages relevant to a prompt.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, prompt: &str) -> Result<RetrievalResult, BackendError>;
}

/// Starts a streamed agent response.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<ItemStream, BackendError>;
}

/// Pushes one event to one client connection.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn push(&self, connection_id: &str, event: &OutboundEvent) -> Result<(), DeliveryError>;
}
