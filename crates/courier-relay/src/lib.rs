//! Streaming agent-response relay.
//!
//! Invokes a generative-agent backend with a prompt and its retrieved
//! supporting documents, then turns the backend's loosely-shaped response
//! stream into typed [`OutboundEvent`](courier_types::OutboundEvent)s pushed
//! to one client connection as they arrive.
//!
//! # Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Retry controller | [`retry`] | a response stream, or an [`InvocationError`] |
//! | Classifier | [`classify`] | one [`StreamFragment`] per raw item |
//! | Forwarder | [`forward`] | `delta` / `thinking` pushes, accumulation |
//! | Aggregator | [`aggregate`] | `final_text` / `files` pushes after the stream ends |
//! | Codec | [`codec`] | base64 for file payloads |
//!
//! # Usage
//!
//! ```rust,ignore
//! use courier_relay::Relay;
//!
//! let relay = Relay::new(retriever, backend, sink);
//! let outcome = relay.handle(&input).await;
//! ```

pub mod aggregate;
pub mod backend;
pub mod classify;
pub mod codec;
mod error;
pub mod forward;
mod item;
mod relay;
pub mod request;
pub mod retry;

pub use backend::{AgentBackend, EventSink, ItemStream, Retriever};
pub use classify::{classify, AttachedFile, Envelope, StreamFragment};
pub use error::{BackendError, DeliveryError, InvocationError, RelayError};
pub use forward::{Accumulator, Outbound};
pub use item::RawStreamItem;
pub use relay::Relay;
pub use retry::{classify_failure, invoke_with_retry, FailureClass, RetryPolicy};
