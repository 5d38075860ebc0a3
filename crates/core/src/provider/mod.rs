//! Queue-based generation providers.
//!
//! [`ProviderClient`] is the seam the orchestrator drives; [`FalClient`] is
//! the HTTP implementation. Payload interpretation and SSE decoding live in
//! their own modules so they can be tested without a network.

mod fal;
pub mod payload;
pub mod sse;
mod types;

pub use fal::FalClient;
pub use types::{Artifact, ByteStream, ProviderClient, ProviderError, StatusStream};
