//! Job data model.
//!
//! - [`JobRequest`]: immutable description of one generation
//! - [`JobHandle`]: provider-assigned identity plus lifecycle state
//! - [`StatusEvent`]: transient status snapshot from the provider
//! - [`JobResult`]: terminal success payload
//!
//! Input validation for caller-supplied values lives in [`validate`].

mod types;
pub mod validate;

pub use types::{JobHandle, JobRequest, JobResult, JobState, Phase, StatusEvent};
pub use validate::ValidationError;
