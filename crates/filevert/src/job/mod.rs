//! Conversion job records: model, persistence and change events.

pub mod events;
pub mod model;
pub mod store;

pub use events::{JobEvent, JobEventBroadcaster};
pub use model::{ConversionJob, JobStatus, JobUpdate, SourceFileRef, TransitionError};
pub use store::{JobPage, JobQuery, JobStore, JobStoreError, JobWriter};
