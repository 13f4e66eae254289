//! Append-only event log for the content repository.
//!
//! Every event belongs to one stream (a content stream or a workspace),
//! carries a per-stream [`Version`] for optimistic concurrency and a global
//! [`SequenceNumber`] that totally orders the log.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{EventStoreError, Result};
pub use event::{
    EventEnvelope, EventId, EventMetadata, NewEvent, NewEventBuilder, SequenceNumber, StreamName,
    Version,
};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{CommitResult, EventStore, EventStoreExt, EventStream, ExpectedVersion};
