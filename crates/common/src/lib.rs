//! Identifier types shared by every crate of the content repository.

mod types;

pub use types::{ContentStreamId, NodeAggregateId, WorkspaceName};
