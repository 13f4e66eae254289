use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{ContentStreamId, WorkspaceName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form metadata attached to an event.
pub type EventMetadata = HashMap<String, serde_json::Value>;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Per-stream version number, used for optimistic concurrency control.
///
/// Versions start at 1 for the first event of a stream and increment by 1
/// for each subsequent event. An empty (or missing) stream is at version 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) of a stream without events.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Position of an event in the global log.
///
/// Sequence numbers totally order every event of the store. The first event
/// has sequence number 1; [`SequenceNumber::none`] (0) means "before the
/// first event" and is the position of a subscriber that has seen nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(i64);

impl SequenceNumber {
    /// Creates a sequence number from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The position before the first event.
    pub fn none() -> Self {
        Self(0)
    }

    /// The sequence number of the first event of the log.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true for [`SequenceNumber::none`].
    pub fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Returns the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Name of an event stream, of the form `<category>:<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    /// Category of content stream event streams.
    pub const CONTENT_STREAM_CATEGORY: &'static str = "ContentStream";

    /// Category of workspace event streams.
    pub const WORKSPACE_CATEGORY: &'static str = "Workspace";

    /// Creates a stream name from a raw value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The stream holding the events of a content stream.
    pub fn for_content_stream(id: ContentStreamId) -> Self {
        Self(format!("{}:{id}", Self::CONTENT_STREAM_CATEGORY))
    }

    /// The stream holding the events of a workspace.
    pub fn for_workspace(name: &WorkspaceName) -> Self {
        Self(format!("{}:{name}", Self::WORKSPACE_CATEGORY))
    }

    /// The part before the first `:`; the whole name if there is none.
    pub fn category(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(c, _)| c)
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event that has not been committed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event (e.g., "ContentStreamWasForked").
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: EventMetadata,

    /// Id of whatever caused this event, usually the command id.
    pub causation_id: Option<String>,

    /// Id shared by all events of one logical operation.
    pub correlation_id: Option<String>,
}

impl NewEvent {
    /// Creates a new event builder.
    pub fn builder() -> NewEventBuilder {
        NewEventBuilder::default()
    }
}

/// Builder for constructing events to commit.
#[derive(Debug, Default)]
pub struct NewEventBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: EventMetadata,
    causation_id: Option<String>,
    correlation_id: Option<String>,
}

impl NewEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Merges a whole metadata map, overwriting existing keys.
    pub fn metadata_map(mut self, metadata: EventMetadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Sets the causation id.
    pub fn causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Builds the event.
    ///
    /// # Panics
    ///
    /// Panics if `event_type` or `payload` are not set.
    pub fn build(self) -> NewEvent {
        NewEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.expect("event_type is required"),
            payload: self.payload.expect("payload is required"),
            metadata: self.metadata,
            causation_id: self.causation_id,
            correlation_id: self.correlation_id,
        }
    }

    /// Tries to build the event, returning None if required fields are missing.
    pub fn try_build(self) -> Option<NewEvent> {
        Some(NewEvent {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type?,
            payload: self.payload?,
            metadata: self.metadata,
            causation_id: self.causation_id,
            correlation_id: self.correlation_id,
        })
    }
}

/// A committed event together with its position in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The type of the event.
    pub event_type: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: EventMetadata,

    /// Id of whatever caused this event, usually the command id.
    pub causation_id: Option<String>,

    /// Id shared by all events of one logical operation.
    pub correlation_id: Option<String>,

    /// The stream this event was committed to.
    pub stream_name: StreamName,

    /// The version of the stream after this event.
    pub version: Version,

    /// Global position of the event.
    pub sequence_number: SequenceNumber,

    /// When the event was committed.
    pub recorded_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wraps a new event with the position it was committed at.
    pub fn recorded(
        event: NewEvent,
        stream_name: StreamName,
        version: Version,
        sequence_number: SequenceNumber,
    ) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            payload: event.payload,
            metadata: event.metadata,
            causation_id: event.causation_id,
            correlation_id: event.correlation_id,
            stream_name,
            version,
            sequence_number,
            recorded_at: Utc::now(),
        }
    }
}
