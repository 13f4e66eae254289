//! Read models maintained by the subscription engine.

pub mod content_graph;

pub use content_graph::ContentGraphView;
