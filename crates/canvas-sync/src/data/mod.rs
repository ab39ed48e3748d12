//! Core data structures for the canvas synchronization core

pub mod dashboard;
pub mod errors;
pub mod graph;
pub mod identifiers;

// Re-export all common types
pub use dashboard::{Dashboard, DashboardLayout, DashboardSummary, EdgeLayout, NodeLayout, DASHBOARD_LABEL};
pub use errors::{AdapterError, FailureKind, MutationRejected, NetworkFailure};
pub use graph::{
    display_label, Connection, CreatedNode, EdgeData, EntityPhase, GraphEdge, GraphNode, NodeData, Position,
    Projection, Properties, Row, APP_ID_PROPERTY, DEFAULT_NODE_KIND, DISPLAY_PROPERTY,
    DRAFT_NODE_KIND,
};
