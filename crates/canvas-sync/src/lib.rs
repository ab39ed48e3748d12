//! Graph synchronization core for a property-graph canvas
//!
//! The canvas talks to a [`GraphStore`], which holds the authoritative
//! in-memory graph and mirrors every change to the database through the one
//! live [`GraphAdapter`] in the [`AdapterRegistry`].

// Core modules
pub mod config;
pub mod data;
pub mod registry;
pub mod store;
pub mod traits;

// Concrete backends
pub mod adapters;

// Testing utilities - available to integration tests as well
pub mod test_utils;

// Re-export key types for convenient usage
pub use config::{BackendConfig, BackendKind, BoltConfig, StreamingConfig};
pub use data::{
    AdapterError, Connection, Dashboard, DashboardLayout, DashboardSummary, EntityPhase, FailureKind, GraphEdge,
    GraphNode, MutationRejected, NetworkFailure, Position, Projection, Properties,
};
pub use registry::AdapterRegistry;
pub use store::{
    DeleteMode, Dispatch, GraphSnapshot, GraphStore, MergeReport, Notification, PendingSync, QueryMode,
    StoreEvent, SyncOutcome,
};
pub use traits::{AdapterResult, GraphAdapter, GridLayout, LayoutEngine};

#[cfg(feature = "bolt")]
pub use adapters::BoltAdapter;
#[cfg(feature = "streaming")]
pub use adapters::StreamingAdapter;

/// Initialize tracing for the canvas core
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    // A subscriber may already be installed by the embedding application.
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init();
}
