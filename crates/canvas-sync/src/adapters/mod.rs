//! Adapters implementation for the supported graph backends

pub(crate) mod cypher;

#[cfg(feature = "bolt")]
pub mod bolt;
#[cfg(feature = "streaming")]
pub mod streaming;

// Re-export adapters for easier import
#[cfg(feature = "bolt")]
pub use bolt::BoltAdapter;
#[cfg(feature = "streaming")]
pub use streaming::StreamingAdapter;
