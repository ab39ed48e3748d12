//! Core traits (interfaces) of the canvas synchronization core

pub mod graph_adapter;
mod layout;

pub use graph_adapter::{AdapterResult, GraphAdapter};
pub use layout::{GridLayout, LayoutEngine};

#[cfg(test)]
pub use graph_adapter::MockGraphAdapter;
