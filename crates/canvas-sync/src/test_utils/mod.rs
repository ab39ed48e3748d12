//! Test doubles shared by unit and integration tests

pub mod fake_adapter;

pub use fake_adapter::{FakeAdapter, RecordedCall};
