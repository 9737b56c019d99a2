//! Builders assembling runtimes from configuration.

pub mod runtime_builder;

pub use runtime_builder::{Runtime, RuntimeBuilder};
