//! Infrastructure layer: event store, repositories, command queue, projection queries.

pub mod commands;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod repository;

pub use config::QueueConfig;
pub use repository::{Repository, RepositoryError};

#[cfg(test)]
mod test_support;
