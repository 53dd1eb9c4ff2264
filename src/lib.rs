//! agentrt - a runtime for driving long-running AI coding agents inside
//! ephemeral remote sandboxes.
//!
//! Layered as domain (pure models and ports) → application (session, swarm,
//! pipeline orchestration) → adapters (sandbox providers, checkpoint
//! storage) → infrastructure (config, logging, the SQLite connection pool).

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::errors::{RuntimeError, RuntimeResult, StorageError};
