//! Dockhand: orchestrator-side image reconciliation and container monitoring.
//!
//! - [`catalog`]: the remote control-plane API, behind the [`catalog::RemoteCatalog`] trait
//! - [`orchestrator`]: image reconciler, monitor registry, container monitors and
//!   lifecycle manager
//! - [`store`]: collaborator traits for image and application persistence
//! - [`config`]: environment-driven configuration

pub mod catalog;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod store;
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
