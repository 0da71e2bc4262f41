//! Daemon collaborator interface

pub mod daemon;

pub use daemon::{BlockTemplateRpc, DaemonClient, DaemonRpc};
