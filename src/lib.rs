//! # CryptoNote Pool
//!
//! A mining pool server for CryptoNote networks. Miners connect over
//! line-delimited JSON-RPC (plain TCP or TLS), receive jobs cut from the
//! daemon's block template, and submit shares that are verified, credited
//! and, when they meet network difficulty, assembled into blocks and
//! submitted upstream.
//!
//! ## Architecture
//!
//! - [`rpc`] talks JSON-RPC to the coin daemon
//! - [`core`] holds templates, difficulty/target math and address checks
//! - [`pool`] owns sessions, vardiff, trust sampling, banning and the
//!   share pipeline
//! - [`net`] frames connections and speaks the miner-facing protocol

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications)]
#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod net;
pub mod pool;
pub mod pow;
pub mod rpc;

pub use crate::error::{Error, Result};
pub use config::{Args, Config};
pub use pool::PoolServer;
pub use rpc::{DaemonClient, DaemonRpc};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
