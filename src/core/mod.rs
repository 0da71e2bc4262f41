//! Core types for the pool server
//!
//! Target arithmetic, the block template store and address prefix decoding.
//! Everything here is synchronous and free of I/O.

pub mod address;
pub mod target;
pub mod template;

pub use template::{BlockTemplate, TemplateStore, NONCE_OFFSET, RESERVE_SIZE};
