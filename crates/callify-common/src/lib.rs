//! Common types shared across the Callify signaling stack.
//!
//! This crate provides:
//! - JSON envelope decoding and encoding ([`envelope`])
//! - Chat and room record types plus protocol constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod types;

pub use envelope::{ClientEvent, ProtocolError, ServerEvent};
pub use types::ChatMessage;
