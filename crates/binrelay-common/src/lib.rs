//! binrelay Common Types and Wire Codec
//!
//! This crate provides the pieces shared by every binrelay component:
//!
//! - **Wire layer**: the [`wire::Message`] view over a single binary RPC
//!   frame, the [`wire::MessageBuffer`] stream accumulator, and the
//!   [`wire::MessageWriter`] used to synthesise exception responses.
//! - **Error taxonomy**: [`RelayError`] and the crate-wide [`Result`] alias.
//! - **Configuration types**: [`config::BackendInfo`] and friends, shared by
//!   the startup YAML file and the admin API bodies.
//! - **Address helpers**: host/port splitting and IPv6 bracketing.
//!
//! The proxy never interprets message payloads; the only fields it touches
//! are the framed flag, the message type, the method name (for exception
//! synthesis) and the 32-bit sequence identifier, which it rewrites in place.

pub mod addr;
pub mod config;
pub mod error;
pub mod wire;

pub use config::{BackendInfo, BreakerConf, ProbeProtocol, ReadinessConf};
pub use error::{RelayError, Result};
