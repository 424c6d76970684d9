//! binrelay Dispatch Pipeline
//!
//! This crate contains everything between a downstream client socket and the
//! pooled backend servers:
//!
//! 1. **Client demultiplexer** ([`client`]): accepts framed requests,
//!    allocates a proxy-wide sequence id per request, rewrites it in place
//!    and remembers the original so the response can be restored.
//! 2. **Round-robin balancer** ([`balancer`]): picks a backend via a shared
//!    atomic cursor and retries across the pool on attempt-scoped failures.
//! 3. **Backend connection** ([`backend`]): one upstream TCP socket per
//!    backend with a bounded send queue, a pending-reply registry keyed by
//!    sequence id, readiness probing before the first dial and automatic
//!    reconnect afterwards.
//! 4. **Control plane**: the DNS [`resolver`] feeding dynamic backend sets,
//!    the optional circuit [`breaker`] wrapper, and the admin/metrics HTTP
//!    surface ([`admin`]).
//!
//! # Ordering
//!
//! The proxy preserves no ordering between the requests multiplexed on one
//! client connection: responses are emitted in whatever order backends
//! answer. Callers correlate by sequence id.

pub mod admin;
pub mod backend;
pub mod balancer;
pub mod breaker;
pub mod client;
pub mod pending;
pub mod pool;
pub mod proxy;
pub mod readiness;
pub mod resolver;
pub mod seq_id;

pub use admin::{AdminServer, MetricsServer};
pub use backend::{Backend, Endpoint};
pub use balancer::RoundRobin;
pub use breaker::CircuitBreaker;
pub use pool::BackendPool;
pub use proxy::{BackendStatus, Proxy, ProxyRegistry};
pub use readiness::Readiness;
pub use resolver::Resolver;
