//! Wire layer: message framing, field access and synthesis.
//!
//! Messages are opaque byte buffers; the proxy only reads the framed flag,
//! the message type, the method name and the sequence identifier, and only
//! ever rewrites the sequence identifier (in place, never reallocating).

mod builder;
mod message;

pub use builder::{build_internal_error, FieldType, MessageWriter};
pub use message::{Message, MessageBuffer, MessageType};
