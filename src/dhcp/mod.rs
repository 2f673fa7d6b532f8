//! Wire codec, lease model, message builder, and per-interface state machine.

mod buffer;

pub mod builder;
pub mod env;
pub mod lease;
pub mod message;
pub mod options;
pub mod state;
pub mod xid;

pub use lease::Lease;
pub use message::DhcpMessage;
pub use options::DhcpMessageKind;
