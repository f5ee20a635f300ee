//! Roomcast wire layer: invocation envelopes and peer sessions.
//!
//! ## Architecture
//!
//! - **InvocationMessage**: the `RPC`-tagged JSON envelope carried between peers
//! - **Session**: the contract the router sends through (role, roster, send primitives)
//! - **SessionRegistry**: the roster of live connections owned by a session
//! - **TcpSession**: length-framed TCP transport with an HMAC handshake
//! - **MemoryNetwork**: in-process transport with the same contract

pub mod error;
pub mod memory;
pub mod message;
pub mod peer;
pub mod registry;
pub mod session;

pub use error::WireError;
pub use memory::{Delivery, MemoryNetwork, MemorySession};
pub use message::{decode_invocation, encode_invocation, InvocationMessage, RPC_TAG};
pub use peer::TcpSession;
pub use registry::{Connection, SessionRegistry};
pub use session::{Session, SessionEvent};
