//! Core types shared by the roomcast session layer.
//!
//! This crate defines peer identity, session roles, disconnect reasons,
//! configuration and the top-level error type. It contains no networking.

pub mod config;
pub mod disconnect;
pub mod error;
pub mod peer;

pub use config::{CollisionPolicy, RoomcastConfig, RpcConfig, SessionConfig};
pub use disconnect::DisconnectReason;
pub use error::{RoomcastError, RoomcastResult};
pub use peer::{PeerId, Role};
