//! Session gateway: WebSocket transport and wire protocol

pub mod handler;
pub mod protocol;
pub mod registry;

pub use registry::ConnectionRegistry;
