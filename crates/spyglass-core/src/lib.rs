//! Spyglass Core Library
//!
//! Core types for the Spyglass network-traffic inspector: the message
//! model, the capture store, and the client that streams messages from an
//! instrumented mobile app. This crate is independent of any GUI framework;
//! presentation layers subscribe through the listener traits in [`events`].
//!
//! # Modules
//!
//! - [`protocol`] - message model and wire frame decoding
//! - [`store`] - ordered capture store with change notification
//! - [`client`] - device connection client and frame-reception loop
//! - [`bridge`] - device selector resolution and port forwarding
//! - [`events`] - listener traits and the weak observer registry

pub mod bridge;
pub mod client;
pub mod events;
pub mod protocol;
pub mod store;

// Re-export commonly used types
pub use bridge::{AdbBridge, BridgeResolver, DeviceInfo, DeviceSelector, ResolveError, DEVICE_PORT};
pub use client::{ClientError, ConnectionState, InspectorClient, DEFAULT_CONNECT_TIMEOUT};
pub use events::{ClientListener, ListenerSet, MessageListener};
pub use protocol::{
    decode_frame, BodyFormat, CapturedMessage, ControlError, ControlEvent, DecodeError,
    ServerIdentity, CONTROL_SERVER_IDENTITY,
};
pub use store::MessageStore;
