//! Platform-agnostic types for the WISH RING wearable.
//!
//! This crate provides shared types used by the BLE core
//! (wishring-core) and any front end built on top of it.
//!
//! # Features
//!
//! - Connection state and phase models for the single active connection
//! - Discovered-device and button-press event types
//! - UUID constants for the ring's GATT surface
//! - The wire codec for the counter/battery/reset characteristics

pub mod error;
pub mod types;
pub mod uuid;
pub mod wire;

pub use error::{ParseError, ParseResult};
pub use types::{
    BatteryLevel, ButtonPressEvent, ConnectionPhase, ConnectionState, KnownDevice, PressType,
    RingDevice,
};
