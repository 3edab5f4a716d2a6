//! Core BLE library for the WISH RING wearable.
//!
//! This crate owns the connection lifecycle of the single active ring
//! connection: discovery, connect with timeouts and cancellation,
//! notification subscription, the data channel over the ring's four
//! characteristics, and bounded auto-reconnect.
//!
//! # Features
//!
//! - **Device discovery**: Scan for rings by name or advertised service
//! - **Connection supervision**: Single-flight connect, watchdog timeouts,
//!   idempotent disconnect, unsolicited-disconnect detection
//! - **Notification subscription**: Best-effort per-characteristic CCCD
//!   writes with serialized, delayed GATT operations
//! - **Data channel**: Wish counts, wish text, completion flag, device-time
//!   sync, reset command, battery reads, decoded button presses
//! - **Auto-reconnect**: Direct attempt, one targeted scan fallback, then
//!   stop — never an unbounded retry loop
//! - **Observability**: Watch channels for state/phase/identity/battery and
//!   a serializable event stream
//!
//! # Platform Differences
//!
//! Device identification varies by platform. On macOS, peripherals are
//! identified by a CoreBluetooth UUID that is stable per machine but is not
//! the MAC address; on Linux and Windows the Bluetooth MAC address
//! (`AA:BB:CC:DD:EE:FF`) is used. The persisted last-known-device record
//! stores whatever identifier the platform reports.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use wishring_core::channel::DataChannel;
//! use wishring_core::scan::{get_adapter, BtleScanner, RingScanner, ScanOptions};
//! use wishring_core::supervisor::ConnectionSupervisor;
//! use wishring_core::transport::BtleTransportFactory;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = get_adapter().await?;
//!     let scanner = BtleScanner::new(adapter.clone());
//!
//!     let mut devices = scanner.scan(ScanOptions::default()).await?;
//!     let Some(ring) = devices.next().await else {
//!         return Ok(());
//!     };
//!     println!("found {ring}");
//!
//!     let factory = Arc::new(BtleTransportFactory::new(adapter));
//!     let supervisor = Arc::new(ConnectionSupervisor::new(factory));
//!     let channel = DataChannel::new(Arc::clone(&supervisor));
//!
//!     wishring_core::session::establish(&supervisor, &channel, &ring.address).await?;
//!
//!     let mut presses = channel.button_presses();
//!     while let Ok(press) = presses.recv().await {
//!         println!("{:?} press", press.press_type);
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod error;
pub mod events;
pub mod mock;
pub mod notify;
pub mod reconnect;
pub mod registry;
pub mod scan;
pub mod session;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use channel::{DataChannel, SyncReport, SyncStep, WishSnapshot};
pub use error::{Error, Result};
pub use events::{DeviceId, DisconnectReason, EventReceiver, RingEvent};
pub use notify::{NotificationEnabler, SubscriptionReport};
pub use reconnect::{AutoReconnectCoordinator, ReconnectPolicy};
pub use registry::DeviceRegistry;
pub use scan::{get_adapter, BtleScanner, DeviceStream, RingScanner, ScanMode, ScanOptions};
pub use store::{JsonFileStore, KnownDeviceStore, MemoryStore};
pub use supervisor::{ConnectionSupervisor, SupervisorConfig, TransportLease};
pub use transport::{
    BtleTransportFactory, CharacteristicInfo, CharacteristicProps, RawNotification,
    RingTransport, TransportFactory,
};

// Re-export the shared types crate for convenience.
pub use wishring_types as types;
pub use wishring_types::{
    BatteryLevel, ButtonPressEvent, ConnectionPhase, ConnectionState, KnownDevice, PressType,
    RingDevice,
};
