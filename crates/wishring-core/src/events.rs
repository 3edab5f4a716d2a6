//! Lifecycle event system.
//!
//! Components broadcast [`RingEvent`]s through an [`EventDispatcher`] so that
//! UI layers and loggers can observe connections, disconnections, button
//! presses, and reconnect progress without polling.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use wishring_types::ButtonPressEvent;

/// Device identifier carried in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Platform address or peripheral UUID.
    pub address: String,
    /// Advertised name if known.
    pub name: Option<String>,
}

impl DeviceId {
    /// Create a device ID from an address alone.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    /// Create a device ID with a name.
    pub fn with_name(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
        }
    }
}

/// Events emitted over the lifetime of a ring connection.
///
/// All events are serializable for logging and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum RingEvent {
    /// A ring was discovered during scanning.
    Discovered { device: DeviceId, rssi: i16 },
    /// Link established and services discovered.
    Connected { device: DeviceId },
    /// Connection torn down.
    Disconnected {
        device: DeviceId,
        reason: DisconnectReason,
    },
    /// The ring reported a button press.
    ButtonPress {
        device: DeviceId,
        press: ButtonPressEvent,
    },
    /// A fresh battery reading arrived.
    Battery { device: DeviceId, level: u8 },
    /// Battery dropped to or below the low threshold.
    BatteryLow { device: DeviceId, level: u8 },
    /// An auto-reconnect sequence started.
    ReconnectStarted { device: DeviceId },
    /// Auto-reconnect brought the session back up.
    ReconnectSucceeded { device: DeviceId },
    /// Auto-reconnect exhausted its attempts.
    ReconnectFailed { device: DeviceId },
    /// Error occurred during device operation.
    Error { device: DeviceId, error: String },
}

/// Reason for disconnection.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Normal disconnection requested by the caller.
    UserRequested,
    /// The link dropped without a local request.
    ConnectionLost,
    /// Connection attempt timed out.
    Timeout,
    /// BLE error occurred.
    BleError(String),
    /// Unknown reason.
    Unknown,
}

/// Sender for ring events.
pub type EventSender = broadcast::Sender<RingEvent>;

/// Receiver for ring events.
pub type EventReceiver = broadcast::Receiver<RingEvent>;

/// Event dispatcher fanning events out to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: RingEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatcher_fans_out_to_all_receivers() {
        let dispatcher = EventDispatcher::new(16);
        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();

        dispatcher.send(RingEvent::Connected {
            device: DeviceId::with_name("AA:BB", "WISH_RING_01"),
        });

        for rx in [&mut a, &mut b] {
            let event = rx.recv().await.unwrap();
            assert!(matches!(event, RingEvent::Connected { .. }));
        }
    }

    #[test]
    fn events_serialize_tagged() {
        let event = RingEvent::Battery {
            device: DeviceId::new("AA:BB"),
            level: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"battery\""));
        assert!(json.contains("\"level\":42"));
    }

    #[test]
    fn send_without_receivers_is_silent() {
        let dispatcher = EventDispatcher::default();
        dispatcher.send(RingEvent::ReconnectFailed {
            device: DeviceId::new("AA:BB"),
        });
        assert_eq!(dispatcher.receiver_count(), 0);
    }
}
