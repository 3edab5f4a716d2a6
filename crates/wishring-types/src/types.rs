//! Core types for the WISH RING connection model.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use time::OffsetDateTime;

/// Device-name prefixes the ring firmware is known to advertise under.
const RING_NAME_PREFIXES: [&str; 3] = ["WISH_RING", "WishRing", "MRD"];

/// A peripheral discovered during a scan pass.
///
/// Created when an advertisement passes the scanner's acceptance filter.
/// A later advertisement from the same address within the same scan
/// session supersedes (never merges with) the earlier value, but only the
/// first is emitted to consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RingDevice {
    /// Stable hardware identifier, unique key within a scan session.
    pub address: String,
    /// Human-readable name; anonymous devices are filtered out upstream.
    pub name: String,
    /// RSSI in dBm; more negative means weaker. Display/tie-break only.
    pub signal_strength: i16,
    /// Whether the platform reports an existing bond with this device.
    pub is_bonded: bool,
    /// Whether the advertisement is connectable.
    pub is_connectable: bool,
}

impl RingDevice {
    /// Check whether the advertised name matches a known ring prefix.
    ///
    /// The general scan emits every named device so the user can pick one;
    /// this flag lets callers highlight the ones that look like a ring.
    ///
    /// # Examples
    ///
    /// ```
    /// use wishring_types::RingDevice;
    ///
    /// assert!(RingDevice::name_matches_ring("WISH_RING H13"));
    /// assert!(RingDevice::name_matches_ring("MRD-2201"));
    /// assert!(!RingDevice::name_matches_ring("Some Headphones"));
    /// ```
    #[must_use]
    pub fn name_matches_ring(name: &str) -> bool {
        // Compare on bytes: advertised names are arbitrary UTF-8, so a
        // prefix length need not land on a char boundary.
        RING_NAME_PREFIXES.iter().any(|prefix| {
            name.len() >= prefix.len()
                && name.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
        })
    }

    /// Whether this device's name matches a known ring prefix.
    #[must_use]
    pub fn is_wish_ring(&self) -> bool {
        Self::name_matches_ring(&self.name)
    }
}

impl fmt::Display for RingDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {} dBm",
            self.name, self.address, self.signal_strength
        )
    }
}

/// Coarse transport status of the single allowed active connection.
///
/// Exactly one value is authoritative at any time; it is owned and mutated
/// exclusively by the connection supervisor and observed by everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionState {
    /// No active connection.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Transport is open and services have been discovered.
    Connected,
    /// A caller-initiated teardown is in progress.
    Disconnecting,
    /// The last attempt ended in an unrecoverable error.
    Error,
}

impl ConnectionState {
    /// Whether the transport is usable.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Finer-grained lifecycle overlay used by front ends and driving logic.
///
/// Progresses roughly linearly, re-entrant from failure back to `Idle`.
/// `AutoConnecting` is a parallel branch entered from `Idle` when the
/// auto-reconnect coordinator runs instead of a user-driven flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConnectionPhase {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Device discovery is running.
    Scanning,
    /// A device was picked from scan results, connection pending.
    DeviceSelected,
    /// Manual connect attempt in flight.
    Connecting,
    /// Automatic reconnect attempt in flight.
    AutoConnecting,
    /// Transport connected, service discovery done.
    Connected,
    /// Enabling notification subscriptions.
    Initializing,
    /// Reading initial device state (battery).
    ReadingSettings,
    /// Writing the device-time sync.
    WritingTime,
    /// Bring-up complete; button events can flow.
    Ready,
}

impl ConnectionPhase {
    /// Whether any connection work is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self, ConnectionPhase::Idle)
    }

    /// Whether a connect attempt (manual or automatic) is in flight.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionPhase::Connecting | ConnectionPhase::AutoConnecting
        )
    }
}

/// How a button press was classified from the raw press-count byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PressType {
    /// One press.
    Single,
    /// Two presses.
    Double,
    /// Three presses.
    Triple,
    /// Any other raw value; the firmware reports long holds this way.
    Long,
}

impl PressType {
    /// Classify a raw press-count byte.
    ///
    /// Values 1/2/3 map to single/double/triple; everything else is a
    /// long press. The protocol is a lossy single byte with no sequence
    /// numbers, so there is nothing more to recover here.
    #[must_use]
    pub fn from_count(count: u8) -> Self {
        match count {
            1 => PressType::Single,
            2 => PressType::Double,
            3 => PressType::Triple,
            _ => PressType::Long,
        }
    }
}

/// Domain event decoded from an inbound counter-characteristic notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ButtonPressEvent {
    /// When the notification was decoded (capture time, not device time).
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    /// Raw press-count byte as received.
    pub press_count: u8,
    /// Classification derived from `press_count`.
    pub press_type: PressType,
}

impl ButtonPressEvent {
    /// Build an event from a raw press-count byte, stamped with now.
    #[must_use]
    pub fn from_count(count: u8) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            press_count: count,
            press_type: PressType::from_count(count),
        }
    }
}

/// Battery percentage threshold below which the ring counts as low.
pub const LOW_BATTERY_THRESHOLD: u8 = 15;

/// Battery percentage threshold below which the ring counts as critical.
pub const CRITICAL_BATTERY_THRESHOLD: u8 = 5;

/// Last known battery percentage, clamped into 0-100 on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryLevel(u8);

impl BatteryLevel {
    /// Clamp a raw percentage into range. The device occasionally reports
    /// out-of-range values, which are pinned rather than rejected.
    #[must_use]
    pub fn new(percent: u8) -> Self {
        Self(percent.min(100))
    }

    /// The percentage, guaranteed 0-100.
    #[must_use]
    pub fn percent(&self) -> u8 {
        self.0
    }

    /// Whether the level is at or below the low-battery threshold.
    #[must_use]
    pub fn is_low(&self) -> bool {
        self.0 <= LOW_BATTERY_THRESHOLD
    }

    /// Whether the level is at or below the critical threshold.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.0 <= CRITICAL_BATTERY_THRESHOLD
    }
}

impl fmt::Display for BatteryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Persisted record of the last successfully connected device, used by the
/// auto-reconnect coordinator to skip scanning on the next attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KnownDevice {
    /// Hardware address of the device.
    pub address: String,
    /// Name at the time of the last connect.
    pub name: String,
    /// Unix epoch milliseconds of the last successful connect.
    pub last_connected_ms: i64,
    /// How many times this device has been connected to.
    pub connection_count: u32,
}

impl KnownDevice {
    /// Record for a first successful connect.
    #[must_use]
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
            last_connected_ms: now_epoch_ms(),
            connection_count: 1,
        }
    }

    /// Update the record for another successful connect to the same device.
    pub fn record_connection(&mut self) {
        self.last_connected_ms = now_epoch_ms();
        self.connection_count = self.connection_count.saturating_add(1);
    }
}

fn now_epoch_ms() -> i64 {
    let now = OffsetDateTime::now_utc();
    (now.unix_timestamp_nanos() / 1_000_000) as i64
}
