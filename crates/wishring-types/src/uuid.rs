//! Bluetooth UUIDs for the WISH RING device.
//!
//! This module contains all the UUIDs needed to communicate with the ring
//! over Bluetooth Low Energy. The ring exposes a single primary service
//! with three vendor characteristics.

use uuid::{Uuid, uuid};

// --- WISH RING Service UUIDs ---

/// Primary WISH RING service, advertised and used as a scan filter.
pub const RING_SERVICE: Uuid = uuid!("0000fff0-0000-1000-8000-00805f9b34fb");

// --- WISH RING Characteristic UUIDs ---

/// Counter characteristic (read/write/notify).
///
/// Outbound: 4-byte big-endian counts, truncated UTF-8 text, completion
/// flag, device-time sync. Inbound notifications carry a single
/// press-count byte.
pub const COUNTER_CHAR: Uuid = uuid!("0000fff1-0000-1000-8000-00805f9b34fb");

/// Battery characteristic (read/notify). One byte, 0-100 percent.
pub const BATTERY_CHAR: Uuid = uuid!("0000fff2-0000-1000-8000-00805f9b34fb");

/// Reset characteristic (write). Single-byte `0xFF` command.
pub const RESET_CHAR: Uuid = uuid!("0000fff3-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Descriptor UUIDs ---

/// Client Characteristic Configuration Descriptor, written per subscribed
/// characteristic to enable notify/indicate delivery.
pub const CCCD: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value enabling notification delivery.
pub const ENABLE_NOTIFICATION: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling indication delivery.
pub const ENABLE_INDICATION: [u8; 2] = [0x02, 0x00];
