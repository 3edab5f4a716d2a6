//! Transport abstraction over a connected BLE peripheral.
//!
//! [`RingTransport`] is the seam between the connection lifecycle machinery
//! and the Bluetooth stack. Production code uses [`BtleTransport`] backed by
//! `btleplug`; tests substitute [`crate::mock::MockTransport`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central as _, CharPropFlags, Characteristic, Peripheral as _, PeripheralProperties, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use wishring_types::uuid::CCCD;

/// Capability flags of a discovered characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

/// A discovered characteristic, decoupled from the backing stack's types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service this characteristic belongs to.
    pub service_uuid: Uuid,
    /// Capability flags.
    pub props: CharacteristicProps,
    /// UUIDs of descriptors attached to this characteristic.
    pub descriptors: Vec<Uuid>,
}

impl CharacteristicInfo {
    /// Returns `true` if the device can push values through this
    /// characteristic, via either notifications or indications.
    pub fn can_push(&self) -> bool {
        self.props.notify || self.props.indicate
    }

    /// Returns `true` if the characteristic carries a client configuration
    /// descriptor, which is required to actually enable pushes.
    pub fn has_cccd(&self) -> bool {
        self.descriptors.contains(&CCCD)
    }
}

/// A raw value pushed by the device before any decoding.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Source characteristic UUID.
    pub characteristic: Uuid,
    /// Raw payload bytes.
    pub value: Vec<u8>,
}

/// Operations the lifecycle machinery needs from a peripheral.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self`.
#[async_trait]
pub trait RingTransport: Send + Sync {
    /// Stable identifier of the peripheral (platform address or UUID).
    fn address(&self) -> &str;

    /// Advertised name, if one was seen.
    fn name(&self) -> Option<&str>;

    /// Establishes the link. No timeout is applied here; callers wrap this
    /// in their own watchdog.
    async fn connect(&self) -> Result<()>;

    /// Populates the GATT table. Must be called after [`connect`](Self::connect)
    /// and before any characteristic access.
    async fn discover_services(&self) -> Result<()>;

    /// Returns the characteristics discovered so far. Empty until
    /// [`discover_services`](Self::discover_services) succeeds.
    fn characteristics(&self) -> Vec<CharacteristicInfo>;

    /// Routes incoming notifications for the characteristic to the local
    /// notification stream. Idempotent if already routed.
    async fn subscribe(&self, characteristic: Uuid) -> Result<()>;

    /// Writes a value to a descriptor of the given characteristic.
    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Reads the current value of a characteristic.
    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Writes a value to a characteristic with response.
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    /// Returns the stream of raw notifications for this connection. The
    /// stream terminates when the link drops.
    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>>;

    /// Tears the link down. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens transports by peripheral address.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Resolves the address to a peripheral known to the adapter and wraps
    /// it in a transport. Fails with [`Error::DeviceNotFound`] when the
    /// adapter has never seen the address.
    async fn open(&self, address: &str) -> Result<Arc<dyn RingTransport>>;
}

/// Production transport backed by a `btleplug` peripheral.
pub struct BtleTransport {
    peripheral: Peripheral,
    address: String,
    name: Option<String>,
    // Rebuilt after each service discovery; keyed by characteristic UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BtleTransport {
    fn new(peripheral: Peripheral, properties: Option<PeripheralProperties>) -> Self {
        let address = peripheral.id().to_string();
        let name = properties.and_then(|p| p.local_name);
        Self {
            peripheral,
            address,
            name,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    async fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or(Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl RingTransport for BtleTransport {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await.map_err(Error::rejected)
    }

    async fn discover_services(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::discovery_failed)?;
        let mut cache = self.characteristics.write().await;
        cache.clear();
        for ch in self.peripheral.characteristics() {
            cache.insert(ch.uuid, ch);
        }
        debug!(address = %self.address, characteristics = cache.len(), "services discovered");
        Ok(())
    }

    fn characteristics(&self) -> Vec<CharacteristicInfo> {
        // try_read is fine here: the cache is only written during discovery,
        // and callers query it strictly after discovery completes.
        let Ok(cache) = self.characteristics.try_read() else {
            return Vec::new();
        };
        cache
            .values()
            .map(|ch| CharacteristicInfo {
                uuid: ch.uuid,
                service_uuid: ch.service_uuid,
                props: CharacteristicProps {
                    read: ch.properties.contains(CharPropFlags::READ),
                    write: ch.properties.contains(CharPropFlags::WRITE),
                    write_without_response: ch
                        .properties
                        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                    notify: ch.properties.contains(CharPropFlags::NOTIFY),
                    indicate: ch.properties.contains(CharPropFlags::INDICATE),
                },
                descriptors: ch.descriptors.iter().map(|d| d.uuid).collect(),
            })
            .collect()
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        let ch = self.characteristic(characteristic).await?;
        self.peripheral.subscribe(&ch).await.map_err(Error::from)
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let ch = self.characteristic(characteristic).await?;
        let desc = ch
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or(Error::DescriptorNotFound {
                characteristic: characteristic.to_string(),
            })?;
        self.peripheral
            .write_descriptor(&desc, value)
            .await
            .map_err(|e| Error::write_failed(characteristic, e))
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let ch = self.characteristic(characteristic).await?;
        self.peripheral.read(&ch).await.map_err(Error::from)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let ch = self.characteristic(characteristic).await?;
        self.peripheral
            .write(&ch, data, WriteType::WithResponse)
            .await
            .map_err(|e| Error::write_failed(characteristic, e))
    }

    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>> {
        let stream = self.peripheral.notifications().await?;
        Ok(stream
            .map(|n| RawNotification {
                characteristic: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.disconnect().await {
            warn!(address = %self.address, error = %e, "disconnect reported an error");
        }
        Ok(())
    }
}

/// Factory that resolves addresses against a `btleplug` adapter.
pub struct BtleTransportFactory {
    adapter: Adapter,
}

impl BtleTransportFactory {
    /// Wraps an adapter obtained from [`crate::scan::get_adapter`].
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl TransportFactory for BtleTransportFactory {
    async fn open(&self, address: &str) -> Result<Arc<dyn RingTransport>> {
        let peripherals = self.adapter.peripherals().await?;
        for peripheral in peripherals {
            if peripheral.id().to_string().eq_ignore_ascii_case(address) {
                let props = peripheral.properties().await.ok().flatten();
                return Ok(Arc::new(BtleTransport::new(peripheral, props)));
            }
        }
        Err(Error::device_not_found(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wishring_types::uuid::{COUNTER_CHAR, RING_SERVICE};

    fn info(notify: bool, cccd: bool) -> CharacteristicInfo {
        CharacteristicInfo {
            uuid: COUNTER_CHAR,
            service_uuid: RING_SERVICE,
            props: CharacteristicProps {
                notify,
                ..Default::default()
            },
            descriptors: if cccd { vec![CCCD] } else { Vec::new() },
        }
    }

    #[test]
    fn can_push_requires_notify_or_indicate() {
        assert!(info(true, true).can_push());
        assert!(!info(false, true).can_push());

        let indicate_only = CharacteristicInfo {
            props: CharacteristicProps {
                indicate: true,
                ..Default::default()
            },
            ..info(false, false)
        };
        assert!(indicate_only.can_push());
    }

    #[test]
    fn cccd_detection() {
        assert!(info(true, true).has_cccd());
        assert!(!info(true, false).has_cccd());
    }
}
