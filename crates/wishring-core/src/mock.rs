//! Mock transport and scanner for tests and examples.
//!
//! [`MockTransport`] scripts a ring without hardware: connect failures,
//! discovery failures, per-characteristic write failures, latency, and
//! injected notifications. [`MockScanner`] plays back scripted scan results.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scan::{DeviceStream, RingScanner, ScanOptions};
use crate::transport::{
    CharacteristicInfo, CharacteristicProps, RawNotification, RingTransport, TransportFactory,
};
use wishring_types::uuid::{BATTERY_CHAR, CCCD, COUNTER_CHAR, RESET_CHAR, RING_SERVICE};
use wishring_types::RingDevice;

fn char_info(uuid: Uuid, props: CharacteristicProps, cccd: bool) -> CharacteristicInfo {
    CharacteristicInfo {
        uuid,
        service_uuid: RING_SERVICE,
        props,
        descriptors: if cccd { vec![CCCD] } else { Vec::new() },
    }
}

/// Scriptable in-memory transport.
pub struct MockTransport {
    address: String,
    name: Option<String>,
    connected: AtomicBool,
    discovered: AtomicBool,
    scripted: Vec<CharacteristicInfo>,

    connect_failures: AtomicU32,
    connect_latency_ms: AtomicU64,
    discovery_failures: AtomicU32,
    subscribe_failures: Mutex<HashSet<Uuid>>,
    cccd_failures: Mutex<HashSet<Uuid>>,
    write_failures: Mutex<HashSet<Uuid>>,
    write_fail_after: AtomicU32,

    connect_attempts: AtomicU32,
    read_values: Mutex<HashMap<Uuid, Vec<u8>>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    descriptor_writes: Mutex<Vec<(Uuid, Uuid, Vec<u8>)>>,
    subscriptions: Mutex<HashSet<Uuid>>,
    notify_senders: Mutex<Vec<mpsc::UnboundedSender<RawNotification>>>,
}

impl MockTransport {
    /// A transport with no characteristics. Script them with
    /// [`with_characteristics`](Self::with_characteristics).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            connected: AtomicBool::new(false),
            discovered: AtomicBool::new(false),
            scripted: Vec::new(),
            connect_failures: AtomicU32::new(0),
            connect_latency_ms: AtomicU64::new(0),
            discovery_failures: AtomicU32::new(0),
            subscribe_failures: Mutex::new(HashSet::new()),
            cccd_failures: Mutex::new(HashSet::new()),
            write_failures: Mutex::new(HashSet::new()),
            write_fail_after: AtomicU32::new(u32::MAX),
            connect_attempts: AtomicU32::new(0),
            read_values: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            descriptor_writes: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(HashSet::new()),
            notify_senders: Mutex::new(Vec::new()),
        }
    }

    /// A transport scripted with the ring's real GATT surface: counter
    /// (read/write/notify), battery (read/notify), reset (write only).
    pub fn wish_ring(address: impl Into<String>) -> Self {
        Self::new(address)
            .with_name("WISH_RING_01")
            .with_characteristics(vec![
                char_info(
                    COUNTER_CHAR,
                    CharacteristicProps {
                        read: true,
                        write: true,
                        notify: true,
                        ..Default::default()
                    },
                    true,
                ),
                char_info(
                    BATTERY_CHAR,
                    CharacteristicProps {
                        read: true,
                        notify: true,
                        ..Default::default()
                    },
                    true,
                ),
                char_info(
                    RESET_CHAR,
                    CharacteristicProps {
                        write: true,
                        ..Default::default()
                    },
                    false,
                ),
            ])
            .with_read_value(BATTERY_CHAR, vec![87])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_characteristics(mut self, characteristics: Vec<CharacteristicInfo>) -> Self {
        self.scripted = characteristics;
        self
    }

    /// Fails the next `count` connect attempts.
    pub fn with_connect_failures(self, count: u32) -> Self {
        self.connect_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Delays connect by the given duration before succeeding or failing.
    pub fn with_connect_latency(self, latency: Duration) -> Self {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
        self
    }

    /// Fails the next `count` service discoveries.
    pub fn with_discovery_failures(self, count: u32) -> Self {
        self.discovery_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Makes the CCCD write for the given characteristic fail.
    pub fn with_cccd_failure(self, characteristic: Uuid) -> Self {
        self.cccd_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic);
        self
    }

    /// Makes subscribing to the given characteristic fail.
    pub fn with_subscribe_failure(self, characteristic: Uuid) -> Self {
        self.subscribe_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic);
        self
    }

    /// Makes every write to the given characteristic fail.
    pub fn with_write_failure(self, characteristic: Uuid) -> Self {
        self.write_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic);
        self
    }

    /// Accepts the first `count` characteristic writes, fails the rest.
    pub fn with_write_budget(self, count: u32) -> Self {
        self.write_fail_after.store(count, Ordering::SeqCst);
        self
    }

    /// Scripts the value returned by reads of the characteristic.
    pub fn with_read_value(self, characteristic: Uuid, value: Vec<u8>) -> Self {
        self.read_values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic, value);
        self
    }

    /// Marks the transport as already connected, for driving components
    /// below the supervisor directly.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Marks services as discovered so `characteristics()` is populated.
    pub fn mark_discovered(&self) {
        self.discovered.store(true, Ordering::SeqCst);
    }

    /// Pushes a notification to every open notification stream.
    pub fn inject_notification(&self, characteristic: Uuid, value: Vec<u8>) {
        let senders = self
            .notify_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        for sender in senders.iter() {
            let _ = sender.send(RawNotification {
                characteristic,
                value: value.clone(),
            });
        }
    }

    /// Drops the link without a local disconnect call, ending every
    /// notification stream the way a real lost connection does.
    pub fn simulate_connection_loss(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.notify_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// How many times connect was attempted.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Whether the link is currently up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether local routing was requested for the characteristic.
    pub fn is_subscribed(&self, characteristic: Uuid) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&characteristic)
    }

    /// All characteristic writes so far, in order.
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// All descriptor writes so far, in order.
    pub fn descriptor_writes(&self) -> Vec<(Uuid, Uuid, Vec<u8>)> {
        self.descriptor_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl RingTransport for MockTransport {
    fn address(&self) -> &str {
        &self.address
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn connect(&self) -> Result<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        let latency = self.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let remaining = self.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::rejected("mock refused connect"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn discover_services(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let remaining = self.discovery_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.discovery_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::discovery_failed("mock discovery failure"));
        }
        self.discovered.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn characteristics(&self) -> Vec<CharacteristicInfo> {
        if self.discovered.load(Ordering::SeqCst) {
            self.scripted.clone()
        } else {
            Vec::new()
        }
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self
            .subscribe_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&characteristic)
        {
            return Err(Error::rejected("mock subscribe failure"));
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(characteristic);
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        if self
            .cccd_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&characteristic)
        {
            return Err(Error::write_failed(characteristic, "mock CCCD failure"));
        }
        self.descriptor_writes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((characteristic, descriptor, value.to_vec()));
        Ok(())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        self.read_values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&characteristic)
            .cloned()
            .ok_or(Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        if self
            .write_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&characteristic)
        {
            return Err(Error::write_failed(characteristic, "mock write failure"));
        }
        let mut writes = self.writes.lock().unwrap_or_else(|e| e.into_inner());
        if writes.len() as u32 >= self.write_fail_after.load(Ordering::SeqCst) {
            return Err(Error::write_failed(characteristic, "mock write budget spent"));
        }
        writes.push((characteristic, data.to_vec()));
        Ok(())
    }

    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|n| (n, rx))
        })
        .boxed())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.notify_senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }
}

/// Factory resolving addresses to pre-registered mock transports.
#[derive(Default)]
pub struct MockTransportFactory {
    transports: Mutex<HashMap<String, Arc<MockTransport>>>,
    open_count: AtomicU32,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport and returns a handle for later inspection.
    pub fn register(&self, transport: MockTransport) -> Arc<MockTransport> {
        let transport = Arc::new(transport);
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(transport.address.clone(), Arc::clone(&transport));
        transport
    }

    /// How many times `open` was called.
    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn open(&self, address: &str) -> Result<Arc<dyn RingTransport>> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(address)
            .cloned()
            .map(|t| t as Arc<dyn RingTransport>)
            .ok_or_else(|| Error::device_not_found(address))
    }
}

/// Scanner that plays back scripted results.
#[derive(Default)]
pub struct MockScanner {
    results: Mutex<Vec<RingDevice>>,
    scan_count: AtomicU32,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the devices every scan will surface, in order.
    pub fn with_results(self, devices: Vec<RingDevice>) -> Self {
        *self.results.lock().unwrap_or_else(|e| e.into_inner()) = devices;
        self
    }

    /// How many scans were started.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RingScanner for MockScanner {
    async fn scan(&self, options: ScanOptions) -> Result<DeviceStream> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        let devices = self
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let (tx, rx) = mpsc::channel(devices.len().max(1));
        for device in devices {
            if let Some(target) = &options.target_address {
                if !device.address.eq_ignore_ascii_case(target) {
                    continue;
                }
            }
            let _ = tx.try_send(device);
        }
        // Dropping tx ends the stream once scripted results are drained.
        Ok(DeviceStream::new(rx, CancellationToken::new()))
    }
}
