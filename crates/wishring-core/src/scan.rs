//! Device discovery.
//!
//! Scanning runs as a background task that filters advertisements, feeds a
//! [`DeviceRegistry`] for per-session deduplication, and emits each accepted
//! device once through a [`DeviceStream`]. Two modes are supported: general
//! discovery filtered by the ring's advertised name prefixes, and service
//! discovery filtered by the ring's primary service UUID.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central as _, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use wishring_types::uuid::RING_SERVICE;
use wishring_types::RingDevice;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// How advertisements are filtered during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Accept devices whose advertised name matches a known ring prefix.
    #[default]
    General,
    /// Accept devices advertising the ring's primary service UUID.
    Service,
}

/// Options controlling a scan session.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long to scan before completing the stream. Zero means scan until
    /// stopped.
    pub timeout: Duration,
    /// Advertisement filter mode.
    pub mode: ScanMode,
    /// When set, only this address is accepted. Used for targeted
    /// reconnect scans.
    pub target_address: Option<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCAN_TIMEOUT,
            mode: ScanMode::default(),
            target_address: None,
        }
    }
}

impl ScanOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan duration. Zero scans until stopped.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the filter mode.
    pub fn with_mode(mut self, mode: ScanMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restricts the scan to a single address.
    pub fn with_target(mut self, address: impl Into<String>) -> Self {
        self.target_address = Some(address.into());
        self
    }
}

/// Returns the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(Error::RadioUnavailable)
}

/// Decides whether an advertisement passes the scan filter.
///
/// General mode requires a non-empty name, so unnamed advertisements from a
/// device are suppressed until a named one arrives; callers pick rings out
/// of the results via [`RingDevice::is_wish_ring`]. Service mode requires
/// the ring service UUID in the advertisement.
pub(crate) fn accept_advertisement(
    mode: ScanMode,
    target: Option<&str>,
    address: &str,
    name: Option<&str>,
    advertised_services: &[Uuid],
) -> bool {
    if let Some(target) = target {
        if !address.eq_ignore_ascii_case(target) {
            return false;
        }
    }
    match mode {
        ScanMode::General => name.is_some_and(|n| !n.is_empty()),
        ScanMode::Service => advertised_services.contains(&RING_SERVICE),
    }
}

/// One advertisement, decoupled from the backing stack's event types so
/// the scan loop itself runs against any source.
#[derive(Debug, Clone)]
struct Advertisement {
    address: String,
    name: Option<String>,
    services: Vec<Uuid>,
    rssi: i16,
}

/// Core scan loop: filters advertisements, dedups through a registry, and
/// feeds accepted devices to the consumer until the deadline, cancellation,
/// or the source ends. Returns how many distinct devices were seen.
async fn run_scan_loop<S>(
    mut adverts: S,
    options: ScanOptions,
    tx: mpsc::Sender<RingDevice>,
    cancel: CancellationToken,
) -> usize
where
    S: Stream<Item = Advertisement> + Unpin,
{
    let mut registry = DeviceRegistry::new();
    let deadline =
        (!options.timeout.is_zero()).then(|| tokio::time::Instant::now() + options.timeout);

    loop {
        let advert = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending().await,
                }
            } => {
                debug!("scan timeout reached");
                break;
            }
            advert = adverts.next() => match advert {
                Some(advert) => advert,
                None => break,
            },
        };

        if !accept_advertisement(
            options.mode,
            options.target_address.as_deref(),
            &advert.address,
            advert.name.as_deref(),
            &advert.services,
        ) {
            continue;
        }

        let device = RingDevice {
            // Service-mode advertisements can be anonymous; fall back to
            // the address so the record stays displayable.
            name: advert.name.unwrap_or_else(|| advert.address.clone()),
            address: advert.address,
            signal_strength: advert.rssi,
            is_bonded: false,
            is_connectable: true,
        };
        if registry.observe(device.clone()) {
            debug!(address = %device.address, name = %device.name, "device discovered");
            if tx.send(device).await.is_err() {
                break;
            }
        }
    }
    registry.len()
}

/// Stream of devices produced by an in-progress scan.
///
/// Dropping the stream, or calling [`stop`](Self::stop), cancels the
/// underlying scan task. Stopping is idempotent.
pub struct DeviceStream {
    receiver: mpsc::Receiver<RingDevice>,
    cancel: CancellationToken,
}

impl DeviceStream {
    /// Builds a stream from its channel half and cancellation token.
    /// Exposed so test scanners can construct streams without a radio.
    pub fn new(receiver: mpsc::Receiver<RingDevice>, cancel: CancellationToken) -> Self {
        Self { receiver, cancel }
    }

    /// Stops the scan early. The stream completes after draining any
    /// already-emitted devices.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Stream for DeviceStream {
    type Item = RingDevice;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Discovery interface, mockable for tests.
#[async_trait]
pub trait RingScanner: Send + Sync {
    /// Starts a scan and returns the stream of accepted devices.
    ///
    /// Starting the radio can fail (adapter off, permission denied); that
    /// failure is returned here rather than as an empty stream.
    async fn scan(&self, options: ScanOptions) -> Result<DeviceStream>;

    /// Scans until the given address is seen or the timeout elapses.
    async fn find_by_address(&self, address: &str, timeout: Duration) -> Result<Option<RingDevice>> {
        let options = ScanOptions::new()
            .with_timeout(timeout)
            .with_mode(ScanMode::Service)
            .with_target(address);
        let mut stream = self.scan(options).await?;
        let found = stream.next().await;
        stream.stop();
        Ok(found)
    }

    /// Scans until any ring is seen or the timeout elapses.
    async fn find_any(&self, timeout: Duration) -> Result<Option<RingDevice>> {
        let options = ScanOptions::new()
            .with_timeout(timeout)
            .with_mode(ScanMode::Service);
        let mut stream = self.scan(options).await?;
        let found = stream.next().await;
        stream.stop();
        Ok(found)
    }
}

/// Production scanner backed by a `btleplug` adapter.
pub struct BtleScanner {
    adapter: Adapter,
}

impl BtleScanner {
    /// Wraps an adapter obtained from [`get_adapter`].
    pub fn new(adapter: Adapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl RingScanner for BtleScanner {
    #[tracing::instrument(skip(self), fields(mode = ?options.mode, timeout = ?options.timeout))]
    async fn scan(&self, options: ScanOptions) -> Result<DeviceStream> {
        let filter = match options.mode {
            ScanMode::Service => ScanFilter {
                services: vec![RING_SERVICE],
            },
            ScanMode::General => ScanFilter::default(),
        };

        let events = self.adapter.events().await?;
        self.adapter.start_scan(filter).await?;
        info!("scan started");

        let (tx, rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let adapter = self.adapter.clone();

        // Resolve each central event to an advertisement up front so the
        // loop itself never touches the radio.
        let lookup = self.adapter.clone();
        let adverts = events
            .filter_map(move |event| {
                let adapter = lookup.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                        _ => return None,
                    };
                    let peripheral = adapter.peripheral(&id).await.ok()?;
                    let props = peripheral.properties().await.ok().flatten()?;
                    Some(Advertisement {
                        address: id.to_string(),
                        name: props.local_name,
                        services: props.services,
                        rssi: props.rssi.unwrap_or(0),
                    })
                }
            })
            .boxed();

        tokio::spawn(async move {
            let discovered = run_scan_loop(adverts, options, tx, task_cancel).await;
            if let Err(e) = adapter.stop_scan().await {
                warn!(error = %e, "failed to stop scan");
            }
            info!(discovered, "scan finished");
        });

        Ok(DeviceStream::new(rx, cancel))
    }
}
