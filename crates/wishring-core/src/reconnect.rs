//! Bounded auto-reconnect.
//!
//! One explicit policy object owns the retry shape: direct connect to the
//! last-known address first, then one targeted scan and one more connect,
//! then stop. There is deliberately no loop here; runaway retry drains the
//! ring's battery and the host's radio.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::DataChannel;
use crate::error::{Error, Result};
use crate::events::{DeviceId, RingEvent};
use crate::scan::RingScanner;
use crate::session;
use crate::store::KnownDeviceStore;
use crate::supervisor::ConnectionSupervisor;
use wishring_types::{ConnectionPhase, KnownDevice};

/// Retry shape of an auto-reconnect sequence.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Bound on the targeted (or general) fallback scan.
    pub scan_timeout: Duration,
    /// Pause after the final failed connect before giving up, so an
    /// immediately retriggered sequence does not hammer the radio.
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(30),
            backoff: Duration::from_secs(5),
        }
    }
}

/// Drives reconnection on app start or after an unsolicited disconnect.
///
/// Only one sequence may run at a time. A manual connect must supersede an
/// in-flight sequence: call [`cancel`](Self::cancel) first, then connect
/// through the supervisor as usual.
pub struct AutoReconnectCoordinator {
    supervisor: Arc<ConnectionSupervisor>,
    channel: Arc<DataChannel>,
    scanner: Arc<dyn RingScanner>,
    store: Arc<dyn KnownDeviceStore>,
    policy: ReconnectPolicy,
    gate: Mutex<()>,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl AutoReconnectCoordinator {
    /// Creates a coordinator with the default policy.
    pub fn new(
        supervisor: Arc<ConnectionSupervisor>,
        channel: Arc<DataChannel>,
        scanner: Arc<dyn RingScanner>,
        store: Arc<dyn KnownDeviceStore>,
    ) -> Self {
        Self::with_policy(supervisor, channel, scanner, store, ReconnectPolicy::default())
    }

    /// Creates a coordinator with an explicit policy.
    pub fn with_policy(
        supervisor: Arc<ConnectionSupervisor>,
        channel: Arc<DataChannel>,
        scanner: Arc<dyn RingScanner>,
        store: Arc<dyn KnownDeviceStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            supervisor,
            channel,
            scanner,
            store,
            policy,
            gate: Mutex::new(()),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    /// Runs one bounded reconnect sequence.
    ///
    /// Returns `Ok(true)` when a session came up, `Ok(false)` when the
    /// sequence exhausted its attempts. Fails fast with
    /// [`Error::ConnectInProgress`] if a sequence is already running.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> Result<bool> {
        let _gate = self.gate.try_lock().map_err(|_| Error::ConnectInProgress)?;

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();

        self.supervisor.set_phase(ConnectionPhase::AutoConnecting);
        let result = self.sequence(&token).await;

        match &result {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                if !self.supervisor.is_connected() {
                    self.supervisor.set_phase(ConnectionPhase::Idle);
                }
            }
        }
        result
    }

    /// Cancels the in-flight sequence, including any connect attempt it has
    /// delegated to the supervisor. Safe to call when nothing is running.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        self.supervisor.cancel_connect();
    }

    async fn sequence(&self, token: &CancellationToken) -> Result<bool> {
        let known = self.store.load().await?;

        let device_id = known
            .as_ref()
            .map(|k| DeviceId::with_name(&k.address, &k.name))
            .unwrap_or_else(|| DeviceId::new("unknown"));
        self.supervisor.dispatcher().send(RingEvent::ReconnectStarted {
            device: device_id.clone(),
        });

        let outcome = match &known {
            Some(known) => self.reconnect_known(known, token).await,
            None => self.connect_first_found(token).await,
        };

        match outcome {
            Ok(true) => {
                self.record_success(known).await;
                self.supervisor
                    .dispatcher()
                    .send(RingEvent::ReconnectSucceeded { device: device_id });
                Ok(true)
            }
            Ok(false) => {
                info!("auto-reconnect exhausted its attempts");
                self.supervisor
                    .dispatcher()
                    .send(RingEvent::ReconnectFailed { device: device_id });
                Ok(false)
            }
            Err(e) => {
                if !matches!(e, Error::Cancelled) {
                    self.supervisor
                        .dispatcher()
                        .send(RingEvent::ReconnectFailed { device: device_id });
                }
                Err(e)
            }
        }
    }

    /// Direct connect first, then one targeted scan and one more connect.
    async fn reconnect_known(&self, known: &KnownDevice, token: &CancellationToken) -> Result<bool> {
        debug!(address = %known.address, "direct reconnect attempt");
        match self.try_establish(&known.address, token).await {
            Ok(()) => return Ok(true),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => debug!(error = %e, "direct attempt failed, falling back to scan"),
        }

        let found = cancellable(
            token,
            self.scanner
                .find_by_address(&known.address, self.policy.scan_timeout),
        )
        .await??;
        let Some(device) = found else {
            info!(address = %known.address, "targeted scan found nothing");
            return Ok(false);
        };

        debug!(address = %device.address, "found by scan, final connect attempt");
        self.supervisor.dispatcher().send(RingEvent::Discovered {
            device: DeviceId::with_name(&device.address, &device.name),
            rssi: device.signal_strength,
        });
        match self.try_establish(&device.address, token).await {
            Ok(()) => Ok(true),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "final attempt failed, backing off and stopping");
                cancellable(token, tokio::time::sleep(self.policy.backoff)).await?;
                Ok(false)
            }
        }
    }

    /// No record yet: take the first compatible device a general scan sees.
    async fn connect_first_found(&self, token: &CancellationToken) -> Result<bool> {
        let found = cancellable(token, self.scanner.find_any(self.policy.scan_timeout)).await??;
        let Some(device) = found else {
            info!("no compatible device in range");
            return Ok(false);
        };

        debug!(address = %device.address, name = %device.name, "connecting to first found");
        self.supervisor.dispatcher().send(RingEvent::Discovered {
            device: DeviceId::with_name(&device.address, &device.name),
            rssi: device.signal_strength,
        });
        match self.try_establish(&device.address, token).await {
            Ok(()) => Ok(true),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "connect to scanned device failed");
                cancellable(token, tokio::time::sleep(self.policy.backoff)).await?;
                Ok(false)
            }
        }
    }

    async fn try_establish(&self, address: &str, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // The supervisor keeps AutoConnecting as the in-flight phase. The
        // bring-up is not select-dropped here: cancellation reaches the
        // in-flight connect through the supervisor's own token, which
        // closes the transport instead of leaking it.
        self.supervisor.set_phase(ConnectionPhase::AutoConnecting);
        session::establish(&self.supervisor, &self.channel, address)
            .await
            .map(|_| ())
    }

    async fn record_success(&self, known: Option<KnownDevice>) {
        let identity = self.supervisor.watch_device().borrow().clone();
        let Some(identity) = identity else {
            return;
        };
        let record = match known {
            Some(mut known) if known.address == identity.address => {
                known.record_connection();
                known.name = identity.name.unwrap_or(known.name);
                known
            }
            _ => KnownDevice::new(
                identity.address.clone(),
                identity.name.unwrap_or(identity.address),
            ),
        };
        if let Err(e) = self.store.save(&record).await {
            warn!(error = %e, "failed to persist device record");
        }
    }
}

async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl std::future::Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        _ = token.cancelled() => Err(Error::Cancelled),
        value = fut => Ok(value),
    }
}
