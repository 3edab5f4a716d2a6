//! Connection supervisor.
//!
//! Owns the single active transport handle and the authoritative
//! [`ConnectionState`] / [`ConnectionPhase`] pair. All state mutation funnels
//! through this type; every other component observes through watch channels
//! and reaches the transport only via [`ConnectionSupervisor::lease`],
//! which serializes GATT operations and returns [`Error::NotConnected`]
//! once the handle is invalidated.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch, Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{DeviceId, DisconnectReason, EventDispatcher, EventReceiver, RingEvent};
use crate::transport::{RawNotification, RingTransport, TransportFactory};
use wishring_types::{ConnectionPhase, ConnectionState, RingDevice};

/// Timeouts applied by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Watchdog on the transport-level connect step.
    pub connect_timeout: Duration,
    /// Watchdog on service discovery.
    pub discovery_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared with the notification-forwarding task.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    phase_tx: watch::Sender<ConnectionPhase>,
    identity_tx: watch::Sender<Option<DeviceId>>,
    error_tx: watch::Sender<Option<String>>,
    raw_tx: broadcast::Sender<RawNotification>,
    events: EventDispatcher,
    transport: RwLock<Option<Arc<dyn RingTransport>>>,
    // One GATT request per link at a time; leases queue on this.
    op_gate: Arc<Mutex<()>>,
    // Set for the duration of a caller-initiated teardown so the forwarder
    // does not misread the stream ending as a lost connection.
    local_teardown: AtomicBool,
}

impl Shared {
    /// Invalidates the handle and resets observable state. Returns `true`
    /// if this call was the one that removed the transport.
    async fn invalidate(&self) -> bool {
        let had = self.transport.write().await.take().is_some();
        if had {
            self.reset_observables();
        }
        had
    }

    /// Invalidates the handle only while `expected` is still the active
    /// one. The forwarder uses this so a late stream-end from a superseded
    /// connection can never tear down its replacement.
    async fn invalidate_if(&self, expected: &Arc<dyn RingTransport>) -> bool {
        let mut slot = self.transport.write().await;
        let still_active = slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, expected));
        if still_active {
            *slot = None;
            drop(slot);
            self.reset_observables();
        }
        still_active
    }

    fn reset_observables(&self) {
        self.state_tx.send_replace(ConnectionState::Disconnected);
        self.phase_tx.send_replace(ConnectionPhase::Idle);
        self.identity_tx.send_replace(None);
    }
}

/// Exclusive use of the active transport for one GATT operation.
///
/// A BLE link rejects or drops overlapping requests, so every read, write,
/// and descriptor write goes through a lease and waits its turn. Acquire
/// one per operation and drop it promptly; never hold a lease across a
/// disconnect boundary.
pub struct TransportLease {
    transport: Arc<dyn RingTransport>,
    _slot: OwnedMutexGuard<()>,
}

impl std::ops::Deref for TransportLease {
    type Target = dyn RingTransport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}

/// Manages the lifecycle of the single allowed active connection.
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
    factory: Arc<dyn TransportFactory>,
    config: SupervisorConfig,
    // Single-flight gate: held for the whole duration of a connect attempt.
    connect_gate: Mutex<()>,
    attempt_cancel: std::sync::Mutex<Option<CancellationToken>>,
    forwarder: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor with default timeouts.
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self::with_config(factory, SupervisorConfig::default())
    }

    /// Creates a supervisor with explicit timeouts.
    pub fn with_config(factory: Arc<dyn TransportFactory>, config: SupervisorConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (phase_tx, _) = watch::channel(ConnectionPhase::Idle);
        let (identity_tx, _) = watch::channel(None);
        let (error_tx, _) = watch::channel(None);
        let (raw_tx, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                state_tx,
                phase_tx,
                identity_tx,
                error_tx,
                raw_tx,
                events: EventDispatcher::default(),
                transport: RwLock::new(None),
                op_gate: Arc::new(Mutex::new(())),
                local_teardown: AtomicBool::new(false),
            }),
            factory,
            config,
            connect_gate: Mutex::new(()),
            attempt_cancel: std::sync::Mutex::new(None),
            forwarder: std::sync::Mutex::new(None),
        }
    }

    /// Connects to the given address and discovers its services.
    ///
    /// Single-flight: a second call while an attempt is outstanding fails
    /// fast with [`Error::ConnectInProgress`] rather than interleaving. An
    /// existing connection is torn down before the new attempt starts.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self, address: &str) -> Result<()> {
        let _gate = self
            .connect_gate
            .try_lock()
            .map_err(|_| Error::ConnectInProgress)?;

        if self.is_connected() {
            self.teardown(DisconnectReason::UserRequested).await;
        }

        // AutoConnecting is set by the reconnect coordinator before it
        // calls in; everything else is a manual connect.
        let auto = self.phase() == ConnectionPhase::AutoConnecting;
        if !auto {
            self.set_phase(ConnectionPhase::Connecting);
        }
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        self.shared.error_tx.send_replace(None);

        let cancel = CancellationToken::new();
        *self.attempt_cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        let result = self.attempt(address, &cancel).await;
        *self.attempt_cancel.lock().unwrap_or_else(|e| e.into_inner()) = None;

        if let Err(e) = &result {
            // Transient transport failures and cancellation land back on
            // Disconnected; fatal ones (radio gone) surface as Error.
            let fatal = !matches!(e, Error::Cancelled) && !e.is_retryable();
            self.shared.state_tx.send_replace(if fatal {
                ConnectionState::Error
            } else {
                ConnectionState::Disconnected
            });
            if !auto {
                self.set_phase(ConnectionPhase::Idle);
            }
            if !matches!(e, Error::Cancelled) {
                self.shared.error_tx.send_replace(Some(e.to_string()));
                self.shared.events.send(RingEvent::Error {
                    device: DeviceId::new(address),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn attempt(&self, address: &str, cancel: &CancellationToken) -> Result<()> {
        let transport = self.factory.open(address).await?;

        let bring_up = async {
            run_step(
                cancel,
                "connect",
                self.config.connect_timeout,
                transport.connect(),
            )
            .await?;
            debug!(address, "transport connected, discovering services");
            run_step(
                cancel,
                "service discovery",
                self.config.discovery_timeout,
                transport.discover_services(),
            )
            .await?;
            transport.notifications().await
        };

        let stream = match bring_up.await {
            Ok(stream) => stream,
            Err(e) => {
                // Failure or abandonment before Connected: close the link
                // so the handle never leaks.
                let _ = transport.disconnect().await;
                return Err(e);
            }
        };

        let device = match transport.name() {
            Some(name) => DeviceId::with_name(address, name),
            None => DeviceId::new(address),
        };
        *self.shared.transport.write().await = Some(Arc::clone(&transport));
        self.shared.state_tx.send_replace(ConnectionState::Connected);
        self.set_phase(ConnectionPhase::Connected);
        self.shared.identity_tx.send_replace(Some(device.clone()));
        info!(address, name = ?device.name, "connected");
        self.shared.events.send(RingEvent::Connected {
            device: device.clone(),
        });

        // Forward raw notifications until the stream ends. An end without a
        // local teardown in progress is an unsolicited disconnect. The
        // forwarder only ever invalidates its own link: a stream-end
        // delivered late, after a superseding connect, must not touch the
        // replacement transport.
        let shared = Arc::clone(&self.shared);
        let link = Arc::clone(&transport);
        let handle = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(notification) = stream.next().await {
                let _ = shared.raw_tx.send(notification);
            }
            if !shared.local_teardown.load(Ordering::SeqCst) && shared.invalidate_if(&link).await
            {
                warn!(address = %device.address, "connection lost");
                shared.events.send(RingEvent::Disconnected {
                    device,
                    reason: DisconnectReason::ConnectionLost,
                });
            }
        });
        let old = self
            .forwarder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(old) = old {
            old.abort();
        }
        Ok(())
    }

    /// Abandons the in-flight connect attempt, if any. The attempt resolves
    /// with [`Error::Cancelled`] and the transport is closed.
    pub fn cancel_connect(&self) {
        if let Some(token) = self
            .attempt_cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            token.cancel();
        }
    }

    /// Tears down the active connection, or abandons the in-flight connect
    /// attempt if one has not completed yet.
    ///
    /// Idempotent: calling while already disconnected produces no state
    /// change and no error.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        self.cancel_connect();
        self.teardown(DisconnectReason::UserRequested).await;
        Ok(())
    }

    async fn teardown(&self, reason: DisconnectReason) {
        let transport = self.shared.transport.read().await.clone();
        let Some(transport) = transport else {
            return;
        };

        self.shared.local_teardown.store(true, Ordering::SeqCst);
        self.shared.state_tx.send_replace(ConnectionState::Disconnecting);
        if let Err(e) = transport.disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }
        // Stop the forwarder before releasing the teardown flag so a late
        // stream-end from this link can never race the next attempt.
        if let Some(handle) = self
            .forwarder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        let device = match transport.name() {
            Some(name) => DeviceId::with_name(transport.address(), name),
            None => DeviceId::new(transport.address()),
        };
        if self.shared.invalidate().await {
            info!(address = %device.address, "disconnected");
            self.shared.events.send(RingEvent::Disconnected { device, reason });
        }
        self.shared.local_teardown.store(false, Ordering::SeqCst);
    }

    /// Current coarse state. Pure read.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase_tx.borrow()
    }

    /// Whether the transport is usable right now.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Observable coarse state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Observable lifecycle phase.
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase_tx.subscribe()
    }

    /// Observable identity of the connected device.
    pub fn watch_device(&self) -> watch::Receiver<Option<DeviceId>> {
        self.shared.identity_tx.subscribe()
    }

    /// Observable description of the last connect failure. Cleared at the
    /// start of each attempt; never set by cancellation.
    pub fn watch_last_error(&self) -> watch::Receiver<Option<String>> {
        self.shared.error_tx.subscribe()
    }

    /// Acquires exclusive use of the active transport for one operation.
    ///
    /// Waits for any in-flight GATT operation to finish first, then fails
    /// with [`Error::NotConnected`] if the handle was invalidated in the
    /// meantime. Never cache a lease across await points that may span a
    /// disconnect; re-acquire per operation.
    pub async fn lease(&self) -> Result<TransportLease> {
        let slot = Arc::clone(&self.shared.op_gate).lock_owned().await;
        let transport = self
            .shared
            .transport
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)?;
        Ok(TransportLease {
            transport,
            _slot: slot,
        })
    }

    /// Subscribes to raw notifications from the active connection.
    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawNotification> {
        self.shared.raw_tx.subscribe()
    }

    /// Subscribes to lifecycle events.
    pub fn events(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.events
    }

    pub(crate) fn set_phase(&self, phase: ConnectionPhase) {
        self.shared.phase_tx.send_replace(phase);
    }

    /// Marks discovery as running for observers. No-op once connected.
    pub fn scan_started(&self) {
        if !self.phase().is_connecting() && !self.is_connected() {
            self.set_phase(ConnectionPhase::Scanning);
        }
    }

    /// Returns the phase to idle after a scan that led nowhere.
    pub fn scan_finished(&self) {
        if self.phase() == ConnectionPhase::Scanning {
            self.set_phase(ConnectionPhase::Idle);
        }
    }

    /// Records that the user picked a device from scan results.
    pub fn device_selected(&self, device: &RingDevice) {
        debug!(address = %device.address, name = %device.name, "device selected");
        self.set_phase(ConnectionPhase::DeviceSelected);
    }
}

/// Runs one cancellable, deadline-bounded bring-up step.
async fn run_step<T>(
    cancel: &CancellationToken,
    operation: &str,
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = tokio::time::timeout(deadline, fut) => match result {
            Ok(inner) => inner,
            Err(_) => Err(Error::timeout(operation, deadline)),
        },
    }
}
