//! Data channel over the ring's GATT surface.
//!
//! Outbound writes (counts, wish text, completion flag, time sync, reset)
//! and inbound decoding (button presses, battery levels) both live here.
//! A transport lease is acquired from the supervisor per operation and
//! never cached: it becomes invalid on disconnect, and the lease is what
//! keeps concurrent callers from issuing overlapping GATT requests.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{DeviceId, RingEvent};
use crate::supervisor::ConnectionSupervisor;
use wishring_types::uuid::{BATTERY_CHAR, COUNTER_CHAR, RESET_CHAR};
use wishring_types::{wire, BatteryLevel, ButtonPressEvent};

/// Everything `sync_all` pushes to the device, in write order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WishSnapshot {
    /// Current wish count.
    pub count: u32,
    /// Wish text; truncated to the wire limit on encode.
    pub text: String,
    /// Target count.
    pub target: u32,
    /// Whether the wish is completed.
    pub completed: bool,
}

/// One step of the composite sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Count,
    Text,
    Target,
    Completion,
}

/// Structured outcome of [`DataChannel::sync_all`].
///
/// The composite short-circuits on the first failing sub-write; partial
/// sync is reported, not retried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Steps whose writes the transport accepted, in order.
    pub completed: Vec<SyncStep>,
    /// First step that failed, if any.
    pub failed: Option<SyncStep>,
}

impl SyncReport {
    /// Whether every step was written.
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// Reads, writes, and decodes ring data on top of the supervisor.
pub struct DataChannel {
    supervisor: Arc<ConnectionSupervisor>,
    battery_tx: watch::Sender<Option<BatteryLevel>>,
    press_tx: broadcast::Sender<ButtonPressEvent>,
    decode_task: tokio::task::JoinHandle<()>,
}

impl DataChannel {
    /// Creates the channel and spawns its decode task, which runs for the
    /// channel's lifetime and survives reconnects.
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        let (battery_tx, _) = watch::channel(None);
        let (press_tx, _) = broadcast::channel(32);

        let decode_task = tokio::spawn(Self::decode_loop(
            Arc::clone(&supervisor),
            battery_tx.clone(),
            press_tx.clone(),
        ));

        Self {
            supervisor,
            battery_tx,
            press_tx,
            decode_task,
        }
    }

    /// Converts raw notifications into domain events until the supervisor
    /// goes away. Decode failures are logged and dropped; a malformed
    /// notification must never take down the connection stack.
    async fn decode_loop(
        supervisor: Arc<ConnectionSupervisor>,
        battery_tx: watch::Sender<Option<BatteryLevel>>,
        press_tx: broadcast::Sender<ButtonPressEvent>,
    ) {
        let mut raw = supervisor.subscribe_raw();
        let identity = supervisor.watch_device();
        loop {
            let notification = match raw.recv().await {
                Ok(n) => n,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "notification decode fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let device = identity
                .borrow()
                .clone()
                .unwrap_or_else(|| DeviceId::new("unknown"));

            if notification.characteristic == COUNTER_CHAR {
                match wire::decode_press(&notification.value) {
                    Ok(count) => {
                        let press = ButtonPressEvent::from_count(count);
                        debug!(count, press_type = ?press.press_type, "button press");
                        let _ = press_tx.send(press.clone());
                        supervisor
                            .dispatcher()
                            .send(RingEvent::ButtonPress { device, press });
                    }
                    Err(e) => warn!(error = %e, "undecodable press notification"),
                }
            } else if notification.characteristic == BATTERY_CHAR {
                match wire::decode_battery(&notification.value) {
                    Ok(level) => {
                        battery_tx.send_replace(Some(level));
                        supervisor.dispatcher().send(RingEvent::Battery {
                            device: device.clone(),
                            level: level.percent(),
                        });
                        if level.is_low() {
                            supervisor.dispatcher().send(RingEvent::BatteryLow {
                                device,
                                level: level.percent(),
                            });
                        }
                    }
                    Err(e) => warn!(error = %e, "undecodable battery notification"),
                }
            }
        }
    }

    /// Writes the wish count. Values above the device maximum are clamped.
    pub async fn write_count(&self, count: u32) -> Result<()> {
        let clamped = count.min(wire::MAX_COUNT);
        let transport = self.supervisor.lease().await?;
        transport
            .write(COUNTER_CHAR, &wire::encode_count(clamped))
            .await
    }

    /// Writes the wish text, truncated to the wire limit.
    pub async fn write_text(&self, text: &str) -> Result<()> {
        let transport = self.supervisor.lease().await?;
        transport.write(COUNTER_CHAR, &wire::encode_text(text)).await
    }

    /// Writes the target count.
    pub async fn write_target(&self, target: u32) -> Result<()> {
        let clamped = target.min(wire::MAX_COUNT);
        let transport = self.supervisor.lease().await?;
        transport
            .write(COUNTER_CHAR, &wire::encode_count(clamped))
            .await
    }

    /// Writes the completion flag.
    pub async fn write_completion(&self, completed: bool) -> Result<()> {
        let transport = self.supervisor.lease().await?;
        transport
            .write(COUNTER_CHAR, &wire::encode_completion(completed))
            .await
    }

    /// Syncs the device clock to the host's current time.
    pub async fn sync_time(&self) -> Result<()> {
        let epoch_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let transport = self.supervisor.lease().await?;
        transport
            .write(COUNTER_CHAR, &wire::encode_time_ms(epoch_ms))
            .await
    }

    /// Sends the factory reset command.
    pub async fn send_reset(&self) -> Result<()> {
        let transport = self.supervisor.lease().await?;
        transport.write(RESET_CHAR, &wire::RESET_COMMAND).await
    }

    /// Reads the current battery level and refreshes the observable value.
    pub async fn read_battery(&self) -> Result<BatteryLevel> {
        let transport = self.supervisor.lease().await?;
        let data = transport.read(BATTERY_CHAR).await?;
        let level = wire::decode_battery(&data)?;
        self.battery_tx.send_replace(Some(level));
        Ok(level)
    }

    /// Reads the count register.
    pub async fn read_count(&self) -> Result<u32> {
        let transport = self.supervisor.lease().await?;
        let data = transport.read(COUNTER_CHAR).await?;
        Ok(wire::decode_count(&data)?)
    }

    /// Pushes a full wish snapshot to the device.
    ///
    /// Short-circuits on the first failing sub-write and reports which
    /// steps landed. Writes are best-effort; the device never acknowledges
    /// application of a value.
    #[tracing::instrument(skip_all)]
    pub async fn sync_all(&self, snapshot: &WishSnapshot) -> SyncReport {
        let mut report = SyncReport::default();
        for step in [
            SyncStep::Count,
            SyncStep::Text,
            SyncStep::Target,
            SyncStep::Completion,
        ] {
            let result = match step {
                SyncStep::Count => self.write_count(snapshot.count).await,
                SyncStep::Text => self.write_text(&snapshot.text).await,
                SyncStep::Target => self.write_target(snapshot.target).await,
                SyncStep::Completion => self.write_completion(snapshot.completed).await,
            };
            match result {
                Ok(()) => report.completed.push(step),
                Err(e) => {
                    warn!(?step, error = %e, "sync step failed, stopping");
                    report.failed = Some(step);
                    break;
                }
            }
        }
        report
    }

    /// Latest observed battery level, if any has been read this session.
    pub fn battery(&self) -> watch::Receiver<Option<BatteryLevel>> {
        self.battery_tx.subscribe()
    }

    /// Subscribes to decoded button presses.
    pub fn button_presses(&self) -> broadcast::Receiver<ButtonPressEvent> {
        self.press_tx.subscribe()
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.decode_task.abort();
    }
}
