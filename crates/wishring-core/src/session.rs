//! Post-connect session bring-up.
//!
//! Both manual connects and auto-reconnect run the same sequence after the
//! transport comes up: enable notifications, read the battery, sync the
//! device clock, then mark the session ready. Bring-up steps after the
//! connect itself are best-effort; a ring with a flaky battery read is
//! still usable for button presses.

use tracing::{info, warn};

use crate::channel::DataChannel;
use crate::error::Result;
use crate::notify::{NotificationEnabler, SubscriptionReport};
use crate::supervisor::ConnectionSupervisor;
use wishring_types::ConnectionPhase;

/// Connects to the address and brings the session all the way to `Ready`.
///
/// Fails only when the connect itself fails; subscription and settings
/// steps degrade gracefully and are reflected in the returned report.
#[tracing::instrument(skip(supervisor, channel))]
pub async fn establish(
    supervisor: &ConnectionSupervisor,
    channel: &DataChannel,
    address: &str,
) -> Result<SubscriptionReport> {
    supervisor.connect(address).await?;

    supervisor.set_phase(ConnectionPhase::Initializing);
    let enabler = NotificationEnabler::default();
    let report = match supervisor.lease().await {
        Ok(lease) => match enabler.enable_all(&*lease).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "subscription pass failed");
                SubscriptionReport::default()
            }
        },
        Err(e) => {
            warn!(error = %e, "connection vanished before subscription");
            SubscriptionReport::default()
        }
    };
    if !report.any_succeeded() {
        warn!("no characteristic subscribed, button presses will not arrive");
    }

    supervisor.set_phase(ConnectionPhase::ReadingSettings);
    if let Err(e) = channel.read_battery().await {
        warn!(error = %e, "initial battery read failed");
    }

    supervisor.set_phase(ConnectionPhase::WritingTime);
    if let Err(e) = channel.sync_time().await {
        warn!(error = %e, "device time sync failed");
    }

    supervisor.set_phase(ConnectionPhase::Ready);
    info!(address, subscribed = report.succeeded, "session ready");
    Ok(report)
}
