//! Notification subscription.
//!
//! After a connect, every notify- or indicate-capable characteristic gets
//! its client configuration descriptor written so the ring starts pushing
//! values. Subscription is best-effort: the result is a count of attempts
//! and successes, never an all-or-nothing failure.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::RingTransport;
use wishring_types::uuid::{CCCD, ENABLE_INDICATION, ENABLE_NOTIFICATION};

/// Outcome of [`NotificationEnabler::enable_all`].
///
/// Partial subscription is acceptable: button presses degrade gracefully
/// when some characteristic stays silent, so callers treat `succeeded > 0`
/// as overall success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Characteristics that were eligible (push-capable with a CCCD).
    pub attempted: u32,
    /// Descriptor writes the transport accepted.
    pub succeeded: u32,
}

impl SubscriptionReport {
    /// Overall success: at least one characteristic is subscribed.
    pub fn any_succeeded(&self) -> bool {
        self.succeeded > 0
    }
}

/// Walks the GATT table and enables pushes characteristic by characteristic.
#[derive(Debug, Clone)]
pub struct NotificationEnabler {
    /// Bounded wait for the one on-demand re-discovery when the service
    /// list comes back empty.
    pub rediscovery_timeout: Duration,
    /// Pause between descriptor writes. Many BLE stacks drop writes issued
    /// back to back, so writes are serialized with this gap.
    pub inter_write_delay: Duration,
}

impl Default for NotificationEnabler {
    fn default() -> Self {
        Self {
            rediscovery_timeout: Duration::from_secs(2),
            inter_write_delay: Duration::from_millis(200),
        }
    }
}

impl NotificationEnabler {
    /// Enables notifications on every eligible characteristic.
    ///
    /// Characteristics without a CCCD are skipped and not counted. Failures
    /// on individual characteristics are logged and reflected in the report;
    /// they never abort the walk.
    #[tracing::instrument(skip_all, fields(address = %transport.address()))]
    pub async fn enable_all(&self, transport: &dyn RingTransport) -> Result<SubscriptionReport> {
        let mut characteristics = transport.characteristics();
        if characteristics.is_empty() {
            warn!("empty service list, re-discovering once");
            match tokio::time::timeout(self.rediscovery_timeout, transport.discover_services())
                .await
            {
                Ok(Ok(())) => characteristics = transport.characteristics(),
                Ok(Err(e)) => warn!(error = %e, "re-discovery failed"),
                Err(_) => warn!("re-discovery timed out"),
            }
        }

        let mut report = SubscriptionReport::default();
        for ch in characteristics.iter().filter(|ch| ch.can_push()) {
            if !ch.has_cccd() {
                debug!(characteristic = %ch.uuid, "push-capable but no CCCD, skipping");
                continue;
            }
            report.attempted += 1;

            if let Err(e) = transport.subscribe(ch.uuid).await {
                warn!(characteristic = %ch.uuid, error = %e, "subscribe failed");
                tokio::time::sleep(self.inter_write_delay).await;
                continue;
            }

            let value = if ch.props.notify {
                &ENABLE_NOTIFICATION
            } else {
                &ENABLE_INDICATION
            };
            match transport.write_descriptor(ch.uuid, CCCD, value).await {
                Ok(()) => {
                    debug!(characteristic = %ch.uuid, "notifications enabled");
                    report.succeeded += 1;
                }
                Err(e) => warn!(characteristic = %ch.uuid, error = %e, "CCCD write failed"),
            }
            tokio::time::sleep(self.inter_write_delay).await;
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            "subscription pass complete"
        );
        Ok(report)
    }
}
