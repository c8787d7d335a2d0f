//! Expired grant sweeping
//!
//! Rows are listed per kind and deleted one at a time, so one bad row or one
//! failing table never stops the rest of the pass.

use crate::model::GrantKind;
use crate::storage::Storage;
use crate::telemetry;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rows deleted per grant kind
    pub deleted: BTreeMap<String, u64>,
    /// Rows or kinds that could not be swept
    pub failures: u64,
    pub jtis_deleted: u64,
}

impl SweepReport {
    pub fn total_deleted(&self) -> u64 {
        self.deleted.values().sum()
    }
}

/// Delete every grant row that expired before `now`, then expired JTIs
pub async fn sweep_expired(storage: &dyn Storage, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();

    for kind in GrantKind::ALL {
        let signatures = match storage.list_expired_grants(kind, now).await {
            Ok(signatures) => signatures,
            Err(e) => {
                warn!(kind = %kind, "Failed to list expired grants: {}", e);
                report.failures += 1;
                continue;
            }
        };

        let mut deleted = 0u64;
        for signature in &signatures {
            match storage.delete_grant(kind, signature).await {
                Ok(true) => deleted += 1,
                // Already gone, e.g. redeemed while we were sweeping
                Ok(false) => {}
                Err(e) => {
                    warn!(kind = %kind, signature = %signature, "Failed to delete expired grant: {}", e);
                    report.failures += 1;
                }
            }
        }

        if deleted > 0 {
            debug!(kind = %kind, deleted, "Expired grants swept");
        }
        telemetry::record_swept(kind.as_str(), deleted);
        report.deleted.insert(kind.as_str().to_string(), deleted);
    }

    match storage.delete_expired_jtis(now).await {
        Ok(count) => report.jtis_deleted = count,
        Err(e) => {
            warn!("Failed to purge expired client assertion JTIs: {}", e);
            report.failures += 1;
        }
    }

    report
}

/// Run [`sweep_expired`] on `schedule` until `cancel` fires
pub fn spawn_sweeper(
    storage: Arc<dyn Storage>,
    schedule: Schedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Grant sweeper started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!("Sweep schedule has no upcoming runs, stopping sweeper");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            let report = sweep_expired(storage.as_ref(), Utc::now()).await;
            info!(
                deleted = report.total_deleted(),
                jtis = report.jtis_deleted,
                failures = report.failures,
                "Sweep finished"
            );
        }
        info!("Grant sweeper stopped");
    })
}

#[cfg(test)]
#[path = "sweep_test.rs"]
mod sweep_test;
