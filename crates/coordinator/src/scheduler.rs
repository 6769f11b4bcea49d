//! Two cron-triggered jobs, run by a single cooperative scheduler task:
//! `auto_archive` and `auto_destroy`. Both are idempotent — re-running
//! either is a no-op, because an asset that already transitioned fails the
//! status precondition inside [`crate::lifecycle::LifecycleCoordinator`] and
//! is swallowed the same way a per-asset failure is.
//!
//! The scheduler itself never touches wall-clock time directly except to
//! sleep between triggers; `auto_archive`/`auto_destroy` are pure functions
//! of an explicit `now`, which is what makes them independently testable.

use crate::lifecycle::LifecycleCoordinator;
use ledger_asyncutils::fan_out_lenient;
use ledger_metadata::MetadataStore;
use time::{Duration as TimeDuration, OffsetDateTime, Time};
use tracing::{info, instrument};

/// Username the scheduler acts as for both cron jobs; there is no notion of a
/// system principal distinct from the admin account in this model.
const SCHEDULER_USER: &str = "admin";

/// Runs the two lifecycle cron jobs at their configured times.
///
/// Holds its own [`MetadataStore`] handle (rather than reaching into
/// [`LifecycleCoordinator`]'s private one) because `assets_to_archive`,
/// `assets_to_destroy`, and `cleanup_logs` are due-list queries the
/// coordinator itself has no operation for — they drive the coordinator,
/// they aren't one of its lifecycle operations.
#[derive(Clone)]
pub struct Scheduler {
    coordinator: LifecycleCoordinator,
    metadata: MetadataStore,
    archive_trigger: (u8, u8),
    destroy_trigger: (u8, u8),
    audit_retention_days: i64,
    upload_concurrency: usize,
}

impl Scheduler {
    /// `archive_trigger`/`destroy_trigger` are `(hour, minute)` in UTC. This
    /// build carries no timezone database, so the configured `timezone`
    /// setting is validated for shape only and triggers always fire in UTC.
    pub fn new(
        coordinator: LifecycleCoordinator,
        metadata: MetadataStore,
        archive_trigger: (u8, u8),
        destroy_trigger: (u8, u8),
        audit_retention_days: u32,
        upload_concurrency: usize,
    ) -> Self {
        Self {
            coordinator,
            metadata,
            archive_trigger,
            destroy_trigger,
            audit_retention_days: i64::from(audit_retention_days),
            upload_concurrency,
        }
    }

    /// Archives every asset whose `archive_date` has passed as of `now`.
    ///
    /// Failures are per-asset and non-fatal: one asset that lost its
    /// branch, or was already archived by a concurrent call, is logged and
    /// skipped rather than aborting the rest of the batch.
    #[instrument("auto_archive", skip(self), fields(now = %now))]
    pub async fn auto_archive(&self, now: OffsetDateTime) -> Vec<crate::dto::AssetVersionResponse> {
        let due = match self.metadata.assets_to_archive(now).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(error = %err, "auto_archive: failed to list due assets");
                return Vec::new();
            }
        };
        if due.is_empty() {
            info!("no assets to archive");
            return Vec::new();
        }

        let coordinator = &self.coordinator;
        let archived = fan_out_lenient(due, self.upload_concurrency, "auto_archive", |asset| async move {
            coordinator.archive(SCHEDULER_USER, &asset.branch, &asset.asset_path, &asset.version_id).await
        })
        .await;
        info!(count = archived.len(), "auto_archive complete");
        archived
    }

    /// Destroys every asset whose `destroy_date` has passed as of `now`,
    /// after pruning audit log rows older than `audit_retention_days`.
    ///
    /// Reuses the configured `audit_retention_days` rather than a hardcoded
    /// constant, so one knob governs both the audit trail's documented
    /// retention and its cleanup; see `DESIGN.md`.
    #[instrument("auto_destroy", skip(self), fields(now = %now))]
    pub async fn auto_destroy(&self, now: OffsetDateTime) -> Vec<crate::dto::AssetVersionResponse> {
        let cutoff = now - TimeDuration::days(self.audit_retention_days);
        match self.metadata.cleanup_logs(cutoff, 500).await {
            Ok(deleted) => info!(deleted, "pruned audit log"),
            Err(err) => tracing::error!(error = %err, "auto_destroy: failed to prune audit log"),
        }

        let due = match self.metadata.assets_to_destroy(now).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(error = %err, "auto_destroy: failed to list due assets");
                return Vec::new();
            }
        };
        if due.is_empty() {
            info!("no assets to destroy");
            return Vec::new();
        }

        let coordinator = &self.coordinator;
        let destroyed = fan_out_lenient(due, self.upload_concurrency, "auto_destroy", |asset| async move {
            coordinator.destroy(SCHEDULER_USER, &asset.branch, &asset.asset_path, &asset.version_id).await
        })
        .await;
        info!(count = destroyed.len(), "auto_destroy complete");
        destroyed
    }

    /// Drives both jobs forever, one trigger at a time, on the calling
    /// task. A single task (rather than two spawned ones) is what prevents
    /// overlapping runs of the same job: the loop never starts the next
    /// sleep until the previous job finished.
    pub async fn run(&self) {
        let mut next_archive = next_trigger(self.archive_trigger, OffsetDateTime::now_utc());
        let mut next_destroy = next_trigger(self.destroy_trigger, OffsetDateTime::now_utc());
        loop {
            let now = OffsetDateTime::now_utc();
            let wait_until = next_archive.min(next_destroy);
            let sleep_for = (wait_until - now).max(TimeDuration::ZERO);
            tokio::time::sleep(std::time::Duration::from_secs(sleep_for.whole_seconds().max(0) as u64)).await;

            let now = OffsetDateTime::now_utc();
            if now >= next_archive {
                self.auto_archive(now).await;
                next_archive = next_trigger(self.archive_trigger, now);
            }
            if now >= next_destroy {
                self.auto_destroy(now).await;
                next_destroy = next_trigger(self.destroy_trigger, now);
            }
        }
    }
}

/// Returns the next `OffsetDateTime` at `(hour, minute)` UTC strictly after
/// `after`. If `after` is already past today's trigger, rolls to tomorrow.
pub fn next_trigger(hhmm: (u8, u8), after: OffsetDateTime) -> OffsetDateTime {
    let (hour, minute) = hhmm;
    let time = Time::from_hms(hour, minute, 0).expect("validated HH:MM");
    let today = after.date().with_time(time).assume_utc();
    if today > after { today } else { today + TimeDuration::days(1) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn next_trigger_rolls_to_tomorrow_when_already_past() {
        let after = datetime!(2024-01-01 10:30:00 UTC);
        let next = next_trigger((9, 0), after);
        assert_eq!(next, datetime!(2024-01-02 09:00:00 UTC));
    }

    #[test]
    fn next_trigger_stays_today_when_still_ahead() {
        let after = datetime!(2024-01-01 06:00:00 UTC);
        let next = next_trigger((9, 0), after);
        assert_eq!(next, datetime!(2024-01-01 09:00:00 UTC));
    }
}
