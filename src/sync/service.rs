use std::sync::Arc;
use std::time::Instant;

use log::{error, info};

use crate::config::ConfigStore;
use crate::models::{
    ReconciliationSummary, RevalidationOutcome, SyncState, SyncStatus, TriggerSource,
};
use crate::store::{Database, SyncJournal};
use crate::sync::reconcile::{LdapDirectoryWriter, ReconcileRun, ReconciliationEngine};
use crate::sync::revalidate::Revalidator;
use crate::sync::stats::{build_sync_status, collect_db_stats, LdapStats, LdapStatsCollector};
use crate::utils::PkdError;

/// Orchestrates the sync operations the scheduler and the trigger endpoints
/// invoke. Connections are opened per operation from the current
/// configuration snapshot.
pub struct SyncService {
    config: Arc<ConfigStore>,
}

impl SyncService {
    pub fn new(config: Arc<ConfigStore>) -> SyncService {
        SyncService { config }
    }

    /// Compare DB and LDAP counts and persist the snapshot. An LDAP outage
    /// still yields a persisted snapshot with status ERROR.
    pub fn run_check(&self) -> Result<SyncStatus, PkdError> {
        let settings = self.config.snapshot();
        let started = Instant::now();
        let mut database = Database::connect(&settings.db)?;

        let db_stats = collect_db_stats(&mut database)?;
        let ldap_result = LdapStatsCollector::new(settings.ldap_read.clone()).collect();
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut status = match ldap_result {
            Ok(ldap_stats) => build_sync_status(&db_stats, &ldap_stats, duration_ms),
            Err(e) => {
                error!("LDAP statistics collection failed: {}", e);
                let mut status =
                    build_sync_status(&db_stats, &LdapStats::default(), duration_ms);
                status.status = SyncState::Error;
                status
            }
        };

        let id = database.insert_sync_status(&status)?;
        status.id = Some(id);
        info!(
            "sync check {} finished: {} (total discrepancy {})",
            id,
            status.status.as_str(),
            status.total_discrepancy
        );
        Ok(status)
    }

    pub fn run_reconciliation(
        &self,
        triggered_by: TriggerSource,
        dry_run: bool,
        sync_status_id: Option<i64>,
    ) -> Result<ReconciliationSummary, PkdError> {
        let settings = self.config.snapshot();
        let mut database = Database::connect(&settings.db)?;
        let engine = ReconciliationEngine::new(settings.ldap_write.tree());
        let write_settings = settings.ldap_write.clone();
        engine.run(
            &mut database,
            move || LdapDirectoryWriter::connect(&write_settings),
            &ReconcileRun {
                triggered_by,
                dry_run,
                sync_status_id,
                batch_size: settings.max_reconcile_batch_size,
            },
        )
    }

    pub fn run_revalidation(&self) -> Result<RevalidationOutcome, PkdError> {
        let settings = self.config.snapshot();
        let mut database = Database::connect(&settings.db)?;
        Revalidator::run(&mut database)
    }

    /// The daily unit of work: sync check, then the optional reconciliation
    /// and revalidation stages. Failures are logged, never propagated; the
    /// next cycle proceeds regardless.
    pub fn daily_tick(&self, trigger: TriggerSource) {
        let sync_status_id = match self.run_check() {
            Ok(status) => status.id,
            Err(e) => {
                error!("daily sync check failed: {}", e);
                None
            }
        };

        let settings = self.config.snapshot();
        if settings.auto_reconcile {
            match self.run_reconciliation(trigger, false, sync_status_id) {
                Ok(summary) => info!(
                    "daily reconciliation finished with status {}",
                    summary.status.as_str()
                ),
                Err(e) => error!("daily reconciliation failed: {}", e),
            }
        }
        if settings.revalidate_certs_on_sync {
            match self.run_revalidation() {
                Ok(outcome) => info!(
                    "daily revalidation processed {} rows",
                    outcome.total_processed
                ),
                Err(e) => error!("daily revalidation failed: {}", e),
            }
        }
    }
}
