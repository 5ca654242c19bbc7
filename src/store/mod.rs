//! Persistence façade
//!
//! The engines speak to storage through the narrow traits below; `Database`
//! implements them over a PostgreSQL connection with parameterised
//! statements. Tests substitute in-memory implementations.

pub mod db;

use std::collections::HashMap;

use crate::models::{
    Certificate, CertificateType, PaDataGroupRecord, PaVerificationRecord,
    ReconciliationLogEntry, ReconciliationSummary, RevalidationOutcome, StoredValidation,
    SyncStatus, TriggerSource,
};
use crate::utils::PkdError;

pub use db::{Database, DbSettings};

/// Write-through of PA verification results.
pub trait PaStore {
    /// Persist the parent row and one child row per submitted data group,
    /// atomically.
    fn save_verification(
        &mut self,
        record: &PaVerificationRecord,
        data_groups: &[PaDataGroupRecord],
    ) -> Result<(), PkdError>;
}

/// Certificate queries used by the reconciliation engine.
pub trait CertificateStore {
    /// Certificates of one type not yet mirrored to LDAP, ascending id,
    /// bounded by `limit`.
    fn certificates_pending_ldap(
        &mut self,
        cert_type: CertificateType,
        limit: i64,
    ) -> Result<Vec<Certificate>, PkdError>;

    fn mark_stored_in_ldap(&mut self, certificate_id: i64) -> Result<(), PkdError>;
}

/// Sync snapshot and reconciliation journal writes.
pub trait SyncJournal {
    fn insert_sync_status(&mut self, status: &SyncStatus) -> Result<i64, PkdError>;

    fn create_reconciliation_summary(
        &mut self,
        triggered_by: TriggerSource,
        dry_run: bool,
        sync_status_id: Option<i64>,
    ) -> Result<i64, PkdError>;

    fn finalize_reconciliation_summary(
        &mut self,
        summary: &ReconciliationSummary,
    ) -> Result<(), PkdError>;

    fn append_reconciliation_log(
        &mut self,
        entry: &ReconciliationLogEntry,
    ) -> Result<(), PkdError>;
}

/// Validation sweep surface for the revalidator.
pub trait RevalidationStore {
    /// All validation rows carrying a `not_after` value.
    fn validations_with_expiry(&mut self) -> Result<Vec<StoredValidation>, PkdError>;

    fn update_validation_expiry(
        &mut self,
        validation_id: i64,
        is_expired: bool,
        validation_status: &str,
    ) -> Result<(), PkdError>;

    /// Recompute `expired_count` on every upload from its child validation
    /// rows.
    fn recompute_upload_expired_counts(&mut self) -> Result<(), PkdError>;

    fn insert_revalidation_history(
        &mut self,
        outcome: &RevalidationOutcome,
    ) -> Result<(), PkdError>;
}

/// Aggregation queries feeding the DB side of the statistics snapshot.
pub trait DbStatsSource {
    fn certificate_counts_by_type(&mut self) -> Result<HashMap<CertificateType, i64>, PkdError>;

    /// `(country, type) -> count`.
    fn certificate_counts_by_country(
        &mut self,
    ) -> Result<HashMap<(String, CertificateType), i64>, PkdError>;

    fn crl_count(&mut self) -> Result<i64, PkdError>;

    fn stored_in_ldap_count(&mut self) -> Result<i64, PkdError>;
}
