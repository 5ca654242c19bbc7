use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Certificate kinds tracked by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertificateType {
    Csca,
    Dsc,
    DscNc,
    Mlsc,
}

impl CertificateType {
    /// Reconciliation processes types in this order so CSCA entries exist
    /// before the DSCs that chain to them.
    pub const RECONCILE_ORDER: [CertificateType; 3] = [
        CertificateType::Csca,
        CertificateType::Dsc,
        CertificateType::DscNc,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateType::Csca => "CSCA",
            CertificateType::Dsc => "DSC",
            CertificateType::DscNc => "DSC_NC",
            CertificateType::Mlsc => "MLSC",
        }
    }

    pub fn from_str(value: &str) -> Option<CertificateType> {
        match value {
            "CSCA" => Some(CertificateType::Csca),
            "DSC" => Some(CertificateType::Dsc),
            "DSC_NC" => Some(CertificateType::DscNc),
            "MLSC" => Some(CertificateType::Mlsc),
            _ => None,
        }
    }
}

/// A stored certificate row. Identity is `(cert_type, fingerprint_sha256)`.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub id: i64,
    pub cert_type: CertificateType,
    pub country: String,
    pub subject_dn: String,
    pub issuer_dn: String,
    pub serial: String,
    pub fingerprint_sha256: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub binary_der: Vec<u8>,
    pub stored_in_ldap: bool,
    pub first_upload_id: Option<i64>,
}

/// Per-(certificate, upload) validation outcome, maintained by the
/// revalidator.
#[derive(Debug, Clone)]
pub struct StoredValidation {
    pub id: i64,
    pub certificate_id: i64,
    pub upload_id: i64,
    pub validation_status: String,
    pub trust_chain_valid: bool,
    pub signature_valid: bool,
    pub validity_period_valid: bool,
    pub revocation_status: Option<String>,
    pub not_after: Option<DateTime<Utc>>,
    pub is_expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Synced,
    Discrepancy,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "SYNCED",
            SyncState::Discrepancy => "DISCREPANCY",
            SyncState::Error => "ERROR",
        }
    }
}

/// Immutable snapshot of one DB/LDAP comparison run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub id: Option<i64>,
    pub check_time: DateTime<Utc>,
    pub status: SyncState,
    pub csca_db_count: i64,
    pub dsc_db_count: i64,
    pub dsc_nc_db_count: i64,
    pub crl_db_count: i64,
    pub csca_ldap_count: i64,
    pub dsc_ldap_count: i64,
    pub dsc_nc_ldap_count: i64,
    pub crl_ldap_count: i64,
    pub csca_discrepancy: i64,
    pub dsc_discrepancy: i64,
    pub dsc_nc_discrepancy: i64,
    pub crl_discrepancy: i64,
    pub total_discrepancy: i64,
    pub duration_ms: i64,
    /// JSON object keyed by country code.
    pub db_country_breakdown: String,
    pub ldap_country_breakdown: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationState {
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl ReconciliationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationState::InProgress => "IN_PROGRESS",
            ReconciliationState::Completed => "COMPLETED",
            ReconciliationState::Partial => "PARTIAL",
            ReconciliationState::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Manual,
    Auto,
    DailySync,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "MANUAL",
            TriggerSource::Auto => "AUTO",
            TriggerSource::DailySync => "DAILY_SYNC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconcileOperation {
    Add,
    Delete,
}

impl ReconcileOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOperation::Add => "ADD",
            ReconcileOperation::Delete => "DELETE",
        }
    }
}

/// Parent record of one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconciliationSummary {
    pub id: i64,
    pub sync_status_id: Option<i64>,
    pub triggered_by: TriggerSource,
    pub dry_run: bool,
    pub status: ReconciliationState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub csca_added: i64,
    pub dsc_added: i64,
    pub dsc_nc_added: i64,
    pub deleted_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// One row per LDAP add/delete attempt within a run.
#[derive(Debug, Clone)]
pub struct ReconciliationLogEntry {
    pub summary_id: i64,
    pub certificate_id: i64,
    pub cert_type: CertificateType,
    pub operation: ReconcileOperation,
    pub success: bool,
    pub dn: String,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

/// Parent record of one PA verification, persisted with its per-DG children.
#[derive(Debug, Clone)]
pub struct PaVerificationRecord {
    pub verification_id: String,
    pub status: String,
    pub issuing_country: Option<String>,
    pub document_number: Option<String>,
    pub sod_hash: String,
    pub dsc_subject_dn: Option<String>,
    pub csca_subject_dn: Option<String>,
    pub crl_status: Option<String>,
    pub processing_duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PaDataGroupRecord {
    pub dg_number: u32,
    pub expected_hash: Option<String>,
    pub actual_hash: String,
    pub valid: bool,
    pub algorithm: String,
}

/// Outcome of one revalidation sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidationOutcome {
    pub run_at: DateTime<Utc>,
    pub total_processed: i64,
    pub newly_expired: i64,
    pub newly_valid: i64,
    pub unchanged: i64,
    pub errors: i64,
    pub duration_ms: i64,
}
