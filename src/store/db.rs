use std::collections::HashMap;

use chrono::Utc;
use log::debug;
use postgres::{Client, NoTls};

use crate::models::{
    Certificate, CertificateType, PaDataGroupRecord, PaVerificationRecord,
    ReconciliationLogEntry, ReconciliationSummary, RevalidationOutcome, StoredValidation,
    SyncStatus, TriggerSource,
};
use crate::store::{
    CertificateStore, DbStatsSource, PaStore, RevalidationStore, SyncJournal,
};
use crate::utils::PkdError;

/// PostgreSQL endpoint configuration.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DbSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={}",
            self.host, self.port, self.name, self.user, self.password
        )
    }
}

/// Parameterised persistence over one PostgreSQL connection. Each handler
/// owns its `Database` for the duration of an operation.
pub struct Database {
    client: Client,
}

impl Database {
    pub fn connect(settings: &DbSettings) -> Result<Database, PkdError> {
        let client = Client::connect(&settings.connection_string(), NoTls)?;
        Ok(Database { client })
    }

    pub fn from_client(client: Client) -> Database {
        Database { client }
    }

    /// Load the single-row live configuration, if the row exists yet.
    pub fn load_sync_config_row(&mut self) -> Result<Option<SyncConfigRow>, PkdError> {
        let row = self.client.query_opt(
            "SELECT daily_sync_enabled, daily_sync_hour, daily_sync_minute, \
                    auto_reconcile, revalidate_certs_on_sync, max_reconcile_batch_size \
             FROM sync_config WHERE id = 1",
            &[],
        )?;
        Ok(row.map(|row| SyncConfigRow {
            daily_sync_enabled: row.get(0),
            daily_sync_hour: row.get::<_, i32>(1) as u8,
            daily_sync_minute: row.get::<_, i32>(2) as u8,
            auto_reconcile: row.get(3),
            revalidate_certs_on_sync: row.get(4),
            max_reconcile_batch_size: row.get::<_, i32>(5) as usize,
        }))
    }

    pub fn save_sync_config_row(&mut self, row: &SyncConfigRow) -> Result<(), PkdError> {
        self.client.execute(
            "INSERT INTO sync_config (id, daily_sync_enabled, daily_sync_hour, daily_sync_minute, \
                                      auto_reconcile, revalidate_certs_on_sync, max_reconcile_batch_size) \
             VALUES (1, $1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
                daily_sync_enabled = $1, daily_sync_hour = $2, daily_sync_minute = $3, \
                auto_reconcile = $4, revalidate_certs_on_sync = $5, max_reconcile_batch_size = $6",
            &[
                &row.daily_sync_enabled,
                &(row.daily_sync_hour as i32),
                &(row.daily_sync_minute as i32),
                &row.auto_reconcile,
                &row.revalidate_certs_on_sync,
                &(row.max_reconcile_batch_size as i32),
            ],
        )?;
        Ok(())
    }
}

/// Mutable subset of the configuration held in the `sync_config` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfigRow {
    pub daily_sync_enabled: bool,
    pub daily_sync_hour: u8,
    pub daily_sync_minute: u8,
    pub auto_reconcile: bool,
    pub revalidate_certs_on_sync: bool,
    pub max_reconcile_batch_size: usize,
}

impl PaStore for Database {
    fn save_verification(
        &mut self,
        record: &PaVerificationRecord,
        data_groups: &[PaDataGroupRecord],
    ) -> Result<(), PkdError> {
        let mut tx = self.client.transaction()?;
        let row = tx.query_one(
            "INSERT INTO pa_verification \
                (verification_id, status, issuing_country, document_number, sod_hash, \
                 dsc_subject_dn, csca_subject_dn, crl_status, processing_duration_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
            &[
                &record.verification_id,
                &record.status,
                &record.issuing_country,
                &record.document_number,
                &record.sod_hash,
                &record.dsc_subject_dn,
                &record.csca_subject_dn,
                &record.crl_status,
                &record.processing_duration_ms,
                &record.created_at,
            ],
        )?;
        let parent_id: i64 = row.get(0);

        for group in data_groups {
            tx.execute(
                "INSERT INTO pa_data_group \
                    (verification_id, dg_number, expected_hash, actual_hash, valid, algorithm) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &parent_id,
                    &(group.dg_number as i32),
                    &group.expected_hash,
                    &group.actual_hash,
                    &group.valid,
                    &group.algorithm,
                ],
            )?;
        }
        tx.commit()?;
        debug!(
            "persisted PA verification {} with {} data group rows",
            record.verification_id,
            data_groups.len()
        );
        Ok(())
    }
}

impl CertificateStore for Database {
    fn certificates_pending_ldap(
        &mut self,
        cert_type: CertificateType,
        limit: i64,
    ) -> Result<Vec<Certificate>, PkdError> {
        let rows = self.client.query(
            "SELECT id, cert_type, country, subject_dn, issuer_dn, serial, \
                    fingerprint_sha256, not_before, not_after, binary_der, \
                    stored_in_ldap, first_upload_id \
             FROM certificate \
             WHERE cert_type = $1 AND stored_in_ldap = FALSE \
             ORDER BY id ASC LIMIT $2",
            &[&cert_type.as_str(), &limit],
        )?;
        let mut certificates = Vec::with_capacity(rows.len());
        for row in rows {
            let type_str: String = row.get(1);
            certificates.push(Certificate {
                id: row.get(0),
                cert_type: CertificateType::from_str(&type_str).ok_or_else(|| {
                    PkdError::Database(format!("unknown certificate type '{}'", type_str))
                })?,
                country: row.get(2),
                subject_dn: row.get(3),
                issuer_dn: row.get(4),
                serial: row.get(5),
                fingerprint_sha256: row.get(6),
                not_before: row.get(7),
                not_after: row.get(8),
                binary_der: row.get(9),
                stored_in_ldap: row.get(10),
                first_upload_id: row.get(11),
            });
        }
        Ok(certificates)
    }

    fn mark_stored_in_ldap(&mut self, certificate_id: i64) -> Result<(), PkdError> {
        self.client.execute(
            "UPDATE certificate SET stored_in_ldap = TRUE WHERE id = $1",
            &[&certificate_id],
        )?;
        Ok(())
    }
}

impl SyncJournal for Database {
    fn insert_sync_status(&mut self, status: &SyncStatus) -> Result<i64, PkdError> {
        let row = self.client.query_one(
            "INSERT INTO sync_status \
                (check_time, status, csca_db_count, dsc_db_count, dsc_nc_db_count, crl_db_count, \
                 csca_ldap_count, dsc_ldap_count, dsc_nc_ldap_count, crl_ldap_count, \
                 csca_discrepancy, dsc_discrepancy, dsc_nc_discrepancy, crl_discrepancy, \
                 total_discrepancy, duration_ms, db_country_breakdown, ldap_country_breakdown) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING id",
            &[
                &status.check_time,
                &status.status.as_str(),
                &status.csca_db_count,
                &status.dsc_db_count,
                &status.dsc_nc_db_count,
                &status.crl_db_count,
                &status.csca_ldap_count,
                &status.dsc_ldap_count,
                &status.dsc_nc_ldap_count,
                &status.crl_ldap_count,
                &status.csca_discrepancy,
                &status.dsc_discrepancy,
                &status.dsc_nc_discrepancy,
                &status.crl_discrepancy,
                &status.total_discrepancy,
                &status.duration_ms,
                &status.db_country_breakdown,
                &status.ldap_country_breakdown,
            ],
        )?;
        Ok(row.get(0))
    }

    fn create_reconciliation_summary(
        &mut self,
        triggered_by: TriggerSource,
        dry_run: bool,
        sync_status_id: Option<i64>,
    ) -> Result<i64, PkdError> {
        let row = self.client.query_one(
            "INSERT INTO reconciliation_summary \
                (sync_status_id, triggered_by, dry_run, status, started_at) \
             VALUES ($1, $2, $3, 'IN_PROGRESS', $4) RETURNING id",
            &[&sync_status_id, &triggered_by.as_str(), &dry_run, &Utc::now()],
        )?;
        Ok(row.get(0))
    }

    fn finalize_reconciliation_summary(
        &mut self,
        summary: &ReconciliationSummary,
    ) -> Result<(), PkdError> {
        self.client.execute(
            "UPDATE reconciliation_summary SET \
                status = $2, finished_at = $3, csca_added = $4, dsc_added = $5, \
                dsc_nc_added = $6, deleted_count = $7, success_count = $8, \
                failed_count = $9, duration_ms = $10, error_message = $11 \
             WHERE id = $1",
            &[
                &summary.id,
                &summary.status.as_str(),
                &summary.finished_at,
                &summary.csca_added,
                &summary.dsc_added,
                &summary.dsc_nc_added,
                &summary.deleted_count,
                &summary.success_count,
                &summary.failed_count,
                &summary.duration_ms,
                &summary.error_message,
            ],
        )?;
        Ok(())
    }

    fn append_reconciliation_log(
        &mut self,
        entry: &ReconciliationLogEntry,
    ) -> Result<(), PkdError> {
        self.client.execute(
            "INSERT INTO reconciliation_log \
                (summary_id, certificate_id, cert_type, operation, status, dn, \
                 duration_ms, error_message, logged_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &entry.summary_id,
                &entry.certificate_id,
                &entry.cert_type.as_str(),
                &entry.operation.as_str(),
                &if entry.success { "SUCCESS" } else { "FAILED" },
                &entry.dn,
                &entry.duration_ms,
                &entry.error_message,
                &Utc::now(),
            ],
        )?;
        Ok(())
    }
}

impl RevalidationStore for Database {
    fn validations_with_expiry(&mut self) -> Result<Vec<StoredValidation>, PkdError> {
        let rows = self.client.query(
            "SELECT id, certificate_id, upload_id, validation_status, trust_chain_valid, \
                    signature_valid, validity_period_valid, revocation_status, not_after, is_expired \
             FROM validation_result WHERE not_after IS NOT NULL ORDER BY id ASC",
            &[],
        )?;
        Ok(rows
            .into_iter()
            .map(|row| StoredValidation {
                id: row.get(0),
                certificate_id: row.get(1),
                upload_id: row.get(2),
                validation_status: row.get(3),
                trust_chain_valid: row.get(4),
                signature_valid: row.get(5),
                validity_period_valid: row.get(6),
                revocation_status: row.get(7),
                not_after: row.get(8),
                is_expired: row.get(9),
            })
            .collect())
    }

    fn update_validation_expiry(
        &mut self,
        validation_id: i64,
        is_expired: bool,
        validation_status: &str,
    ) -> Result<(), PkdError> {
        self.client.execute(
            "UPDATE validation_result SET is_expired = $2, validation_status = $3 WHERE id = $1",
            &[&validation_id, &is_expired, &validation_status],
        )?;
        Ok(())
    }

    fn recompute_upload_expired_counts(&mut self) -> Result<(), PkdError> {
        self.client.execute(
            "UPDATE uploaded_file uf SET expired_count = \
                (SELECT COUNT(*) FROM validation_result vr \
                 WHERE vr.upload_id = uf.id AND vr.is_expired)",
            &[],
        )?;
        Ok(())
    }

    fn insert_revalidation_history(
        &mut self,
        outcome: &RevalidationOutcome,
    ) -> Result<(), PkdError> {
        self.client.execute(
            "INSERT INTO revalidation_history \
                (run_at, total_processed, newly_expired, newly_valid, unchanged, errors, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &outcome.run_at,
                &outcome.total_processed,
                &outcome.newly_expired,
                &outcome.newly_valid,
                &outcome.unchanged,
                &outcome.errors,
                &outcome.duration_ms,
            ],
        )?;
        Ok(())
    }
}

impl DbStatsSource for Database {
    fn certificate_counts_by_type(&mut self) -> Result<HashMap<CertificateType, i64>, PkdError> {
        let rows = self
            .client
            .query("SELECT cert_type, COUNT(*) FROM certificate GROUP BY cert_type", &[])?;
        let mut counts = HashMap::new();
        for row in rows {
            let type_str: String = row.get(0);
            if let Some(cert_type) = CertificateType::from_str(&type_str) {
                counts.insert(cert_type, row.get(1));
            }
        }
        Ok(counts)
    }

    fn certificate_counts_by_country(
        &mut self,
    ) -> Result<HashMap<(String, CertificateType), i64>, PkdError> {
        let rows = self.client.query(
            "SELECT country, cert_type, COUNT(*) FROM certificate GROUP BY country, cert_type",
            &[],
        )?;
        let mut counts = HashMap::new();
        for row in rows {
            let type_str: String = row.get(1);
            if let Some(cert_type) = CertificateType::from_str(&type_str) {
                counts.insert((row.get(0), cert_type), row.get(2));
            }
        }
        Ok(counts)
    }

    fn crl_count(&mut self) -> Result<i64, PkdError> {
        let row = self.client.query_one("SELECT COUNT(*) FROM crl", &[])?;
        Ok(row.get(0))
    }

    fn stored_in_ldap_count(&mut self) -> Result<i64, PkdError> {
        let row = self
            .client
            .query_one("SELECT COUNT(*) FROM certificate WHERE stored_in_ldap", &[])?;
        Ok(row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string() {
        let settings = DbSettings {
            host: "db.internal".to_string(),
            port: 5432,
            name: "pkd".to_string(),
            user: "pkd".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(
            settings.connection_string(),
            "host=db.internal port=5432 dbname=pkd user=pkd password=secret"
        );
    }
}
