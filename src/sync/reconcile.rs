use std::time::Instant;

use chrono::Utc;
use ldap3::LdapConn;
use log::{error, info};

use crate::crypto::certs::der_to_pem;
use crate::models::{
    Certificate, CertificateType, ReconcileOperation, ReconciliationLogEntry,
    ReconciliationState, ReconciliationSummary, TriggerSource,
};
use crate::store::{CertificateStore, SyncJournal};
use crate::trust::ldap::{LdapSettings, LdapTree};
use crate::utils::PkdError;

/// Object classes for directory certificate entries.
const CSCA_OBJECT_CLASSES: [&str; 2] = ["top", "cscaCertificateObject"];
const PKI_OBJECT_CLASSES: [&str; 2] = ["top", "pkiCertificate"];

/// Write access to the certificate directory. The production implementation
/// holds one bound connection to the LDAP write endpoint for the duration of
/// a run.
pub trait DirectoryWriter {
    fn add_certificate(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        cn: &str,
        certificate_pem: &str,
    ) -> Result<(), PkdError>;
}

impl<W: DirectoryWriter + ?Sized> DirectoryWriter for &mut W {
    fn add_certificate(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        cn: &str,
        certificate_pem: &str,
    ) -> Result<(), PkdError> {
        (**self).add_certificate(dn, object_classes, cn, certificate_pem)
    }
}

pub struct LdapDirectoryWriter {
    conn: LdapConn,
}

impl LdapDirectoryWriter {
    /// Bind to the write endpoint. Reconciliation never goes through the
    /// read load balancer.
    pub fn connect(settings: &LdapSettings) -> Result<LdapDirectoryWriter, PkdError> {
        Ok(LdapDirectoryWriter {
            conn: settings.connect()?,
        })
    }
}

impl Drop for LdapDirectoryWriter {
    fn drop(&mut self) {
        self.conn.unbind().ok();
    }
}

impl DirectoryWriter for LdapDirectoryWriter {
    fn add_certificate(
        &mut self,
        dn: &str,
        object_classes: &[&str],
        cn: &str,
        certificate_pem: &str,
    ) -> Result<(), PkdError> {
        let attrs: Vec<(String, std::collections::HashSet<String>)> = vec![
            (
                "objectClass".to_string(),
                object_classes.iter().map(|c| c.to_string()).collect(),
            ),
            ("cn".to_string(), std::iter::once(cn.to_string()).collect()),
            (
                "userCertificate;binary".to_string(),
                std::iter::once(certificate_pem.to_string()).collect(),
            ),
        ];
        self.conn
            .add(dn, attrs)?
            .success()
            .map_err(|e| PkdError::Ldap(format!("add {} failed: {}", dn, e)))?;
        Ok(())
    }
}

/// Parameters of one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileRun {
    pub triggered_by: TriggerSource,
    pub dry_run: bool,
    pub sync_status_id: Option<i64>,
    pub batch_size: usize,
}

/// Brings the LDAP tree up to a superset of the database for the managed
/// certificate types. Additions only; deletions are a future extension and
/// appear in the model as zero counts.
pub struct ReconciliationEngine {
    tree: LdapTree,
}

impl ReconciliationEngine {
    pub fn new(tree: LdapTree) -> Self {
        ReconciliationEngine { tree }
    }

    /// Execute one run. `connect` is invoked once after the summary row is
    /// opened; a bind failure marks the whole run FAILED.
    pub fn run<S, W, F>(
        &self,
        store: &mut S,
        connect: F,
        run: &ReconcileRun,
    ) -> Result<ReconciliationSummary, PkdError>
    where
        S: CertificateStore + SyncJournal,
        W: DirectoryWriter,
        F: FnOnce() -> Result<W, PkdError>,
    {
        let started = Instant::now();
        let started_at = Utc::now();
        let summary_id =
            store.create_reconciliation_summary(run.triggered_by, run.dry_run, run.sync_status_id)?;
        info!(
            "reconciliation {} started (trigger {}, dry_run {})",
            summary_id,
            run.triggered_by.as_str(),
            run.dry_run
        );

        let mut summary = ReconciliationSummary {
            id: summary_id,
            sync_status_id: run.sync_status_id,
            triggered_by: run.triggered_by,
            dry_run: run.dry_run,
            status: ReconciliationState::InProgress,
            started_at,
            finished_at: None,
            csca_added: 0,
            dsc_added: 0,
            dsc_nc_added: 0,
            deleted_count: 0,
            success_count: 0,
            failed_count: 0,
            duration_ms: 0,
            error_message: None,
        };

        let mut writer = match connect() {
            Ok(writer) => writer,
            Err(e) => {
                error!("reconciliation {}: LDAP bind failed: {}", summary_id, e);
                summary.status = ReconciliationState::Failed;
                summary.error_message = Some(e.to_string());
                summary.finished_at = Some(Utc::now());
                summary.duration_ms = started.elapsed().as_millis() as i64;
                store.finalize_reconciliation_summary(&summary)?;
                return Ok(summary);
            }
        };

        // CSCA first so DSC chain lookups resolve against a populated tree.
        for cert_type in CertificateType::RECONCILE_ORDER {
            let pending =
                store.certificates_pending_ldap(cert_type, run.batch_size as i64)?;
            for certificate in &pending {
                let added = self.add_one(store, &mut writer, run, summary_id, certificate)?;
                if added {
                    summary.success_count += 1;
                    match cert_type {
                        CertificateType::Csca => summary.csca_added += 1,
                        CertificateType::Dsc => summary.dsc_added += 1,
                        CertificateType::DscNc => summary.dsc_nc_added += 1,
                        CertificateType::Mlsc => {}
                    }
                } else {
                    summary.failed_count += 1;
                }
            }
        }

        summary.status = if summary.failed_count == 0 {
            ReconciliationState::Completed
        } else if summary.success_count == 0 {
            ReconciliationState::Failed
        } else {
            ReconciliationState::Partial
        };
        summary.finished_at = Some(Utc::now());
        summary.duration_ms = started.elapsed().as_millis() as i64;
        store.finalize_reconciliation_summary(&summary)?;
        info!(
            "reconciliation {} finished: {} ({} added, {} failed)",
            summary_id,
            summary.status.as_str(),
            summary.success_count,
            summary.failed_count
        );
        Ok(summary)
    }

    /// Process one certificate; returns whether the addition counts as a
    /// success. Log rows are written for both outcomes.
    fn add_one<S, W>(
        &self,
        store: &mut S,
        writer: &mut W,
        run: &ReconcileRun,
        summary_id: i64,
        certificate: &Certificate,
    ) -> Result<bool, PkdError>
    where
        S: CertificateStore + SyncJournal,
        W: DirectoryWriter,
    {
        let dn = self
            .tree
            .certificate_dn(certificate.cert_type, &certificate.country, certificate.id);
        let cn = format!("cert-{}", certificate.id);
        let object_classes: &[&str] = if certificate.cert_type == CertificateType::Csca {
            &CSCA_OBJECT_CLASSES
        } else {
            &PKI_OBJECT_CLASSES
        };
        let pem = der_to_pem(&certificate.binary_der);

        let op_started = Instant::now();
        let outcome = if run.dry_run {
            Ok(())
        } else {
            writer.add_certificate(&dn, object_classes, &cn, &pem)
        };
        let duration_ms = op_started.elapsed().as_millis() as i64;

        let success = outcome.is_ok();
        if success && !run.dry_run {
            store.mark_stored_in_ldap(certificate.id)?;
        }
        if let Err(e) = &outcome {
            error!("reconciliation {}: {}", summary_id, e);
        }

        store.append_reconciliation_log(&ReconciliationLogEntry {
            summary_id,
            certificate_id: certificate.id,
            cert_type: certificate.cert_type,
            operation: ReconcileOperation::Add,
            success,
            dn,
            duration_ms,
            error_message: outcome.err().map(|e| e.to_string()),
        })?;
        Ok(success)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(LdapTree {
            base_dn: "dc=pkd,dc=example,dc=org".to_string(),
        })
    }

    fn run_params(dry_run: bool) -> ReconcileRun {
        ReconcileRun {
            triggered_by: TriggerSource::Manual,
            dry_run,
            sync_status_id: None,
            batch_size: 100,
        }
    }

    fn seeded_store() -> MemoryStore {
        MemoryStore::with_certificates(vec![
            certificate(1, CertificateType::Csca, "FI"),
            certificate(2, CertificateType::Csca, "DE"),
            certificate(3, CertificateType::Csca, "FR"),
            certificate(4, CertificateType::Dsc, "FI"),
            certificate(5, CertificateType::Dsc, "DE"),
        ])
    }

    #[test]
    fn test_full_run_adds_everything() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory::default();
        let summary = engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(false),
            )
            .unwrap();

        assert_eq!(summary.status, ReconciliationState::Completed);
        assert_eq!(summary.csca_added, 3);
        assert_eq!(summary.dsc_added, 2);
        assert_eq!(summary.success_count, 5);
        assert_eq!(summary.failed_count, 0);

        assert_eq!(store.logs.len(), 5);
        assert!(store
            .logs
            .iter()
            .all(|l| l.operation == ReconcileOperation::Add && l.success));
        assert!(store.certificates.iter().all(|c| c.stored_in_ldap));
        assert_eq!(directory.entries.len(), 5);
        assert!(directory
            .entries
            .iter()
            .any(|(dn, _)| dn == "cn=cert-1,o=csca,c=FI,dc=data,dc=download,dc=pkd,dc=example,dc=org"));
        // Payloads are stored as PEM.
        assert!(directory.entries[0].1.starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_csca_processed_before_dsc() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory::default();
        engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(false),
            )
            .unwrap();

        let types: Vec<CertificateType> = store.logs.iter().map(|l| l.cert_type).collect();
        let first_dsc = types
            .iter()
            .position(|t| *t == CertificateType::Dsc)
            .unwrap();
        assert!(types[..first_dsc]
            .iter()
            .all(|t| *t == CertificateType::Csca));
        // Ascending id inside a type.
        let csca_ids: Vec<i64> = store
            .logs
            .iter()
            .filter(|l| l.cert_type == CertificateType::Csca)
            .map(|l| l.certificate_id)
            .collect();
        assert_eq!(csca_ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_rerun_is_noop() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory::default();
        engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(false),
            )
            .unwrap();
        let entries_after_first = directory.entries.len();

        let summary = engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(false),
            )
            .unwrap();
        assert_eq!(summary.status, ReconciliationState::Completed);
        assert_eq!(summary.success_count, 0);
        assert_eq!(directory.entries.len(), entries_after_first);
    }

    #[test]
    fn test_dry_run_leaves_state_untouched() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory::default();
        let summary = engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(true),
            )
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.status, ReconciliationState::Completed);
        assert_eq!(summary.success_count, 5);
        // Logs and counts exist, but neither side changed.
        assert_eq!(store.logs.len(), 5);
        assert!(directory.entries.is_empty());
        assert!(store.certificates.iter().all(|c| !c.stored_in_ldap));
    }

    #[test]
    fn test_partial_on_mixed_outcomes() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory {
            fail_substring: Some("c=DE".to_string()),
            ..MemoryDirectory::default()
        };
        let summary = engine()
            .run(
                &mut store,
                || Ok::<_, PkdError>(&mut directory),
                &run_params(false),
            )
            .unwrap();

        assert_eq!(summary.status, ReconciliationState::Partial);
        assert_eq!(summary.failed_count, 2);
        assert_eq!(summary.success_count, 3);
        let failed: Vec<&ReconciliationLogEntry> =
            store.logs.iter().filter(|l| !l.success).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|l| l.error_message.is_some()));
        // Failed certificates stay pending.
        assert!(store
            .certificates
            .iter()
            .filter(|c| c.country == "DE")
            .all(|c| !c.stored_in_ldap));
    }

    #[test]
    fn test_bind_failure_fails_the_run() {
        let mut store = seeded_store();
        let summary = engine()
            .run(
                &mut store,
                || Err::<MemoryDirectory, _>(PkdError::Ldap("connection refused".to_string())),
                &run_params(false),
            )
            .unwrap();

        assert_eq!(summary.status, ReconciliationState::Failed);
        assert_eq!(summary.success_count, 0);
        assert!(summary.error_message.is_some());
        assert!(store.logs.is_empty());
        assert!(store.certificates.iter().all(|c| !c.stored_in_ldap));
    }

    #[test]
    fn test_batch_size_limits_each_type() {
        let mut store = seeded_store();
        let mut directory = MemoryDirectory::default();
        let run = ReconcileRun {
            batch_size: 2,
            ..run_params(false)
        };
        let summary = engine()
            .run(&mut store, || Ok::<_, PkdError>(&mut directory), &run)
            .unwrap();

        // Two of three CSCAs and both DSCs fit the per-type limit.
        assert_eq!(summary.csca_added, 2);
        assert_eq!(summary.dsc_added, 2);
    }
}
