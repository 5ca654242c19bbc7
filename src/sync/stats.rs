use std::collections::HashMap;

use chrono::Utc;
use ldap3::{Scope, SearchEntry, SearchOptions};
use log::{info, warn};
use serde_json::json;

use crate::models::{CertificateType, SyncState, SyncStatus};
use crate::store::DbStatsSource;
use crate::trust::ldap::{LdapSettings, FILTER_PKD_DOWNLOAD, SUBTREE_TIME_LIMIT_SECS};
use crate::utils::PkdError;

/// Per-type and per-country certificate counts on the database side.
#[derive(Debug, Clone, Default)]
pub struct DbStats {
    pub csca: i64,
    pub dsc: i64,
    pub dsc_nc: i64,
    pub crl: i64,
    pub stored_in_ldap: i64,
    pub by_country: HashMap<(String, CertificateType), i64>,
}

/// Counts observed in the public LDAP tree.
#[derive(Debug, Clone, Default)]
pub struct LdapStats {
    pub csca: i64,
    pub dsc: i64,
    pub dsc_nc: i64,
    pub crl: i64,
    pub by_country: HashMap<(String, CertificateType), i64>,
}

/// Aggregate the database-side statistics.
pub fn collect_db_stats(source: &mut dyn DbStatsSource) -> Result<DbStats, PkdError> {
    let by_type = source.certificate_counts_by_type()?;
    let by_country = source.certificate_counts_by_country()?;
    Ok(DbStats {
        csca: by_type.get(&CertificateType::Csca).copied().unwrap_or(0),
        dsc: by_type.get(&CertificateType::Dsc).copied().unwrap_or(0),
        dsc_nc: by_type.get(&CertificateType::DscNc).copied().unwrap_or(0),
        crl: source.crl_count()?,
        stored_in_ldap: source.stored_in_ldap_count()?,
        by_country,
    })
}

/// Entry classification derived from a directory DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Csca,
    Dsc,
    Crl,
}

/// Classify a directory entry by the `o=` RDN in its DN and extract the
/// `c=` country. Returns `None` for structural entries (country nodes,
/// organization nodes themselves carry the RDN but no `cn=` leaf).
pub fn classify_dn(dn: &str) -> Option<(EntryKind, String)> {
    let lower = dn.to_ascii_lowercase();
    if !lower.starts_with("cn=") {
        return None;
    }
    let kind = if lower.contains("o=csca") {
        EntryKind::Csca
    } else if lower.contains("o=dsc") {
        EntryKind::Dsc
    } else if lower.contains("o=crl") {
        EntryKind::Crl
    } else {
        return None;
    };
    let country = lower
        .split(',')
        .map(str::trim)
        .find_map(|rdn| rdn.strip_prefix("c="))
        .map(|c| c.to_ascii_uppercase())?;
    Some((kind, country))
}

/// Subtree counting against the read endpoint.
pub struct LdapStatsCollector {
    settings: LdapSettings,
}

impl LdapStatsCollector {
    pub fn new(settings: LdapSettings) -> Self {
        LdapStatsCollector { settings }
    }

    pub fn collect(&self) -> Result<LdapStats, PkdError> {
        let tree = self.settings.tree();
        let mut stats = LdapStats::default();

        // Conformant data subtree.
        for dn in self.search_dns(&tree.data_root())? {
            let Some((kind, country)) = classify_dn(&dn) else {
                continue;
            };
            match kind {
                EntryKind::Csca => {
                    stats.csca += 1;
                    *stats
                        .by_country
                        .entry((country, CertificateType::Csca))
                        .or_insert(0) += 1;
                }
                EntryKind::Dsc => {
                    stats.dsc += 1;
                    *stats
                        .by_country
                        .entry((country, CertificateType::Dsc))
                        .or_insert(0) += 1;
                }
                EntryKind::Crl => stats.crl += 1,
            }
        }

        // Non-conformant subtree: every certificate entry counts as DSC_NC.
        for dn in self.search_dns(&tree.nc_data_root())? {
            if let Some((EntryKind::Dsc | EntryKind::Csca, country)) = classify_dn(&dn) {
                stats.dsc_nc += 1;
                *stats
                    .by_country
                    .entry((country, CertificateType::DscNc))
                    .or_insert(0) += 1;
            }
        }

        Ok(stats)
    }

    fn search_dns(&self, base: &str) -> Result<Vec<String>, PkdError> {
        let mut conn = self.settings.connect()?;
        let search = conn
            .with_search_options(SearchOptions::new().timelimit(SUBTREE_TIME_LIMIT_SECS))
            .search(base, Scope::Subtree, FILTER_PKD_DOWNLOAD, vec!["1.1"]);
        let entries = match search.and_then(|r| r.success()) {
            Ok((entries, _)) => entries,
            Err(e) => {
                warn!("subtree search under {} failed: {}", base, e);
                conn.unbind().ok();
                return Ok(Vec::new());
            }
        };
        conn.unbind().ok();
        Ok(entries
            .into_iter()
            .map(|raw| SearchEntry::construct(raw).dn)
            .collect())
    }
}

/// Build the snapshot record from both sides of the comparison.
pub fn build_sync_status(db: &DbStats, ldap: &LdapStats, duration_ms: i64) -> SyncStatus {
    let csca_discrepancy = (db.csca - ldap.csca).abs();
    let dsc_discrepancy = (db.dsc - ldap.dsc).abs();
    let dsc_nc_discrepancy = (db.dsc_nc - ldap.dsc_nc).abs();
    let crl_discrepancy = (db.crl - ldap.crl).abs();
    let total_discrepancy =
        csca_discrepancy + dsc_discrepancy + dsc_nc_discrepancy + crl_discrepancy;

    let status = if total_discrepancy == 0 {
        SyncState::Synced
    } else {
        SyncState::Discrepancy
    };
    if status == SyncState::Discrepancy {
        info!(
            "sync check found {} discrepancies (csca {}, dsc {}, dsc_nc {}, crl {})",
            total_discrepancy, csca_discrepancy, dsc_discrepancy, dsc_nc_discrepancy,
            crl_discrepancy
        );
    }

    SyncStatus {
        id: None,
        check_time: Utc::now(),
        status,
        csca_db_count: db.csca,
        dsc_db_count: db.dsc,
        dsc_nc_db_count: db.dsc_nc,
        crl_db_count: db.crl,
        csca_ldap_count: ldap.csca,
        dsc_ldap_count: ldap.dsc,
        dsc_nc_ldap_count: ldap.dsc_nc,
        crl_ldap_count: ldap.crl,
        csca_discrepancy,
        dsc_discrepancy,
        dsc_nc_discrepancy,
        crl_discrepancy,
        total_discrepancy,
        duration_ms,
        db_country_breakdown: country_breakdown_json(&db.by_country),
        ldap_country_breakdown: country_breakdown_json(&ldap.by_country),
    }
}

/// `{"FI": {"CSCA": 2, "DSC": 14}, ...}` as a JSON string.
fn country_breakdown_json(counts: &HashMap<(String, CertificateType), i64>) -> String {
    let mut by_country: HashMap<&str, serde_json::Map<String, serde_json::Value>> = HashMap::new();
    for ((country, cert_type), count) in counts {
        by_country
            .entry(country)
            .or_default()
            .insert(cert_type.as_str().to_string(), json!(count));
    }
    serde_json::to_string(&by_country).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_dn() {
        let (kind, country) =
            classify_dn("cn=cert-12,o=csca,c=FI,dc=data,dc=download,dc=pkd").unwrap();
        assert_eq!(kind, EntryKind::Csca);
        assert_eq!(country, "FI");

        let (kind, _) = classify_dn("cn=crl-1,o=crl,c=de,dc=data,dc=download,dc=pkd").unwrap();
        assert_eq!(kind, EntryKind::Crl);

        // Structural nodes are not records.
        assert!(classify_dn("o=csca,c=FI,dc=data,dc=download,dc=pkd").is_none());
        assert!(classify_dn("cn=cert-1,o=misc,c=FI,dc=data").is_none());
    }

    fn db(csca: i64, dsc: i64, dsc_nc: i64, crl: i64) -> DbStats {
        DbStats {
            csca,
            dsc,
            dsc_nc,
            crl,
            stored_in_ldap: 0,
            by_country: HashMap::new(),
        }
    }

    fn ldap(csca: i64, dsc: i64, dsc_nc: i64, crl: i64) -> LdapStats {
        LdapStats {
            csca,
            dsc,
            dsc_nc,
            crl,
            by_country: HashMap::new(),
        }
    }

    #[test]
    fn test_synced_snapshot() {
        let status = build_sync_status(&db(10, 20, 3, 4), &ldap(10, 20, 3, 4), 12);
        assert_eq!(status.status, SyncState::Synced);
        assert_eq!(status.total_discrepancy, 0);
    }

    #[test]
    fn test_discrepancy_snapshot() {
        // DB 10 CSCA vs LDAP 7, everything else equal.
        let status = build_sync_status(&db(10, 20, 3, 4), &ldap(7, 20, 3, 4), 12);
        assert_eq!(status.status, SyncState::Discrepancy);
        assert_eq!(status.csca_discrepancy, 3);
        assert_eq!(status.total_discrepancy, 3);
    }

    #[test]
    fn test_total_is_sum_of_absolute_differences() {
        let status = build_sync_status(&db(10, 18, 5, 4), &ldap(7, 20, 3, 4), 0);
        // |10-7| + |18-20| + |5-3| + |4-4| = 3 + 2 + 2 + 0
        assert_eq!(status.total_discrepancy, 7);
        assert_eq!(status.dsc_discrepancy, 2);
        assert_eq!(status.dsc_nc_discrepancy, 2);
    }

    #[test]
    fn test_country_breakdown_json() {
        let mut counts = HashMap::new();
        counts.insert(("FI".to_string(), CertificateType::Csca), 2);
        counts.insert(("FI".to_string(), CertificateType::Dsc), 14);
        let json_text = country_breakdown_json(&counts);
        let parsed: serde_json::Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(parsed["FI"]["CSCA"], 2);
        assert_eq!(parsed["FI"]["DSC"], 14);
    }
}
