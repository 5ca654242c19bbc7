use std::collections::HashMap;

use crate::crypto::certs::{extract_dn_attribute, CertificateInfo, CrlInfo};
use crate::utils::PkdError;

/// Lookup of Country Signing CA certificates for trust chain building.
pub trait CscaProvider {
    /// Find the CSCA matching an issuer DN. `country` narrows the search
    /// scope; when absent it is derived from the DN's `C=` attribute.
    /// An empty directory answer is `Ok(None)`, never an error.
    fn find_csca_by_issuer_dn(
        &self,
        issuer_dn: &str,
        country: Option<&str>,
    ) -> Result<Option<CertificateInfo>, PkdError>;

    fn find_all_cscas_by_issuer_dn(
        &self,
        issuer_dn: &str,
    ) -> Result<Vec<CertificateInfo>, PkdError>;
}

/// Lookup of certificate revocation lists by issuing country.
pub trait CrlProvider {
    fn find_crl_by_country(&self, country: &str) -> Result<Option<CrlInfo>, PkdError>;
}

/// Pick the best CSCA among several candidates returned for one scope.
///
/// Match policy: (a) exact case-insensitive equality of the CN extracted
/// from the issuer DN against the candidate subject CN; (b) substring match
/// in either direction; (c) the first candidate as fallback.
pub fn select_csca_candidate<'a>(
    candidates: &'a [CertificateInfo],
    issuer_dn: &str,
) -> Option<&'a CertificateInfo> {
    if candidates.is_empty() {
        return None;
    }
    let wanted_cn = extract_dn_attribute(issuer_dn, "CN").map(|cn| cn.to_ascii_lowercase());

    if let Some(wanted) = &wanted_cn {
        if let Some(exact) = candidates.iter().find(|c| {
            extract_dn_attribute(&c.subject_dn, "CN")
                .map(|cn| cn.to_ascii_lowercase() == *wanted)
                .unwrap_or(false)
        }) {
            return Some(exact);
        }
        if let Some(partial) = candidates.iter().find(|c| {
            extract_dn_attribute(&c.subject_dn, "CN")
                .map(|cn| {
                    let cn = cn.to_ascii_lowercase();
                    cn.contains(wanted.as_str()) || wanted.contains(cn.as_str())
                })
                .unwrap_or(false)
        }) {
            return Some(partial);
        }
    }

    candidates.first()
}

/// Country scope for a lookup: the explicit parameter wins, else the DN's
/// `C=` attribute. Always upper-cased.
pub fn resolve_country(issuer_dn: &str, country: Option<&str>) -> Option<String> {
    country
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .or_else(|| extract_dn_attribute(issuer_dn, "C"))
        .map(|c| c.to_ascii_uppercase())
}

/// Trust material held in memory. Backs offline verification against
/// operator-supplied certificate files and the engine test suites.
#[derive(Debug, Clone, Default)]
pub struct FixedTrustStore {
    cscas: Vec<CertificateInfo>,
    crls: HashMap<String, CrlInfo>,
}

impl FixedTrustStore {
    pub fn new() -> Self {
        FixedTrustStore::default()
    }

    pub fn add_csca(&mut self, csca: CertificateInfo) {
        self.cscas.push(csca);
    }

    pub fn add_crl(&mut self, country: &str, crl: CrlInfo) {
        self.crls.insert(country.to_ascii_uppercase(), crl);
    }
}

impl CscaProvider for FixedTrustStore {
    fn find_csca_by_issuer_dn(
        &self,
        issuer_dn: &str,
        country: Option<&str>,
    ) -> Result<Option<CertificateInfo>, PkdError> {
        let scope = resolve_country(issuer_dn, country);
        let in_scope: Vec<CertificateInfo> = self
            .cscas
            .iter()
            .filter(|c| match &scope {
                Some(cc) => c.country().as_deref() == Some(cc.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        Ok(select_csca_candidate(&in_scope, issuer_dn).cloned())
    }

    fn find_all_cscas_by_issuer_dn(
        &self,
        issuer_dn: &str,
    ) -> Result<Vec<CertificateInfo>, PkdError> {
        let scope = resolve_country(issuer_dn, None);
        Ok(self
            .cscas
            .iter()
            .filter(|c| match &scope {
                Some(cc) => c.country().as_deref() == Some(cc.as_str()),
                None => true,
            })
            .cloned()
            .collect())
    }
}

impl CrlProvider for FixedTrustStore {
    fn find_crl_by_country(&self, country: &str) -> Result<Option<CrlInfo>, PkdError> {
        Ok(self.crls.get(&country.to_ascii_uppercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn candidate(subject_dn: &str) -> CertificateInfo {
        CertificateInfo {
            der: vec![0x30],
            subject_dn: subject_dn.to_string(),
            issuer_dn: subject_dn.to_string(),
            serial: "01".to_string(),
            not_before: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            not_after: Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap(),
            signature_algorithm_oid: "1.2.840.113549.1.1.11".to_string(),
            public_key: Vec::new(),
            public_key_algorithm_oid: "1.2.840.113549.1.1.1".to_string(),
        }
    }

    #[test]
    fn test_exact_cn_match_wins() {
        let candidates = vec![
            candidate("CN=CSCA-OLD, C=FI"),
            candidate("CN=CSCA-FI, C=FI"),
        ];
        let chosen = select_csca_candidate(&candidates, "CN=csca-fi, C=FI").unwrap();
        assert_eq!(chosen.subject_dn, "CN=CSCA-FI, C=FI");
    }

    #[test]
    fn test_substring_match_second() {
        let candidates = vec![
            candidate("CN=Other, C=FI"),
            candidate("CN=CSCA-FI-2024, C=FI"),
        ];
        let chosen = select_csca_candidate(&candidates, "CN=CSCA-FI, C=FI").unwrap();
        assert_eq!(chosen.subject_dn, "CN=CSCA-FI-2024, C=FI");
    }

    #[test]
    fn test_fallback_to_first() {
        let candidates = vec![
            candidate("CN=Alpha, C=FI"),
            candidate("CN=Beta, C=FI"),
        ];
        let chosen = select_csca_candidate(&candidates, "O=NoCommonName, C=FI").unwrap();
        assert_eq!(chosen.subject_dn, "CN=Alpha, C=FI");
    }

    #[test]
    fn test_empty_candidates() {
        assert!(select_csca_candidate(&[], "CN=Anything").is_none());
    }

    #[test]
    fn test_resolve_country() {
        assert_eq!(
            resolve_country("CN=CSCA, C=fi", None).as_deref(),
            Some("FI")
        );
        assert_eq!(
            resolve_country("CN=CSCA, C=FI", Some("de")).as_deref(),
            Some("DE")
        );
        assert_eq!(resolve_country("CN=NoCountry", None), None);
    }

    #[test]
    fn test_fixed_store_scopes_by_country() {
        let mut store = FixedTrustStore::new();
        store.add_csca(candidate("CN=CSCA-FI, C=FI"));
        store.add_csca(candidate("CN=CSCA-DE, C=DE"));

        let hit = store
            .find_csca_by_issuer_dn("CN=CSCA-DE, C=DE", None)
            .unwrap()
            .unwrap();
        assert_eq!(hit.subject_dn, "CN=CSCA-DE, C=DE");

        let miss = store
            .find_csca_by_issuer_dn("CN=CSCA-ZZ, C=ZZ", None)
            .unwrap();
        assert!(miss.is_none());
    }
}
