use std::time::Duration;

use ldap3::{LdapConn, LdapConnSettings, Scope, SearchEntry, SearchOptions};
use log::warn;

use crate::crypto::certs::{CertificateInfo, CrlInfo};
use crate::models::CertificateType;
use crate::trust::providers::{
    resolve_country, select_csca_candidate, CrlProvider, CscaProvider,
};
use crate::utils::PkdError;

pub const ATTR_USER_CERTIFICATE: &str = "userCertificate;binary";
pub const ATTR_CRL: &str = "certificateRevocationList;binary";
pub const FILTER_PKD_DOWNLOAD: &str = "(objectClass=pkdDownload)";

/// Focused lookups (one country, one type) are bounded tighter than the
/// subtree statistics sweeps.
pub const LOOKUP_TIME_LIMIT_SECS: i32 = 10;
pub const SUBTREE_TIME_LIMIT_SECS: i32 = 60;
const LOOKUP_SIZE_LIMIT: i32 = 50;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// One LDAP endpoint with its bind credentials. The read endpoint may be a
/// load-balancer URI; reconciliation binds to the write endpoint instead.
#[derive(Debug, Clone)]
pub struct LdapSettings {
    pub host: String,
    pub port: u16,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
}

impl LdapSettings {
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }

    pub fn tree(&self) -> LdapTree {
        LdapTree {
            base_dn: self.base_dn.clone(),
        }
    }

    /// Open a connection and perform a simple bind. Connections are
    /// per-operation; callers unbind when done.
    pub fn connect(&self) -> Result<LdapConn, PkdError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS));
        let mut conn = LdapConn::with_settings(settings, &self.url())?;
        conn.simple_bind(&self.bind_dn, &self.bind_password)?
            .success()
            .map_err(|e| PkdError::Ldap(format!("bind to {} failed: {}", self.url(), e)))?;
        Ok(conn)
    }
}

/// DN construction for the ICAO download tree
/// `dc=<data|nc-data>,dc=download,<base>`.
#[derive(Debug, Clone)]
pub struct LdapTree {
    pub base_dn: String,
}

impl LdapTree {
    pub fn data_root(&self) -> String {
        format!("dc=data,dc=download,{}", self.base_dn)
    }

    pub fn nc_data_root(&self) -> String {
        format!("dc=nc-data,dc=download,{}", self.base_dn)
    }

    pub fn csca_base(&self, country: &str) -> String {
        format!("o=csca,c={},{}", country, self.data_root())
    }

    pub fn crl_base(&self, country: &str) -> String {
        format!("o=crl,c={},{}", country, self.data_root())
    }

    /// Leaf DN for a certificate row, `cn=cert-<id>` under the per-type
    /// organization. Non-conformant DSCs live in the nc-data subtree.
    pub fn certificate_dn(
        &self,
        cert_type: CertificateType,
        country: &str,
        certificate_id: i64,
    ) -> String {
        let (org, root) = match cert_type {
            CertificateType::Csca | CertificateType::Mlsc => ("csca", self.data_root()),
            CertificateType::Dsc => ("dsc", self.data_root()),
            CertificateType::DscNc => ("dsc", self.nc_data_root()),
        };
        format!("cn=cert-{},o={},c={},{}", certificate_id, org, country, root)
    }
}

/// Decode an LDAP certificate attribute value. The tree stores PEM inside
/// `userCertificate;binary`, but foreign writers occasionally store raw DER.
pub fn decode_certificate_value(value: &[u8]) -> Result<CertificateInfo, PkdError> {
    if value.starts_with(b"-----BEGIN") {
        let block = pem::parse(value)
            .map_err(|e| PkdError::Certificate(format!("invalid PEM in directory: {}", e)))?;
        CertificateInfo::from_der(block.contents())
    } else {
        CertificateInfo::from_der(value)
    }
}

fn binary_values(entry: &SearchEntry, attr: &str) -> Vec<Vec<u8>> {
    if let Some(values) = entry.bin_attrs.get(attr) {
        return values.clone();
    }
    // ASCII PEM payloads can surface as string attributes.
    entry
        .attrs
        .get(attr)
        .map(|values| values.iter().map(|v| v.as_bytes().to_vec()).collect())
        .unwrap_or_default()
}

/// CSCA lookup against the read endpoint of the public directory.
pub struct LdapCscaProvider {
    settings: LdapSettings,
}

impl LdapCscaProvider {
    pub fn new(settings: LdapSettings) -> Self {
        LdapCscaProvider { settings }
    }

    fn search_country(&self, country: &str) -> Result<Vec<CertificateInfo>, PkdError> {
        let base = self.settings.tree().csca_base(country);
        let mut conn = self.settings.connect()?;
        let search = conn
            .with_search_options(
                SearchOptions::new()
                    .sizelimit(LOOKUP_SIZE_LIMIT)
                    .timelimit(LOOKUP_TIME_LIMIT_SECS),
            )
            .search(
                &base,
                Scope::Subtree,
                FILTER_PKD_DOWNLOAD,
                vec![ATTR_USER_CERTIFICATE],
            );
        let entries = match search.and_then(|r| r.success()) {
            Ok((entries, _)) => entries,
            Err(e) => {
                // A missing country subtree answers "no such object"; that is
                // an absent CSCA, not a failure.
                warn!("CSCA search under {} returned nothing: {}", base, e);
                conn.unbind().ok();
                return Ok(Vec::new());
            }
        };
        conn.unbind().ok();

        let mut certificates = Vec::new();
        for raw in entries {
            let entry = SearchEntry::construct(raw);
            for value in binary_values(&entry, ATTR_USER_CERTIFICATE) {
                match decode_certificate_value(&value) {
                    Ok(cert) => certificates.push(cert),
                    Err(e) => warn!("skipping undecodable certificate at {}: {}", entry.dn, e),
                }
            }
        }
        Ok(certificates)
    }
}

impl CscaProvider for LdapCscaProvider {
    fn find_csca_by_issuer_dn(
        &self,
        issuer_dn: &str,
        country: Option<&str>,
    ) -> Result<Option<CertificateInfo>, PkdError> {
        let Some(country) = resolve_country(issuer_dn, country) else {
            return Ok(None);
        };
        let candidates = self.search_country(&country)?;
        Ok(select_csca_candidate(&candidates, issuer_dn).cloned())
    }

    fn find_all_cscas_by_issuer_dn(
        &self,
        issuer_dn: &str,
    ) -> Result<Vec<CertificateInfo>, PkdError> {
        match resolve_country(issuer_dn, None) {
            Some(country) => self.search_country(&country),
            None => Ok(Vec::new()),
        }
    }
}

/// CRL lookup against the read endpoint.
pub struct LdapCrlProvider {
    settings: LdapSettings,
}

impl LdapCrlProvider {
    pub fn new(settings: LdapSettings) -> Self {
        LdapCrlProvider { settings }
    }
}

impl CrlProvider for LdapCrlProvider {
    fn find_crl_by_country(&self, country: &str) -> Result<Option<CrlInfo>, PkdError> {
        let country = country.to_ascii_uppercase();
        let base = self.settings.tree().crl_base(&country);
        let mut conn = self.settings.connect()?;
        let search = conn
            .with_search_options(
                SearchOptions::new()
                    .sizelimit(LOOKUP_SIZE_LIMIT)
                    .timelimit(LOOKUP_TIME_LIMIT_SECS),
            )
            .search(&base, Scope::Subtree, FILTER_PKD_DOWNLOAD, vec![ATTR_CRL]);
        let entries = match search.and_then(|r| r.success()) {
            Ok((entries, _)) => entries,
            Err(e) => {
                warn!("CRL search under {} returned nothing: {}", base, e);
                conn.unbind().ok();
                return Ok(None);
            }
        };
        conn.unbind().ok();

        for raw in entries {
            let entry = SearchEntry::construct(raw);
            for value in binary_values(&entry, ATTR_CRL) {
                match CrlInfo::from_der(&value) {
                    Ok(crl) => return Ok(Some(crl)),
                    Err(e) => warn!("skipping undecodable CRL at {}: {}", entry.dn, e),
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LdapTree {
        LdapTree {
            base_dn: "dc=pkd,dc=example,dc=org".to_string(),
        }
    }

    #[test]
    fn test_search_bases() {
        let t = tree();
        assert_eq!(
            t.csca_base("FI"),
            "o=csca,c=FI,dc=data,dc=download,dc=pkd,dc=example,dc=org"
        );
        assert_eq!(
            t.crl_base("DE"),
            "o=crl,c=DE,dc=data,dc=download,dc=pkd,dc=example,dc=org"
        );
    }

    #[test]
    fn test_certificate_dns() {
        let t = tree();
        assert_eq!(
            t.certificate_dn(CertificateType::Csca, "FI", 7),
            "cn=cert-7,o=csca,c=FI,dc=data,dc=download,dc=pkd,dc=example,dc=org"
        );
        assert_eq!(
            t.certificate_dn(CertificateType::Dsc, "FI", 8),
            "cn=cert-8,o=dsc,c=FI,dc=data,dc=download,dc=pkd,dc=example,dc=org"
        );
        assert_eq!(
            t.certificate_dn(CertificateType::DscNc, "FI", 9),
            "cn=cert-9,o=dsc,c=FI,dc=nc-data,dc=download,dc=pkd,dc=example,dc=org"
        );
    }

    #[test]
    fn test_settings_url() {
        let settings = LdapSettings {
            host: "ldap.internal".to_string(),
            port: 389,
            bind_dn: "cn=admin".to_string(),
            bind_password: "secret".to_string(),
            base_dn: "dc=pkd".to_string(),
        };
        assert_eq!(settings.url(), "ldap://ldap.internal:389");
    }
}
