use chrono::{DateTime, TimeZone, Utc};
use ring::signature::{self, UnparsedPublicKey};
use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::utils::PkdError;

pub const OID_SHA1_WITH_RSA: &str = "1.2.840.113549.1.1.5";
pub const OID_SHA256_WITH_RSA: &str = "1.2.840.113549.1.1.11";
pub const OID_SHA384_WITH_RSA: &str = "1.2.840.113549.1.1.12";
pub const OID_SHA512_WITH_RSA: &str = "1.2.840.113549.1.1.13";
pub const OID_RSASSA_PSS: &str = "1.2.840.113549.1.1.10";
pub const OID_ECDSA_WITH_SHA256: &str = "1.2.840.10045.4.3.2";
pub const OID_ECDSA_WITH_SHA384: &str = "1.2.840.10045.4.3.3";
pub const OID_ECDSA_WITH_SHA512: &str = "1.2.840.10045.4.3.4";

/// Owned view of an X.509 certificate.
///
/// `x509-parser` certificates borrow their input buffer, so the fields the
/// rest of the system needs are extracted eagerly and the DER is kept for
/// re-parsing in the signature paths.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub der: Vec<u8>,
    pub subject_dn: String,
    pub issuer_dn: String,
    /// Serial number, uppercase hex without leading zero octets.
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub signature_algorithm_oid: String,
    /// Content of the subjectPublicKey BIT STRING.
    pub public_key: Vec<u8>,
    /// Algorithm OID of the SubjectPublicKeyInfo (RSA vs EC).
    pub public_key_algorithm_oid: String,
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> Result<CertificateInfo, PkdError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkdError::Certificate(format!("failed to parse certificate: {:?}", e)))?;

        let not_before = asn1_time_to_utc(&cert.validity().not_before)?;
        let not_after = asn1_time_to_utc(&cert.validity().not_after)?;

        Ok(CertificateInfo {
            der: der.to_vec(),
            subject_dn: cert.subject().to_string(),
            issuer_dn: cert.issuer().to_string(),
            serial: serial_to_hex(cert.raw_serial()),
            not_before,
            not_after,
            signature_algorithm_oid: cert.signature_algorithm.algorithm.to_id_string(),
            public_key: cert.public_key().subject_public_key.data.to_vec(),
            public_key_algorithm_oid: cert
                .public_key()
                .algorithm
                .algorithm
                .to_id_string(),
        })
    }

    /// SHA-256 fingerprint of the DER encoding, lowercase hex.
    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    pub fn to_pem(&self) -> String {
        der_to_pem(&self.der)
    }

    /// Country code from the subject DN `C=` attribute, upper-cased.
    pub fn country(&self) -> Option<String> {
        extract_dn_attribute(&self.subject_dn, "C").map(|c| c.to_ascii_uppercase())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.not_after
    }

    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Verify that this certificate was signed by the holder of `issuer`'s
    /// public key. The verification parameters are chosen from this
    /// certificate's signature algorithm and the issuer key type.
    pub fn verify_signed_by(&self, issuer: &CertificateInfo) -> Result<(), PkdError> {
        let (_, cert) = X509Certificate::from_der(&self.der)
            .map_err(|e| PkdError::Certificate(format!("failed to parse certificate: {:?}", e)))?;
        let tbs = cert.tbs_certificate.as_ref();
        let sig = cert.signature_value.as_ref();

        verify_signature(
            &issuer.public_key,
            &self.signature_algorithm_oid,
            tbs,
            sig,
        )
    }
}

/// Verify `signature` over `message` with the given subjectPublicKey content.
/// Tries every `ring` parameter set compatible with the signature algorithm
/// OID (RSA key sizes 2048..8192; P-256 and P-384 curves for ECDSA).
pub fn verify_signature(
    public_key: &[u8],
    signature_algorithm_oid: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), PkdError> {
    let candidates: &[&'static dyn signature::VerificationAlgorithm] = match signature_algorithm_oid {
        OID_SHA1_WITH_RSA => &[&signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY],
        OID_SHA256_WITH_RSA => &[&signature::RSA_PKCS1_2048_8192_SHA256],
        OID_SHA384_WITH_RSA => &[&signature::RSA_PKCS1_2048_8192_SHA384],
        OID_SHA512_WITH_RSA => &[&signature::RSA_PKCS1_2048_8192_SHA512],
        OID_RSASSA_PSS => &[
            &signature::RSA_PSS_2048_8192_SHA256,
            &signature::RSA_PSS_2048_8192_SHA384,
            &signature::RSA_PSS_2048_8192_SHA512,
        ],
        OID_ECDSA_WITH_SHA256 => &[
            &signature::ECDSA_P256_SHA256_ASN1,
            &signature::ECDSA_P384_SHA256_ASN1,
        ],
        OID_ECDSA_WITH_SHA384 => &[
            &signature::ECDSA_P384_SHA384_ASN1,
            &signature::ECDSA_P256_SHA384_ASN1,
        ],
        OID_ECDSA_WITH_SHA512 => {
            return Err(PkdError::Signature(
                "ECDSA with SHA-512 is not supported by the verifier".to_string(),
            ));
        }
        other => {
            return Err(PkdError::Signature(format!(
                "unsupported signature algorithm {}",
                other
            )));
        }
    };

    for params in candidates {
        if UnparsedPublicKey::new(*params, public_key)
            .verify(message, signature)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(PkdError::Signature(format!(
        "signature verification failed ({})",
        signature_algorithm_oid
    )))
}

/// Owned view of an X.509 CRL.
#[derive(Debug, Clone)]
pub struct CrlInfo {
    pub der: Vec<u8>,
    pub issuer_dn: String,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    /// Revoked serials (uppercase hex) with their revocation dates.
    pub revoked: Vec<(String, DateTime<Utc>)>,
}

impl CrlInfo {
    pub fn from_der(der: &[u8]) -> Result<CrlInfo, PkdError> {
        let (_, crl) = CertificateRevocationList::from_der(der)
            .map_err(|e| PkdError::Certificate(format!("failed to parse CRL: {:?}", e)))?;

        let this_update = asn1_time_to_utc(&crl.tbs_cert_list.this_update)?;
        let next_update = match &crl.tbs_cert_list.next_update {
            Some(t) => Some(asn1_time_to_utc(t)?),
            None => None,
        };

        let mut revoked = Vec::new();
        for entry in crl.iter_revoked_certificates() {
            revoked.push((
                serial_to_hex(entry.raw_serial()),
                asn1_time_to_utc(&entry.revocation_date)?,
            ));
        }

        Ok(CrlInfo {
            der: der.to_vec(),
            issuer_dn: crl.tbs_cert_list.issuer.to_string(),
            this_update,
            next_update,
            revoked,
        })
    }

    pub fn fingerprint_sha256(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_update, Some(next) if next < now)
    }

    /// Look up a serial (uppercase hex, leading zeros ignored) and return the
    /// revocation date when listed.
    pub fn revocation_date(&self, serial: &str) -> Option<DateTime<Utc>> {
        let wanted = normalize_serial(serial);
        self.revoked
            .iter()
            .find(|(s, _)| normalize_serial(s) == wanted)
            .map(|(_, date)| *date)
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}

/// Render DER as a CERTIFICATE PEM block.
pub fn der_to_pem(der: &[u8]) -> String {
    ::pem::encode(&::pem::Pem::new("CERTIFICATE", der.to_vec()))
}

/// Case-insensitive RDN attribute lookup in a comma-separated DN string.
/// `extract_dn_attribute("CN=CSCA-FI,O=Gov,C=FI", "c")` yields `Some("FI")`.
pub fn extract_dn_attribute(dn: &str, key: &str) -> Option<String> {
    for part in dn.split(',') {
        let part = part.trim();
        if let Some((attr, value)) = part.split_once('=') {
            if attr.trim().eq_ignore_ascii_case(key) {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

fn serial_to_hex(raw: &[u8]) -> String {
    let trimmed: &[u8] = {
        let mut s = raw;
        while s.len() > 1 && s[0] == 0 {
            s = &s[1..];
        }
        s
    };
    hex::encode_upper(trimmed)
}

fn normalize_serial(serial: &str) -> String {
    let upper = serial.trim().to_ascii_uppercase();
    let stripped = upper.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

fn asn1_time_to_utc(time: &ASN1Time) -> Result<DateTime<Utc>, PkdError> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| PkdError::Certificate("certificate time out of range".to_string()))
}
