use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::Serialize;

use crate::crypto::certs::CertificateInfo;
use crate::crypto::hash::{calculate_hash, HashAlgorithm};
use crate::crypto::{unwrap_sod, CrlInfo, SodParser};
use crate::models::pa::codes;
use crate::models::{
    CertificateChainValidation, CrlCheck, CrlStatus, DataGroupCheck, DataGroupValidation,
    ErrorSeverity, PaDataGroupRecord, PaRequest, PaResult, PaStatus, PaVerificationRecord,
    SodSignatureValidation,
};
use crate::parsers::{dg2, mrz::MrzParser, FaceImage, MrzData};
use crate::store::PaStore;
use crate::trust::{CrlProvider, CscaProvider};

static VERIFICATION_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_verification_id() -> String {
    let seq = VERIFICATION_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:04x}", Utc::now().timestamp_millis(), seq & 0xFFFF)
}

/// The overall-status law: VALID exactly when the trust chain holds, the DSC
/// is not revoked, the SOD signature verifies and no data group hash failed.
pub fn overall_status(
    trust_chain_valid: bool,
    revoked: bool,
    sod_signature_valid: bool,
    invalid_groups: u32,
) -> PaStatus {
    if trust_chain_valid && !revoked && sod_signature_valid && invalid_groups == 0 {
        PaStatus::Valid
    } else {
        PaStatus::Invalid
    }
}

/// Passive Authentication verifier over a CSCA and a CRL source.
pub struct PaVerifier<C: CscaProvider, R: CrlProvider> {
    csca_provider: C,
    crl_provider: R,
}

impl<C: CscaProvider, R: CrlProvider> PaVerifier<C, R> {
    pub fn new(csca_provider: C, crl_provider: R) -> Self {
        PaVerifier {
            csca_provider,
            crl_provider,
        }
    }

    /// Run the verification sequence. Never fails: malformed input yields a
    /// result with status ERROR, verification findings yield INVALID.
    pub fn verify(&self, request: &PaRequest) -> PaResult {
        let started = Instant::now();
        let mut result = PaResult::new(next_verification_id());
        result.issuing_country = request
            .issuing_country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_ascii_uppercase());
        result.document_number = request
            .document_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string);

        // Step 1: transport decoding.
        let sod_raw = match request.decode_sod() {
            Ok(sod) => sod,
            Err(e) => {
                let code = if request.sod.as_deref().map(str::trim).unwrap_or("").is_empty() {
                    codes::MISSING_SOD
                } else {
                    codes::INVALID_SOD
                };
                result.push_error(code, e.to_string(), ErrorSeverity::Critical);
                result.processing_duration_ms = started.elapsed().as_millis() as i64;
                return result;
            }
        };
        let data_groups = match request.decode_data_groups() {
            Ok(groups) => groups,
            Err(e) => {
                result.push_error(codes::INVALID_REQUEST, e.to_string(), ErrorSeverity::Critical);
                result.processing_duration_ms = started.elapsed().as_millis() as i64;
                return result;
            }
        };
        let sod = match unwrap_sod(&sod_raw) {
            Ok(inner) => inner.to_vec(),
            Err(e) => {
                result.push_error(codes::INVALID_SOD, e.to_string(), ErrorSeverity::Critical);
                result.processing_duration_ms = started.elapsed().as_millis() as i64;
                return result;
            }
        };

        // Step 2: extract the Document Signer Certificate.
        let dsc = match SodParser::extract_dsc(&sod)
            .and_then(|der| CertificateInfo::from_der(&der))
        {
            Ok(dsc) => dsc,
            Err(e) => {
                result.push_error(codes::INVALID_SOD, e.to_string(), ErrorSeverity::Critical);
                result.processing_duration_ms = started.elapsed().as_millis() as i64;
                return result;
            }
        };
        if result.issuing_country.is_none() {
            result.issuing_country = dsc.country();
        }
        if result.document_number.is_none() {
            result.document_number = extract_document_number(&data_groups, request);
        }

        // Step 3: CSCA lookup for the DSC issuer.
        let csca = match self
            .csca_provider
            .find_csca_by_issuer_dn(&dsc.issuer_dn, result.issuing_country.as_deref())
        {
            Ok(csca) => csca,
            Err(e) => {
                warn!("CSCA lookup for '{}' failed: {}", dsc.issuer_dn, e);
                None
            }
        };

        // Step 4: trust chain verification.
        let chain = build_chain_validation(&dsc, csca.as_ref(), Utc::now(), &mut result);
        result.certificate_chain_validation = chain;

        // Step 5: SOD signature verification against the DSC alone.
        let sod_signature = verify_sod_signature(&sod, &dsc, &mut result);
        result.sod_signature_validation = sod_signature;

        // Step 6: data group hash comparison.
        let algorithm = result
            .sod_signature_validation
            .hash_algorithm
            .as_deref()
            .map(HashAlgorithm::from_name)
            .unwrap_or(HashAlgorithm::Sha256);
        let data_group_validation = match SodParser::dg_hashes(&sod) {
            Ok(expected) => compare_data_groups(&expected, &data_groups, algorithm),
            Err(e) => {
                result.push_error(
                    codes::INVALID_SOD,
                    format!("LDSSecurityObject unreadable: {}", e),
                    ErrorSeverity::Critical,
                );
                compare_data_groups(&BTreeMap::new(), &data_groups, algorithm)
            }
        };
        result.data_group_validation = data_group_validation;
        if result.data_group_validation.invalid > 0 {
            let failed: Vec<String> = result
                .data_group_validation
                .groups
                .iter()
                .filter(|(_, check)| !check.valid)
                .map(|(label, _)| label.clone())
                .collect();
            result.push_error(
                codes::DG_HASH_MISMATCH,
                format!("hash mismatch for {}", failed.join(", ")),
                ErrorSeverity::Critical,
            );
        }

        // Step 7: revocation check against the country CRL.
        let crl_check = match result.issuing_country.clone() {
            Some(country) => self.check_revocation(&country, &dsc, &mut result),
            None => CrlCheck::default(),
        };
        result.crl_check = crl_check;

        result.status = overall_status(
            result.certificate_chain_validation.valid,
            result.crl_check.revoked,
            result.sod_signature_validation.valid,
            result.data_group_validation.invalid,
        );
        result.processing_duration_ms = started.elapsed().as_millis() as i64;
        result
    }

    /// Verify and persist. A persistence failure is logged and never alters
    /// the result handed back to the caller; ERROR results are not persisted.
    pub fn verify_and_store<S: PaStore>(&self, request: &PaRequest, store: &mut S) -> PaResult {
        let result = self.verify(request);
        if result.status == PaStatus::Error {
            return result;
        }

        let sod_hash = request
            .decode_sod()
            .ok()
            .and_then(|sod| unwrap_sod(&sod).map(|inner| inner.to_vec()).ok())
            .map(|sod| hex::encode(calculate_hash(&sod, HashAlgorithm::Sha256)))
            .unwrap_or_default();

        let record = PaVerificationRecord {
            verification_id: result.verification_id.clone(),
            status: result.status.as_str().to_string(),
            issuing_country: result.issuing_country.clone(),
            document_number: result.document_number.clone(),
            sod_hash,
            dsc_subject_dn: result.certificate_chain_validation.dsc_subject.clone(),
            csca_subject_dn: result.certificate_chain_validation.csca_subject.clone(),
            crl_status: Some(result.crl_check.status.as_str().to_string()),
            processing_duration_ms: result.processing_duration_ms,
            created_at: result.verification_timestamp,
        };
        let algorithm = result
            .sod_signature_validation
            .hash_algorithm
            .clone()
            .unwrap_or_else(|| "SHA-256".to_string());
        let data_groups: Vec<PaDataGroupRecord> = result
            .data_group_validation
            .groups
            .iter()
            .filter_map(|(label, check)| {
                let dg_number = label.trim_start_matches("DG").parse().ok()?;
                Some(PaDataGroupRecord {
                    dg_number,
                    expected_hash: check.expected_hash.clone(),
                    actual_hash: check.actual_hash.clone(),
                    valid: check.valid,
                    algorithm: algorithm.clone(),
                })
            })
            .collect();

        if let Err(e) = store.save_verification(&record, &data_groups) {
            error!(
                "failed to persist PA verification {}: {}",
                result.verification_id, e
            );
        }
        result
    }

    fn check_revocation(
        &self,
        country: &str,
        dsc: &CertificateInfo,
        result: &mut PaResult,
    ) -> CrlCheck {
        match self.crl_provider.find_crl_by_country(country) {
            Ok(Some(crl)) => {
                let check = classify_crl(&crl, &dsc.serial, Utc::now());
                if check.revoked {
                    result.push_error(
                        codes::CERTIFICATE_REVOKED,
                        check
                            .message
                            .clone()
                            .unwrap_or_else(|| "DSC is listed in the country CRL".to_string()),
                        ErrorSeverity::Critical,
                    );
                }
                check
            }
            Ok(None) => CrlCheck {
                status: CrlStatus::Unavailable,
                revoked: false,
                message: Some(format!("no CRL published for {}", country)),
                revocation_date: None,
            },
            Err(e) => {
                warn!("CRL lookup for {} failed: {}", country, e);
                CrlCheck {
                    status: CrlStatus::Unavailable,
                    revoked: false,
                    message: Some(e.to_string()),
                    revocation_date: None,
                }
            }
        }
    }
}

/// Step 4 outcome. Expiration is reported, never a veto: an expired DSC that
/// verifies against its CSCA still yields `valid = true` alongside a
/// WARNING-severity record.
fn build_chain_validation(
    dsc: &CertificateInfo,
    csca: Option<&CertificateInfo>,
    now: DateTime<Utc>,
    result: &mut PaResult,
) -> CertificateChainValidation {
    let mut chain = CertificateChainValidation {
        valid: false,
        dsc_subject: Some(dsc.subject_dn.clone()),
        dsc_serial_number: Some(dsc.serial.clone()),
        csca_subject: None,
        csca_serial_number: None,
        not_before: Some(dsc.not_before),
        not_after: Some(dsc.not_after),
        validation_errors: Vec::new(),
    };

    match csca {
        Some(csca) => {
            chain.csca_subject = Some(csca.subject_dn.clone());
            chain.csca_serial_number = Some(csca.serial.clone());
            match dsc.verify_signed_by(csca) {
                Ok(()) => chain.valid = true,
                Err(e) => {
                    let message = format!("DSC signature does not verify against CSCA: {}", e);
                    chain.validation_errors.push(message.clone());
                    result.push_error(
                        codes::CHAIN_VALIDATION_FAILED,
                        message,
                        ErrorSeverity::Critical,
                    );
                }
            }
        }
        None => {
            let message = format!("no CSCA found for issuer '{}'", dsc.issuer_dn);
            chain.validation_errors.push(message.clone());
            result.push_error(codes::CERT_NOT_FOUND, message, ErrorSeverity::Critical);
        }
    }

    if dsc.is_expired_at(now) {
        let message = format!("DSC validity ended {}", dsc.not_after.to_rfc3339());
        chain.validation_errors.push(message.clone());
        result.push_error(codes::CHAIN_VALIDATION_FAILED, message, ErrorSeverity::Warning);
    }

    chain
}

/// Step 5: the DSC is the sole trust anchor; chain building and attribute
/// checks beyond messageDigest stay disabled.
fn verify_sod_signature(
    sod: &[u8],
    dsc: &CertificateInfo,
    result: &mut PaResult,
) -> SodSignatureValidation {
    let mut validation = SodSignatureValidation {
        valid: false,
        signature_algorithm: SodParser::signature_algorithm(sod).ok(),
        hash_algorithm: SodParser::hash_algorithm(sod).ok().map(|h| h.name),
        validation_errors: Vec::new(),
    };
    match SodParser::verify_signature(sod, dsc) {
        Ok(()) => validation.valid = true,
        Err(e) => {
            let message = e.to_string();
            validation.validation_errors.push(message.clone());
            result.push_error(codes::SOD_SIGNATURE_INVALID, message, ErrorSeverity::Critical);
        }
    }
    validation
}

/// Step 6: hash every submitted data group and compare with the
/// LDSSecurityObject expectation. A group without an expected hash counts
/// as invalid.
pub fn compare_data_groups(
    expected: &BTreeMap<u32, Vec<u8>>,
    submitted: &BTreeMap<u32, Vec<u8>>,
    algorithm: HashAlgorithm,
) -> DataGroupValidation {
    let mut validation = DataGroupValidation::default();
    for (number, content) in submitted {
        let actual = calculate_hash(content, algorithm);
        let expected_hash = expected.get(number);
        let valid = expected_hash.map(|e| e == &actual).unwrap_or(false);

        validation.total += 1;
        if valid {
            validation.valid += 1;
        } else {
            validation.invalid += 1;
        }
        validation.groups.insert(
            format!("DG{}", number),
            DataGroupCheck {
                valid,
                expected_hash: expected_hash.map(hex::encode),
                actual_hash: hex::encode(&actual),
            },
        );
    }
    validation
}

/// Step 7 classification for a CRL that was found. Revocation evidence wins
/// over staleness; a stale CRL without the serial reports CRL_EXPIRED.
pub fn classify_crl(crl: &CrlInfo, serial: &str, now: DateTime<Utc>) -> CrlCheck {
    if let Some(date) = crl.revocation_date(serial) {
        return CrlCheck {
            status: CrlStatus::Revoked,
            revoked: true,
            message: Some(format!("certificate revoked on {}", date.to_rfc3339())),
            revocation_date: Some(date),
        };
    }
    if crl.is_expired_at(now) {
        let next_update = crl
            .next_update
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        return CrlCheck {
            status: CrlStatus::Expired,
            revoked: false,
            message: Some(format!("CRL nextUpdate {} has passed", next_update)),
            revocation_date: None,
        };
    }
    CrlCheck {
        status: CrlStatus::Valid,
        revoked: false,
        message: None,
        revocation_date: None,
    }
}

fn extract_document_number(
    data_groups: &BTreeMap<u32, Vec<u8>>,
    request: &PaRequest,
) -> Option<String> {
    if let Some(dg1) = data_groups.get(&1) {
        match MrzParser::parse_dg1(dg1) {
            Ok(mrz) if !mrz.document_number.is_empty() => return Some(mrz.document_number),
            Ok(_) => {}
            Err(e) => debug!("DG1 MRZ extraction failed: {}", e),
        }
    }
    if let Some(text) = request.mrz_data.as_deref() {
        if let Ok(mrz) = MrzParser::parse_text(text) {
            if !mrz.document_number.is_empty() {
                return Some(mrz.document_number);
            }
        }
    }
    None
}

/// Step 8: best-effort decoding of DG1 and DG2 content. Failures are logged
/// and never influence the verification outcome.
pub fn parse_data_group_contents(data_groups: &BTreeMap<u32, Vec<u8>>) -> ParsedDataGroups {
    let mrz = data_groups.get(&1).and_then(|dg1| {
        MrzParser::parse_dg1(dg1)
            .map_err(|e| debug!("DG1 parse skipped: {}", e))
            .ok()
    });
    let faces = data_groups
        .get(&2)
        .and_then(|dg2_bytes| {
            dg2::parse_dg2(dg2_bytes)
                .map_err(|e| debug!("DG2 parse skipped: {}", e))
                .ok()
        })
        .unwrap_or_default();

    ParsedDataGroups {
        face_images: faces.iter().map(FaceImageSummary::from).collect(),
        mrz,
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedDataGroups {
    pub mrz: Option<MrzData>,
    pub face_images: Vec<FaceImageSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceImageSummary {
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub data_url: String,
}

impl From<&FaceImage> for FaceImageSummary {
    fn from(image: &FaceImage) -> Self {
        FaceImageSummary {
            mime_type: image.mime_type().to_string(),
            width: image.width,
            height: image.height,
            data_url: image.data_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaDataGroupRecord;
    use crate::trust::FixedTrustStore;
    use crate::utils::PkdError;
    use base64::Engine as _;
    use chrono::TimeZone;

    fn verifier() -> PaVerifier<FixedTrustStore, FixedTrustStore> {
        PaVerifier::new(FixedTrustStore::new(), FixedTrustStore::new())
    }

    fn b64(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn test_overall_status_law() {
        // VALID requires all four conjuncts.
        assert_eq!(overall_status(true, false, true, 0), PaStatus::Valid);
        assert_eq!(overall_status(false, false, true, 0), PaStatus::Invalid);
        assert_eq!(overall_status(true, true, true, 0), PaStatus::Invalid);
        assert_eq!(overall_status(true, false, false, 0), PaStatus::Invalid);
        assert_eq!(overall_status(true, false, true, 1), PaStatus::Invalid);
    }

    #[test]
    fn test_missing_sod_is_error() {
        let request: PaRequest = serde_json::from_str(r#"{"dataGroups":{}}"#).unwrap();
        let result = verifier().verify(&request);
        assert_eq!(result.status, PaStatus::Error);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].code, codes::MISSING_SOD);
    }

    #[test]
    fn test_undecodable_sod_is_error() {
        let request: PaRequest =
            serde_json::from_str("{\"sod\":\"###\",\"dataGroups\":{}}").unwrap();
        let result = verifier().verify(&request);
        assert_eq!(result.status, PaStatus::Error);
        assert_eq!(result.errors[0].code, codes::INVALID_SOD);
    }

    #[test]
    fn test_garbage_sod_is_error() {
        let request: PaRequest = serde_json::from_str(&format!(
            r#"{{"sod":"{}","dataGroups":{{}}}}"#,
            b64(&[0xDE, 0xAD, 0xBE, 0xEF])
        ))
        .unwrap();
        let result = verifier().verify(&request);
        assert_eq!(result.status, PaStatus::Error);
        assert_eq!(result.errors[0].code, codes::INVALID_SOD);
        assert!(result.processing_duration_ms >= 0);
    }

    #[test]
    fn test_bad_data_group_encoding_is_invalid_request() {
        let request: PaRequest = serde_json::from_str(&format!(
            r#"{{"sod":"{}","dataGroups":{{"DG1":"%%%"}}}}"#,
            b64(&[0x30, 0x00])
        ))
        .unwrap();
        let result = verifier().verify(&request);
        assert_eq!(result.status, PaStatus::Error);
        assert_eq!(result.errors[0].code, codes::INVALID_REQUEST);
    }

    #[test]
    fn test_compare_data_groups_round_trip() {
        let dg1 = b"mrz content".to_vec();
        let dg2 = b"face content".to_vec();
        let mut expected = BTreeMap::new();
        expected.insert(1, calculate_hash(&dg1, HashAlgorithm::Sha256));
        expected.insert(2, calculate_hash(&dg2, HashAlgorithm::Sha256));

        let mut submitted = BTreeMap::new();
        submitted.insert(1, dg1);
        submitted.insert(2, dg2);

        let validation = compare_data_groups(&expected, &submitted, HashAlgorithm::Sha256);
        assert_eq!(validation.total, 2);
        assert_eq!(validation.valid, 2);
        assert_eq!(validation.invalid, 0);
        assert!(validation.groups["DG1"].valid);
        assert_eq!(
            validation.groups["DG1"].expected_hash,
            Some(validation.groups["DG1"].actual_hash.clone())
        );
    }

    #[test]
    fn test_compare_data_groups_flags_single_flip() {
        let dg1 = b"mrz content".to_vec();
        let mut dg2 = b"face content".to_vec();
        let mut expected = BTreeMap::new();
        expected.insert(1, calculate_hash(&dg1, HashAlgorithm::Sha256));
        expected.insert(2, calculate_hash(&dg2, HashAlgorithm::Sha256));

        dg2[0] ^= 0x01; // one flipped byte
        let mut submitted = BTreeMap::new();
        submitted.insert(1, dg1);
        submitted.insert(2, dg2);

        let validation = compare_data_groups(&expected, &submitted, HashAlgorithm::Sha256);
        assert_eq!(validation.invalid, 1);
        assert!(validation.groups["DG1"].valid);
        assert!(!validation.groups["DG2"].valid);
    }

    #[test]
    fn test_missing_expected_hash_counts_invalid() {
        let mut submitted = BTreeMap::new();
        submitted.insert(14, b"dg14".to_vec());
        let validation =
            compare_data_groups(&BTreeMap::new(), &submitted, HashAlgorithm::Sha256);
        assert_eq!(validation.invalid, 1);
        assert!(validation.groups["DG14"].expected_hash.is_none());
    }

    fn crl_with(serial: &str, next_update_offset_days: i64) -> CrlInfo {
        let now = Utc::now();
        CrlInfo {
            der: vec![0x30],
            issuer_dn: "CN=CRL, C=FI".to_string(),
            this_update: now - chrono::Duration::days(1),
            next_update: Some(now + chrono::Duration::days(next_update_offset_days)),
            revoked: vec![(
                serial.to_string(),
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
            )],
        }
    }

    #[test]
    fn test_crl_classification() {
        let now = Utc::now();

        let check = classify_crl(&crl_with("AA01", 30), "AA01", now);
        assert_eq!(check.status, CrlStatus::Revoked);
        assert!(check.revoked);
        assert!(check.message.as_deref().unwrap().contains("revoked on"));

        let check = classify_crl(&crl_with("AA01", 30), "BB02", now);
        assert_eq!(check.status, CrlStatus::Valid);
        assert!(!check.revoked);

        // Stale CRL, serial not listed.
        let check = classify_crl(&crl_with("AA01", -3), "BB02", now);
        assert_eq!(check.status, CrlStatus::Expired);

        // Stale CRL, serial listed: revocation evidence wins.
        let check = classify_crl(&crl_with("AA01", -3), "AA01", now);
        assert_eq!(check.status, CrlStatus::Revoked);
    }

    fn fabricated_certificate(subject_dn: &str, issuer_dn: &str, expired: bool) -> CertificateInfo {
        let now = Utc::now();
        CertificateInfo {
            der: vec![0x30],
            subject_dn: subject_dn.to_string(),
            issuer_dn: issuer_dn.to_string(),
            serial: "0A0B".to_string(),
            not_before: now - chrono::Duration::days(365),
            not_after: if expired {
                now - chrono::Duration::days(30)
            } else {
                now + chrono::Duration::days(365)
            },
            signature_algorithm_oid: "1.2.840.113549.1.1.11".to_string(),
            public_key: Vec::new(),
            public_key_algorithm_oid: "1.2.840.113549.1.1.1".to_string(),
        }
    }

    #[test]
    fn test_chain_validation_without_csca() {
        let dsc = fabricated_certificate("CN=DS-01, C=ZZ", "CN=CSCA-ZZ, C=ZZ", false);
        let mut result = PaResult::new("test".to_string());
        let chain = build_chain_validation(&dsc, None, Utc::now(), &mut result);

        assert!(!chain.valid);
        assert_eq!(chain.dsc_subject.as_deref(), Some("CN=DS-01, C=ZZ"));
        assert!(chain.csca_subject.is_none());
        assert!(result.errors.iter().any(|e| e.code == codes::CERT_NOT_FOUND));
    }

    #[test]
    fn test_expired_dsc_reports_warning() {
        let dsc = fabricated_certificate("CN=DS-01, C=ZZ", "CN=CSCA-ZZ, C=ZZ", true);
        let mut result = PaResult::new("test".to_string());
        let chain = build_chain_validation(&dsc, None, Utc::now(), &mut result);

        assert!(chain
            .validation_errors
            .iter()
            .any(|e| e.contains("validity ended")));
        assert!(result
            .errors
            .iter()
            .any(|e| e.severity == ErrorSeverity::Warning));
    }

    #[derive(Default)]
    struct MemoryPaStore {
        saved: Vec<(PaVerificationRecord, Vec<PaDataGroupRecord>)>,
    }

    impl PaStore for MemoryPaStore {
        fn save_verification(
            &mut self,
            record: &PaVerificationRecord,
            data_groups: &[PaDataGroupRecord],
        ) -> Result<(), PkdError> {
            self.saved.push((record.clone(), data_groups.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_error_results_are_not_persisted() {
        let request: PaRequest = serde_json::from_str(r#"{"dataGroups":{}}"#).unwrap();
        let mut store = MemoryPaStore::default();
        let result = verifier().verify_and_store(&request, &mut store);
        assert_eq!(result.status, PaStatus::Error);
        assert!(store.saved.is_empty());
    }

    #[test]
    fn test_verification_ids_are_unique() {
        let a = next_verification_id();
        let b = next_verification_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_data_group_contents_is_best_effort() {
        let mut groups = BTreeMap::new();
        groups.insert(1, vec![0x00, 0x01]); // unparseable DG1
        groups.insert(2, vec![0x00, 0x01]); // unparseable DG2
        let parsed = parse_data_group_contents(&groups);
        assert!(parsed.mrz.is_none());
        assert!(parsed.face_images.is_empty());
    }
}
