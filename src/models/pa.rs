use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::PkdError;

/// Error codes surfaced to PA clients.
pub mod codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const MISSING_SOD: &str = "MISSING_SOD";
    pub const INVALID_SOD: &str = "INVALID_SOD";
    pub const CERT_NOT_FOUND: &str = "CERT_NOT_FOUND";
    pub const CHAIN_VALIDATION_FAILED: &str = "CHAIN_VALIDATION_FAILED";
    pub const CERTIFICATE_REVOKED: &str = "CERTIFICATE_REVOKED";
    pub const SOD_SIGNATURE_INVALID: &str = "SOD_SIGNATURE_INVALID";
    pub const DG_HASH_MISMATCH: &str = "DG_HASH_MISMATCH";
    pub const PA_EXECUTION_ERROR: &str = "PA_EXECUTION_ERROR";
}

/// Verification request as posted to the PA endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaRequest {
    pub sod: Option<String>,
    #[serde(default)]
    pub data_groups: DataGroupsInput,
    pub mrz_data: Option<String>,
    pub issuing_country: Option<String>,
    pub document_number: Option<String>,
}

/// `dataGroups` is accepted both as an array of `{number, data}` objects and
/// as a `"DGn" -> base64` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DataGroupsInput {
    List(Vec<DataGroupEntry>),
    Map(BTreeMap<String, String>),
}

impl Default for DataGroupsInput {
    fn default() -> Self {
        DataGroupsInput::List(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataGroupEntry {
    pub number: String,
    pub data: String,
}

impl PaRequest {
    /// Decode the submitted data groups into `dg number -> raw bytes`.
    pub fn decode_data_groups(&self) -> Result<BTreeMap<u32, Vec<u8>>, PkdError> {
        let engine = base64::engine::general_purpose::STANDARD;
        let mut out = BTreeMap::new();
        let entries: Vec<(String, String)> = match &self.data_groups {
            DataGroupsInput::List(list) => list
                .iter()
                .map(|e| (e.number.clone(), e.data.clone()))
                .collect(),
            DataGroupsInput::Map(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        for (label, data) in entries {
            let number = parse_dg_label(&label)?;
            let bytes = engine
                .decode(data.trim())
                .map_err(|e| PkdError::DataGroup(format!("{}: invalid base64: {}", label, e)))?;
            out.insert(number, bytes);
        }
        Ok(out)
    }

    /// Decode the SOD payload from its base64 transport form.
    pub fn decode_sod(&self) -> Result<Vec<u8>, PkdError> {
        let sod = self
            .sod
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| PkdError::DataGroup("request carries no SOD".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(sod)
            .map_err(|e| PkdError::DataGroup(format!("SOD is not valid base64: {}", e)))
    }
}

/// `"DG1"`, `"dg1"` and `"1"` all address data group 1.
pub fn parse_dg_label(label: &str) -> Result<u32, PkdError> {
    let trimmed = label.trim();
    let digits = trimmed
        .strip_prefix("DG")
        .or_else(|| trimmed.strip_prefix("dg"))
        .or_else(|| trimmed.strip_prefix("Dg"))
        .unwrap_or(trimmed);
    let number: u32 = digits
        .parse()
        .map_err(|_| PkdError::DataGroup(format!("'{}' is not a data group label", label)))?;
    if !(1..=16).contains(&number) {
        return Err(PkdError::DataGroup(format!(
            "data group number {} out of range 1..16",
            number
        )));
    }
    Ok(number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaStatus {
    Valid,
    Invalid,
    Error,
}

impl PaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaStatus::Valid => "VALID",
            PaStatus::Invalid => "INVALID",
            PaStatus::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaErrorRecord {
    pub code: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub timestamp: DateTime<Utc>,
}

impl PaErrorRecord {
    pub fn new(code: &str, message: impl Into<String>, severity: ErrorSeverity) -> Self {
        PaErrorRecord {
            code: code.to_string(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CertificateChainValidation {
    pub valid: bool,
    pub dsc_subject: Option<String>,
    pub dsc_serial_number: Option<String>,
    pub csca_subject: Option<String>,
    pub csca_serial_number: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SodSignatureValidation {
    pub valid: bool,
    pub signature_algorithm: Option<String>,
    pub hash_algorithm: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGroupCheck {
    pub valid: bool,
    pub expected_hash: Option<String>,
    pub actual_hash: String,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataGroupValidation {
    pub total: u32,
    pub valid: u32,
    pub invalid: u32,
    /// Keyed by `"DGn"`.
    pub groups: BTreeMap<String, DataGroupCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrlStatus {
    #[serde(rename = "VALID")]
    Valid,
    #[serde(rename = "REVOKED")]
    Revoked,
    #[serde(rename = "CRL_UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "CRL_EXPIRED")]
    Expired,
    #[serde(rename = "CRL_INVALID")]
    Invalid,
    #[serde(rename = "NOT_CHECKED")]
    NotChecked,
}

impl CrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrlStatus::Valid => "VALID",
            CrlStatus::Revoked => "REVOKED",
            CrlStatus::Unavailable => "CRL_UNAVAILABLE",
            CrlStatus::Expired => "CRL_EXPIRED",
            CrlStatus::Invalid => "CRL_INVALID",
            CrlStatus::NotChecked => "NOT_CHECKED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrlCheck {
    pub status: CrlStatus,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_date: Option<DateTime<Utc>>,
}

impl Default for CrlCheck {
    fn default() -> Self {
        CrlCheck {
            status: CrlStatus::NotChecked,
            revoked: false,
            message: None,
            revocation_date: None,
        }
    }
}

/// Full Passive Authentication verification result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaResult {
    pub status: PaStatus,
    pub verification_id: String,
    pub verification_timestamp: DateTime<Utc>,
    pub issuing_country: Option<String>,
    pub document_number: Option<String>,
    pub certificate_chain_validation: CertificateChainValidation,
    pub sod_signature_validation: SodSignatureValidation,
    pub data_group_validation: DataGroupValidation,
    pub crl_check: CrlCheck,
    pub processing_duration_ms: i64,
    pub errors: Vec<PaErrorRecord>,
}

impl PaResult {
    pub fn new(verification_id: String) -> Self {
        PaResult {
            status: PaStatus::Error,
            verification_id,
            verification_timestamp: Utc::now(),
            issuing_country: None,
            document_number: None,
            certificate_chain_validation: CertificateChainValidation::default(),
            sod_signature_validation: SodSignatureValidation::default(),
            data_group_validation: DataGroupValidation::default(),
            crl_check: CrlCheck::default(),
            processing_duration_ms: 0,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, code: &str, message: impl Into<String>, severity: ErrorSeverity) {
        self.errors.push(PaErrorRecord::new(code, message, severity));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dg_label() {
        assert_eq!(parse_dg_label("DG1").unwrap(), 1);
        assert_eq!(parse_dg_label("dg14").unwrap(), 14);
        assert_eq!(parse_dg_label("2").unwrap(), 2);
        assert!(parse_dg_label("DG0").is_err());
        assert!(parse_dg_label("DG17").is_err());
        assert!(parse_dg_label("SOD").is_err());
    }

    #[test]
    fn test_request_accepts_map_and_list() {
        let from_list: PaRequest = serde_json::from_str(
            r#"{"sod":"AA==","dataGroups":[{"number":"DG1","data":"AQI="}]}"#,
        )
        .unwrap();
        let groups = from_list.decode_data_groups().unwrap();
        assert_eq!(groups[&1], vec![0x01, 0x02]);

        let from_map: PaRequest =
            serde_json::from_str(r#"{"sod":"AA==","dataGroups":{"DG2":"AwQ="}}"#).unwrap();
        let groups = from_map.decode_data_groups().unwrap();
        assert_eq!(groups[&2], vec![0x03, 0x04]);
    }

    #[test]
    fn test_decode_sod_rejects_missing_or_bad_input() {
        let req: PaRequest = serde_json::from_str(r#"{"dataGroups":{}}"#).unwrap();
        assert!(req.decode_sod().is_err());

        let req: PaRequest = serde_json::from_str(r#"{"sod":"not-base64!!"}"#).unwrap();
        assert!(req.decode_sod().is_err());
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = PaResult::new("42".to_string());
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("verificationId").is_some());
        assert!(json.get("certificateChainValidation").is_some());
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["crlCheck"]["status"], "NOT_CHECKED");
    }
}
