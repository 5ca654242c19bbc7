use std::collections::BTreeMap;

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerInfo};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};

use crate::crypto::asn1::{parse_dg_hashes, unwrap_sod};
use crate::crypto::certs::{self, CertificateInfo};
use crate::crypto::hash::{self, calculate_hash, HashAlgorithm};
use crate::utils::PkdError;

const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_MESSAGE_DIGEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");

/// Digest algorithm as reported by the first SignerInfo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAlgorithmInfo {
    pub oid: String,
    pub name: String,
}

/// CMS SignedData handling for Security Object Documents.
pub struct SodParser;

impl SodParser {
    /// Decode the CMS SignedData payload, stripping the ICAO 0x77 wrapper
    /// first when present.
    pub fn signed_data(sod: &[u8]) -> Result<SignedData, PkdError> {
        let inner = unwrap_sod(sod)?;
        let content_info = ContentInfo::from_der(inner)
            .map_err(|e| PkdError::Asn1(format!("failed to parse CMS ContentInfo: {}", e)))?;
        content_info
            .content
            .decode_as::<SignedData>()
            .map_err(|e| PkdError::Asn1(format!("failed to parse CMS SignedData: {}", e)))
    }

    /// Return the DER encoding of the first certificate embedded in the SOD,
    /// which for a well-formed SOD is the Document Signer Certificate.
    pub fn extract_dsc(sod: &[u8]) -> Result<Vec<u8>, PkdError> {
        let signed_data = Self::signed_data(sod)?;
        let certificates = signed_data
            .certificates
            .ok_or_else(|| PkdError::Certificate("SOD carries no certificates".to_string()))?;
        for choice in certificates.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                return cert
                    .to_der()
                    .map_err(|e| PkdError::Asn1(format!("failed to re-encode DSC: {}", e)));
            }
        }
        Err(PkdError::Certificate(
            "SOD certificate set holds no X.509 certificate".to_string(),
        ))
    }

    /// Digest algorithm of the first SignerInfo. Unknown OIDs keep their
    /// dotted form but report the name SHA-256.
    pub fn hash_algorithm(sod: &[u8]) -> Result<HashAlgorithmInfo, PkdError> {
        let signed_data = Self::signed_data(sod)?;
        let signer = first_signer(&signed_data)?;
        let oid = signer.digest_alg.oid.to_string();
        let name = match oid.as_str() {
            hash::OID_SHA1 => "SHA-1",
            hash::OID_SHA256 => "SHA-256",
            hash::OID_SHA384 => "SHA-384",
            hash::OID_SHA512 => "SHA-512",
            _ => "SHA-256",
        };
        Ok(HashAlgorithmInfo {
            oid,
            name: name.to_string(),
        })
    }

    /// Friendly name of the first SignerInfo's signature algorithm.
    pub fn signature_algorithm(sod: &[u8]) -> Result<String, PkdError> {
        let signed_data = Self::signed_data(sod)?;
        let signer = first_signer(&signed_data)?;
        Ok(signature_algorithm_name(
            &signer.signature_algorithm.oid.to_string(),
            &signer.digest_alg.oid.to_string(),
        ))
    }

    /// The encapsulated LDSSecurityObject DER (eContent octets).
    pub fn lds_object(sod: &[u8]) -> Result<Vec<u8>, PkdError> {
        let signed_data = Self::signed_data(sod)?;
        let econtent = signed_data
            .encap_content_info
            .econtent
            .ok_or_else(|| PkdError::Asn1("SOD eContent is absent".to_string()))?;
        let octets = econtent
            .decode_as::<OctetString>()
            .map_err(|e| PkdError::Asn1(format!("SOD eContent is not an OCTET STRING: {}", e)))?;
        Ok(octets.as_bytes().to_vec())
    }

    /// Data group hashes keyed by DG number. Accepts a full SOD (wrapped or
    /// not) and falls back to treating the input as a bare LDSSecurityObject.
    pub fn dg_hashes(data: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>, PkdError> {
        match Self::lds_object(data) {
            Ok(lds) => parse_dg_hashes(&lds),
            Err(_) => parse_dg_hashes(data),
        }
    }

    /// Verify the SOD signature with the DSC as the sole trust anchor.
    ///
    /// When signed attributes are present, the messageDigest attribute is
    /// checked against the eContent digest and the signature is verified over
    /// the SET OF re-encoding of the attributes; otherwise the signature
    /// covers the eContent directly. No certificate chain building and no
    /// further attribute checks, per the PA pipeline contract.
    pub fn verify_signature(sod: &[u8], dsc: &CertificateInfo) -> Result<(), PkdError> {
        let signed_data = Self::signed_data(sod)?;
        let signer = first_signer(&signed_data)?;
        let econtent = Self::lds_object(sod)?;

        let digest_oid = signer.digest_alg.oid.to_string();
        let digest_alg = HashAlgorithm::from_oid(&digest_oid);
        let effective_oid =
            effective_signature_oid(&signer.signature_algorithm.oid.to_string(), &digest_oid);
        let signature = signer.signature.as_bytes();

        match &signer.signed_attrs {
            Some(signed_attrs) => {
                let expected = calculate_hash(&econtent, digest_alg);
                let message_digest = signed_attrs
                    .iter()
                    .find(|attr| attr.oid == OID_MESSAGE_DIGEST)
                    .ok_or_else(|| {
                        PkdError::Signature(
                            "signed attributes lack a messageDigest attribute".to_string(),
                        )
                    })?;
                let value = message_digest
                    .values
                    .iter()
                    .next()
                    .ok_or_else(|| {
                        PkdError::Signature("messageDigest attribute is empty".to_string())
                    })?
                    .decode_as::<OctetString>()
                    .map_err(|e| {
                        PkdError::Signature(format!("malformed messageDigest attribute: {}", e))
                    })?;
                if value.as_bytes() != expected.as_slice() {
                    return Err(PkdError::Signature(
                        "messageDigest does not match eContent digest".to_string(),
                    ));
                }

                // Verification uses the SET OF encoding, not the [0] IMPLICIT
                // tag the attributes carry on the wire.
                let message = signed_attrs
                    .to_der()
                    .map_err(|e| PkdError::Asn1(format!("failed to encode signedAttrs: {}", e)))?;
                certs::verify_signature(&dsc.public_key, &effective_oid, &message, signature)
            }
            None => certs::verify_signature(&dsc.public_key, &effective_oid, &econtent, signature),
        }
    }
}

fn first_signer(signed_data: &SignedData) -> Result<&SignerInfo, PkdError> {
    signed_data
        .signer_infos
        .0
        .as_slice()
        .first()
        .ok_or_else(|| PkdError::Asn1("SOD carries no SignerInfo".to_string()))
}

/// CMS SignerInfos commonly state `rsaEncryption` as the signature algorithm
/// and leave the digest to `digestAlgorithm`. Collapse that split into the
/// digest-specific OID the verifier keys on.
fn effective_signature_oid(signature_oid: &str, digest_oid: &str) -> String {
    if signature_oid != OID_RSA_ENCRYPTION {
        return signature_oid.to_string();
    }
    match digest_oid {
        hash::OID_SHA1 => certs::OID_SHA1_WITH_RSA,
        hash::OID_SHA384 => certs::OID_SHA384_WITH_RSA,
        hash::OID_SHA512 => certs::OID_SHA512_WITH_RSA,
        _ => certs::OID_SHA256_WITH_RSA,
    }
    .to_string()
}

/// Map a SignerInfo signature algorithm to the conventional JCA-style name.
pub fn signature_algorithm_name(signature_oid: &str, digest_oid: &str) -> String {
    match signature_oid {
        OID_RSA_ENCRYPTION => match digest_oid {
            hash::OID_SHA1 => "SHA1withRSA".to_string(),
            hash::OID_SHA384 => "SHA384withRSA".to_string(),
            hash::OID_SHA512 => "SHA512withRSA".to_string(),
            _ => "SHA256withRSA".to_string(),
        },
        certs::OID_SHA1_WITH_RSA => "SHA1withRSA".to_string(),
        certs::OID_SHA256_WITH_RSA => "SHA256withRSA".to_string(),
        certs::OID_SHA384_WITH_RSA => "SHA384withRSA".to_string(),
        certs::OID_SHA512_WITH_RSA => "SHA512withRSA".to_string(),
        certs::OID_RSASSA_PSS => "RSASSA-PSS".to_string(),
        certs::OID_ECDSA_WITH_SHA256 => "SHA256withECDSA".to_string(),
        certs::OID_ECDSA_WITH_SHA384 => "SHA384withECDSA".to_string(),
        certs::OID_ECDSA_WITH_SHA512 => "SHA512withECDSA".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::asn1::encode_length;

    fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&encode_length(value.len()));
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_signature_algorithm_names() {
        assert_eq!(
            signature_algorithm_name("1.2.840.113549.1.1.1", hash::OID_SHA256),
            "SHA256withRSA"
        );
        assert_eq!(
            signature_algorithm_name("1.2.840.113549.1.1.1", hash::OID_SHA512),
            "SHA512withRSA"
        );
        assert_eq!(
            signature_algorithm_name("1.2.840.10045.4.3.2", hash::OID_SHA256),
            "SHA256withECDSA"
        );
        assert_eq!(
            signature_algorithm_name("1.2.840.113549.1.1.10", hash::OID_SHA256),
            "RSASSA-PSS"
        );
        // Unknown OIDs render dotted-decimal.
        assert_eq!(
            signature_algorithm_name("1.2.3.4", hash::OID_SHA256),
            "1.2.3.4"
        );
    }

    #[test]
    fn test_effective_signature_oid() {
        assert_eq!(
            effective_signature_oid("1.2.840.113549.1.1.1", hash::OID_SHA384),
            certs::OID_SHA384_WITH_RSA
        );
        // Non-RSA algorithms pass through untouched.
        assert_eq!(
            effective_signature_oid(certs::OID_ECDSA_WITH_SHA256, hash::OID_SHA256),
            certs::OID_ECDSA_WITH_SHA256
        );
    }

    #[test]
    fn test_dg_hashes_accepts_bare_lds_object() {
        // A bare LDSSecurityObject is not a ContentInfo, so the SOD path
        // fails and the walker takes over.
        let version = tlv(0x02, &[0x00]);
        let alg = tlv(0x30, &tlv(0x06, &[0x2B, 0x0E, 0x03, 0x02, 0x1A]));
        let entry = {
            let mut e = tlv(0x02, &[0x01]);
            e.extend_from_slice(&tlv(0x04, &[0x11; 20]));
            tlv(0x30, &e)
        };
        let list = tlv(0x30, &entry);
        let mut body = version;
        body.extend_from_slice(&alg);
        body.extend_from_slice(&list);
        let lds = tlv(0x30, &body);

        let hashes = SodParser::dg_hashes(&lds).unwrap();
        assert_eq!(hashes[&1], vec![0x11; 20]);
    }

    #[test]
    fn test_signed_data_rejects_garbage() {
        assert!(SodParser::signed_data(&[0x01, 0x02, 0x03]).is_err());
        assert!(SodParser::extract_dsc(&[0x77, 0x02, 0x30, 0x00]).is_err());
    }
}
