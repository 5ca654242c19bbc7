//! Crypto and ASN.1 toolbox
//!
//! Decoding and verification primitives for the PKD core:
//! - `asn1`: minimal TLV reader, ICAO 0x77 unwrapping, LDSSecurityObject walker
//! - `sod`: CMS SignedData handling (DSC extraction, SignerInfo algorithms, signature check)
//! - `certs`: X.509 certificate and CRL decoding, DN handling, issuer signature check
//! - `hash`: digest algorithms and OID mapping

pub mod asn1;
pub mod certs;
pub mod hash;
pub mod sod;

pub use asn1::{parse_dg_hashes, unwrap_sod};
pub use certs::{extract_dn_attribute, CertificateInfo, CrlInfo};
pub use hash::{calculate_hash, HashAlgorithm};
pub use sod::SodParser;
