//! Passive Authentication
//!
//! `PaVerifier` runs the ICAO 9303 verification sequence over a submitted
//! SOD and data group set: SOD decoding, DSC extraction, CSCA lookup, trust
//! chain verification, SOD signature verification, data group hash
//! comparison, CRL consultation and best-effort content parsing.

pub mod engine;

pub use engine::{parse_data_group_contents, overall_status, PaVerifier, ParsedDataGroups};
