use std::collections::BTreeMap;

use crate::utils::PkdError;

/// ICAO application tag wrapping the SOD as read from EF.SOD (tag 0x77).
pub const SOD_APPLICATION_TAG: u8 = 0x77;

const TAG_INTEGER: u32 = 0x02;
const TAG_OCTET_STRING: u32 = 0x04;
const TAG_SEQUENCE: u32 = 0x30;

/// Minimal BER/DER TLV reader.
///
/// Only what the SOD paths need: single- and multi-byte tags, short-form and
/// long-form lengths. Indefinite lengths are rejected.
pub struct TlvReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TlvReader { data, pos: 0 }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read_byte(&mut self) -> Result<u8, PkdError> {
        let b = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| PkdError::Asn1("unexpected end of data".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    /// Read a tag, collapsing multi-byte tags into a single u32.
    fn read_tag(&mut self) -> Result<u32, PkdError> {
        let first = self.read_byte()?;
        let mut tag = first as u32;
        if first & 0x1F == 0x1F {
            // High tag number form: continue while the high bit is set.
            loop {
                let b = self.read_byte()?;
                tag = (tag << 8) | b as u32;
                if b & 0x80 == 0 {
                    break;
                }
            }
        }
        Ok(tag)
    }

    /// Read a length octet sequence. Accepts short form (0..=127) and long
    /// form (0x80 | n followed by n big-endian bytes).
    fn read_length(&mut self) -> Result<usize, PkdError> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let count = (first & 0x7F) as usize;
        if count == 0 {
            return Err(PkdError::Asn1(
                "indefinite length is not supported".to_string(),
            ));
        }
        if count > 4 {
            return Err(PkdError::Asn1(format!(
                "length field of {} bytes exceeds supported size",
                count
            )));
        }
        let mut len: usize = 0;
        for _ in 0..count {
            len = (len << 8) | self.read_byte()? as usize;
        }
        Ok(len)
    }

    /// Read one TLV, returning the tag and the value slice.
    pub fn read_tlv(&mut self) -> Result<(u32, &'a [u8]), PkdError> {
        let tag = self.read_tag()?;
        let len = self.read_length()?;
        if self.pos + len > self.data.len() {
            return Err(PkdError::Asn1(format!(
                "declared length {} overruns buffer ({} bytes remain)",
                len,
                self.data.len() - self.pos
            )));
        }
        let value = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok((tag, value))
    }
}

/// Strip the ICAO 0x77 application wrapper from EF.SOD content if present,
/// returning the inner CMS SignedData. Input without the wrapper passes
/// through unchanged, which makes the operation idempotent.
pub fn unwrap_sod(data: &[u8]) -> Result<&[u8], PkdError> {
    if data.first() != Some(&SOD_APPLICATION_TAG) {
        return Ok(data);
    }
    let mut reader = TlvReader::new(data);
    let (_, inner) = reader.read_tlv()?;
    Ok(inner)
}

fn parse_small_integer(value: &[u8]) -> Result<u32, PkdError> {
    if value.is_empty() || value.len() > 4 {
        return Err(PkdError::Asn1(format!(
            "INTEGER of {} bytes is not a data group number",
            value.len()
        )));
    }
    let mut n: u32 = 0;
    for &b in value {
        n = (n << 8) | b as u32;
    }
    Ok(n)
}

/// Walk an LDSSecurityObject and collect the data group hashes keyed by
/// data group number.
///
/// ```text
/// LDSSecurityObject ::= SEQUENCE {
///     version                INTEGER,
///     hashAlgorithm          AlgorithmIdentifier,
///     dataGroupHashValues    SEQUENCE OF DataGroupHash }
/// DataGroupHash ::= SEQUENCE {
///     dataGroupNumber        INTEGER,
///     dataGroupHashValue     OCTET STRING }
/// ```
///
/// The walker stops at the declared outer length, so trailing data (an
/// ldsVersionInfo field, padding from a sloppy encoder) is tolerated.
pub fn parse_dg_hashes(data: &[u8]) -> Result<BTreeMap<u32, Vec<u8>>, PkdError> {
    let mut outer = TlvReader::new(data);
    let (tag, body) = outer.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(PkdError::Asn1(format!(
            "LDSSecurityObject must start with SEQUENCE, found tag 0x{:02X}",
            tag
        )));
    }

    let mut fields = TlvReader::new(body);

    // version INTEGER
    let (tag, _) = fields.read_tlv()?;
    if tag != TAG_INTEGER {
        return Err(PkdError::Asn1(
            "LDSSecurityObject version must be INTEGER".to_string(),
        ));
    }

    // hashAlgorithm AlgorithmIdentifier, not needed here (the PA engine reads
    // the digest algorithm from SignerInfo)
    let (tag, _) = fields.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(PkdError::Asn1(
            "LDSSecurityObject hashAlgorithm must be SEQUENCE".to_string(),
        ));
    }

    // dataGroupHashValues SEQUENCE OF DataGroupHash
    let (tag, hash_list) = fields.read_tlv()?;
    if tag != TAG_SEQUENCE {
        return Err(PkdError::Asn1(
            "dataGroupHashValues must be SEQUENCE".to_string(),
        ));
    }

    let mut hashes = BTreeMap::new();
    let mut entries = TlvReader::new(hash_list);
    while !entries.at_end() {
        let (tag, entry) = entries.read_tlv()?;
        if tag != TAG_SEQUENCE {
            return Err(PkdError::Asn1(
                "DataGroupHash must be SEQUENCE".to_string(),
            ));
        }
        let mut entry_reader = TlvReader::new(entry);
        let (num_tag, num_value) = entry_reader.read_tlv()?;
        if num_tag != TAG_INTEGER {
            return Err(PkdError::Asn1(
                "dataGroupNumber must be INTEGER".to_string(),
            ));
        }
        let (hash_tag, hash_value) = entry_reader.read_tlv()?;
        if hash_tag != TAG_OCTET_STRING {
            return Err(PkdError::Asn1(
                "dataGroupHashValue must be OCTET STRING".to_string(),
            ));
        }
        hashes.insert(parse_small_integer(num_value)?, hash_value.to_vec());
    }

    Ok(hashes)
}

/// Encode a length in DER (shortest form). Used by tests and by the LDS
/// object construction in fixtures.
pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        return vec![len as u8];
    }
    let mut bytes = Vec::new();
    let mut n = len;
    while n > 0 {
        bytes.push((n & 0xFF) as u8);
        n >>= 8;
    }
    bytes.reverse();
    let mut out = vec![0x80 | bytes.len() as u8];
    out.extend_from_slice(&bytes);
    out
}
