use regex::Regex;
use serde::Serialize;

use crate::crypto::asn1::TlvReader;
use crate::utils::PkdError;

/// MRZ layouts defined by ICAO Doc 9303.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MrzFormat {
    /// 3 lines of 30 characters (ID cards).
    Td1,
    /// 2 lines of 36 characters (older ID documents).
    Td2,
    /// 2 lines of 44 characters (passports).
    Td3,
}

impl MrzFormat {
    /// Detect the layout from the total MRZ character count.
    pub fn from_len(len: usize) -> Option<MrzFormat> {
        match len {
            90 => Some(MrzFormat::Td1),
            72 => Some(MrzFormat::Td2),
            88 => Some(MrzFormat::Td3),
            _ => None,
        }
    }

    pub fn line_len(&self) -> usize {
        match self {
            MrzFormat::Td1 => 30,
            MrzFormat::Td2 => 36,
            MrzFormat::Td3 => 44,
        }
    }
}

/// Decoded MRZ fields. Dates carry both the raw `YYMMDD` form and the
/// normalized ISO form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MrzData {
    pub format: MrzFormat,
    pub document_code: String,
    pub issuing_country: String,
    pub surname: String,
    pub given_names: String,
    pub document_number: String,
    pub document_number_check_valid: bool,
    pub nationality: String,
    pub date_of_birth: String,
    pub date_of_birth_iso: Option<String>,
    pub date_of_birth_check_valid: bool,
    pub sex: String,
    pub date_of_expiry: String,
    pub date_of_expiry_iso: Option<String>,
    pub date_of_expiry_check_valid: bool,
    pub personal_number: Option<String>,
    pub raw_lines: Vec<String>,
}

pub struct MrzParser;

impl MrzParser {
    /// Extract and parse the MRZ from a DG1 data group. The MRZ content sits
    /// behind the BER tag `5F 1F`, located by walking the TLV structure and
    /// falling back to a byte scan for encoders that pad the template.
    pub fn parse_dg1(dg1: &[u8]) -> Result<MrzData, PkdError> {
        let mrz_bytes = locate_mrz(dg1)
            .ok_or_else(|| PkdError::Mrz("DG1 carries no 5F1F MRZ element".to_string()))?;
        let text = std::str::from_utf8(mrz_bytes)
            .map_err(|_| PkdError::Mrz("MRZ content is not valid ASCII".to_string()))?;
        Self::parse_text(text)
    }

    /// Parse MRZ text. Line breaks and surrounding whitespace are ignored;
    /// the layout is detected from the character count.
    pub fn parse_text(text: &str) -> Result<MrzData, PkdError> {
        let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let charset = Regex::new(r"^[A-Z0-9<]+$")
            .map_err(|e| PkdError::Mrz(format!("charset pattern failed to compile: {}", e)))?;
        if !charset.is_match(&compact) {
            return Err(PkdError::Mrz(
                "MRZ contains characters outside A-Z, 0-9 and '<'".to_string(),
            ));
        }
        let format = MrzFormat::from_len(compact.len()).ok_or_else(|| {
            PkdError::Mrz(format!(
                "MRZ length {} matches no known layout (88, 72 or 90 expected)",
                compact.len()
            ))
        })?;

        let line_len = format.line_len();
        let lines: Vec<String> = compact
            .as_bytes()
            .chunks(line_len)
            .map(|chunk| String::from_utf8_lossy(chunk).to_string())
            .collect();

        match format {
            MrzFormat::Td3 => parse_td3(&lines),
            MrzFormat::Td2 => parse_td2(&lines),
            MrzFormat::Td1 => parse_td1(&lines),
        }
    }
}

/// ICAO 9303 check digit: values 0-9, A-Z as 10-35, `<` as 0, weighted
/// 7-3-1 repeating, summed modulo 10.
pub fn compute_check_digit(field: &str) -> char {
    const WEIGHTS: [u32; 3] = [7, 3, 1];
    let sum: u32 = field
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let value = match c {
                '0'..='9' => c as u32 - '0' as u32,
                'A'..='Z' => c as u32 - 'A' as u32 + 10,
                _ => 0,
            };
            value * WEIGHTS[i % 3]
        })
        .sum();
    char::from_digit(sum % 10, 10).unwrap_or('0')
}

fn check_digit_valid(field: &str, digit: Option<char>) -> bool {
    match digit {
        Some(d) => compute_check_digit(field) == d,
        None => false,
    }
}

/// Walk the DG1 TLV structure looking for the 5F1F element; fall back to a
/// raw byte scan when the outer structure does not decode.
fn locate_mrz(dg1: &[u8]) -> Option<&[u8]> {
    // DG1 is 61 { 5F1F <mrz> }.
    if let Ok((tag, body)) = TlvReader::new(dg1).read_tlv() {
        if tag == 0x61 {
            let mut inner = TlvReader::new(body);
            while !inner.at_end() {
                match inner.read_tlv() {
                    Ok((0x5F1F, value)) => return Some(value),
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        } else if tag == 0x5F1F {
            return Some(body);
        }
    }

    // Scan for 5F 1F and decode the length bytes by hand.
    let pos = dg1.windows(2).position(|w| w == [0x5F, 0x1F])?;
    let rest = &dg1[pos + 2..];
    let first = *rest.first()?;
    let (len, skip) = if first & 0x80 == 0 {
        (first as usize, 1)
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 2 || rest.len() < 1 + count {
            return None;
        }
        let mut len = 0usize;
        for &b in &rest[1..1 + count] {
            len = (len << 8) | b as usize;
        }
        (len, 1 + count)
    };
    rest.get(skip..skip + len)
}

/// Trim trailing filler and turn interior `<` into spaces.
fn clean_field(field: &str) -> String {
    field.trim_end_matches('<').replace('<', " ")
}

/// Split `SURNAME<<GIVEN<NAMES` into its two parts.
fn split_name(field: &str) -> (String, String) {
    match field.split_once("<<") {
        Some((surname, given)) => (clean_field(surname), clean_field(given)),
        None => (clean_field(field), String::new()),
    }
}

#[derive(Clone, Copy)]
enum DateKind {
    Birth,
    Expiry,
}

/// Normalize `YYMMDD` to `YYYY-MM-DD`. Birth years up to 23 map into the
/// 2000s, expiry years up to 49 do; everything else lands in the 1900s.
fn normalize_date(raw: &str, kind: DateKind) -> Option<String> {
    if raw.len() != 6 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let yy: u32 = raw[0..2].parse().ok()?;
    let month: u32 = raw[2..4].parse().ok()?;
    let day: u32 = raw[4..6].parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    let pivot = match kind {
        DateKind::Birth => 23,
        DateKind::Expiry => 49,
    };
    let year = if yy <= pivot { 2000 + yy } else { 1900 + yy };
    Some(format!("{:04}-{:02}-{:02}", year, month, day))
}

fn slice(line: &str, range: std::ops::Range<usize>) -> String {
    line.get(range).unwrap_or("").to_string()
}

fn char_at(line: &str, index: usize) -> Option<char> {
    line.chars().nth(index)
}

fn parse_td3(lines: &[String]) -> Result<MrzData, PkdError> {
    let l1 = &lines[0];
    let l2 = &lines[1];

    let (surname, given_names) = split_name(&slice(l1, 5..44));

    let document_number_raw = slice(l2, 0..9);
    let date_of_birth = slice(l2, 13..19);
    let date_of_expiry = slice(l2, 21..27);
    let personal_number_raw = slice(l2, 28..42);
    let personal_number = {
        let cleaned = clean_field(&personal_number_raw);
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    };

    Ok(MrzData {
        format: MrzFormat::Td3,
        document_code: clean_field(&slice(l1, 0..2)),
        issuing_country: slice(l1, 2..5).trim_end_matches('<').to_string(),
        surname,
        given_names,
        document_number: document_number_raw.trim_end_matches('<').to_string(),
        document_number_check_valid: check_digit_valid(&document_number_raw, char_at(l2, 9)),
        nationality: slice(l2, 10..13).trim_end_matches('<').to_string(),
        date_of_birth: date_of_birth.clone(),
        date_of_birth_iso: normalize_date(&date_of_birth, DateKind::Birth),
        date_of_birth_check_valid: check_digit_valid(&date_of_birth, char_at(l2, 19)),
        sex: char_at(l2, 20).map(String::from).unwrap_or_default(),
        date_of_expiry: date_of_expiry.clone(),
        date_of_expiry_iso: normalize_date(&date_of_expiry, DateKind::Expiry),
        date_of_expiry_check_valid: check_digit_valid(&date_of_expiry, char_at(l2, 27)),
        personal_number,
        raw_lines: lines.to_vec(),
    })
}

fn parse_td2(lines: &[String]) -> Result<MrzData, PkdError> {
    let l1 = &lines[0];
    let l2 = &lines[1];

    let (surname, given_names) = split_name(&slice(l1, 5..36));

    let document_number_raw = slice(l2, 0..9);
    let date_of_birth = slice(l2, 13..19);
    let date_of_expiry = slice(l2, 21..27);

    Ok(MrzData {
        format: MrzFormat::Td2,
        document_code: clean_field(&slice(l1, 0..2)),
        issuing_country: slice(l1, 2..5).trim_end_matches('<').to_string(),
        surname,
        given_names,
        document_number: document_number_raw.trim_end_matches('<').to_string(),
        document_number_check_valid: check_digit_valid(&document_number_raw, char_at(l2, 9)),
        nationality: slice(l2, 10..13).trim_end_matches('<').to_string(),
        date_of_birth: date_of_birth.clone(),
        date_of_birth_iso: normalize_date(&date_of_birth, DateKind::Birth),
        date_of_birth_check_valid: check_digit_valid(&date_of_birth, char_at(l2, 19)),
        sex: char_at(l2, 20).map(String::from).unwrap_or_default(),
        date_of_expiry: date_of_expiry.clone(),
        date_of_expiry_iso: normalize_date(&date_of_expiry, DateKind::Expiry),
        date_of_expiry_check_valid: check_digit_valid(&date_of_expiry, char_at(l2, 27)),
        personal_number: None,
        raw_lines: lines.to_vec(),
    })
}

fn parse_td1(lines: &[String]) -> Result<MrzData, PkdError> {
    let l1 = &lines[0];
    let l2 = &lines[1];
    let l3 = &lines[2];

    let (surname, given_names) = split_name(l3);

    let document_number_raw = slice(l1, 5..14);
    let date_of_birth = slice(l2, 0..6);
    let date_of_expiry = slice(l2, 8..14);
    let optional = clean_field(&slice(l1, 15..30));

    Ok(MrzData {
        format: MrzFormat::Td1,
        document_code: clean_field(&slice(l1, 0..2)),
        issuing_country: slice(l1, 2..5).trim_end_matches('<').to_string(),
        surname,
        given_names,
        document_number: document_number_raw.trim_end_matches('<').to_string(),
        document_number_check_valid: check_digit_valid(&document_number_raw, char_at(l1, 14)),
        nationality: slice(l2, 15..18).trim_end_matches('<').to_string(),
        date_of_birth: date_of_birth.clone(),
        date_of_birth_iso: normalize_date(&date_of_birth, DateKind::Birth),
        date_of_birth_check_valid: check_digit_valid(&date_of_birth, char_at(l2, 6)),
        sex: char_at(l2, 7).map(String::from).unwrap_or_default(),
        date_of_expiry: date_of_expiry.clone(),
        date_of_expiry_iso: normalize_date(&date_of_expiry, DateKind::Expiry),
        date_of_expiry_check_valid: check_digit_valid(&date_of_expiry, char_at(l2, 14)),
        personal_number: if optional.is_empty() {
            None
        } else {
            Some(optional)
        },
        raw_lines: lines.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    // The ICAO Doc 9303 TD3 specimen.
    const TD3_L1: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
    const TD3_L2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    fn specimen() -> String {
        format!("{}\n{}", TD3_L1, TD3_L2)
    }

    #[test]
    fn test_check_digit_specimen_values() {
        assert_eq!(compute_check_digit("L898902C3"), '6');
        assert_eq!(compute_check_digit("740812"), '2');
        assert_eq!(compute_check_digit("120415"), '9');
    }

    #[test]
    fn test_td3_fields() {
        let mrz = MrzParser::parse_text(&specimen()).unwrap();
        assert_eq!(mrz.format, MrzFormat::Td3);
        assert_eq!(mrz.document_code, "P");
        assert_eq!(mrz.issuing_country, "UTO");
        assert_eq!(mrz.surname, "ERIKSSON");
        assert_eq!(mrz.given_names, "ANNA MARIA");
        assert_eq!(mrz.document_number, "L898902C3");
        assert_eq!(mrz.nationality, "UTO");
        assert_eq!(mrz.sex, "F");
        assert_eq!(mrz.date_of_birth, "740812");
        assert_eq!(mrz.date_of_birth_iso.as_deref(), Some("1974-08-12"));
        assert_eq!(mrz.date_of_expiry_iso.as_deref(), Some("2012-04-15"));
        assert_eq!(mrz.personal_number.as_deref(), Some("ZE184226B"));
        assert!(mrz.document_number_check_valid);
        assert!(mrz.date_of_birth_check_valid);
        assert!(mrz.date_of_expiry_check_valid);
    }

    #[test]
    fn test_td3_invariants() {
        let mrz = MrzParser::parse_text(&specimen()).unwrap();
        let iso = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();

        assert!(!mrz.document_number.contains('<'));
        assert!(iso.is_match(mrz.date_of_birth_iso.as_deref().unwrap()));
        assert!(matches!(mrz.sex.as_str(), "M" | "F" | "<"));
        assert_eq!(mrz.nationality.len(), 3);
        assert!(mrz.nationality.chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_year_windows() {
        assert_eq!(
            normalize_date("230101", DateKind::Birth).unwrap(),
            "2023-01-01"
        );
        assert_eq!(
            normalize_date("240101", DateKind::Birth).unwrap(),
            "1924-01-01"
        );
        assert_eq!(
            normalize_date("490101", DateKind::Expiry).unwrap(),
            "2049-01-01"
        );
        assert_eq!(
            normalize_date("500101", DateKind::Expiry).unwrap(),
            "1950-01-01"
        );
    }

    #[test]
    fn test_invalid_dates_stay_raw() {
        assert!(normalize_date("991340", DateKind::Birth).is_none());
        assert!(normalize_date("9912", DateKind::Birth).is_none());
        assert!(normalize_date("99AB01", DateKind::Birth).is_none());
    }

    #[test]
    fn test_parse_dg1_with_template() {
        let mrz: String = specimen().chars().filter(|c| !c.is_whitespace()).collect();
        // 61 L { 5F1F L <mrz> }
        let mut inner = vec![0x5F, 0x1F, mrz.len() as u8];
        inner.extend_from_slice(mrz.as_bytes());
        let mut dg1 = vec![0x61, inner.len() as u8];
        dg1.extend_from_slice(&inner);

        let parsed = MrzParser::parse_dg1(&dg1).unwrap();
        assert_eq!(parsed.document_number, "L898902C3");
    }

    #[test]
    fn test_parse_dg1_by_scan() {
        // Junk prefix so the outer TLV walk fails and the byte scan kicks in.
        let mrz: String = specimen().chars().filter(|c| !c.is_whitespace()).collect();
        let mut dg1 = vec![0x00, 0x00, 0x5F, 0x1F, mrz.len() as u8];
        dg1.extend_from_slice(mrz.as_bytes());

        let parsed = MrzParser::parse_dg1(&dg1).unwrap();
        assert_eq!(parsed.surname, "ERIKSSON");
    }

    #[test]
    fn test_unknown_length_is_rejected() {
        assert!(MrzParser::parse_text("P<UTO").is_err());
    }

    #[test]
    fn test_foreign_characters_are_rejected() {
        let lowercase = specimen().to_lowercase();
        assert!(MrzParser::parse_text(&lowercase).is_err());
    }

    #[test]
    fn test_td1_layout() {
        let l1 = "I<UTOD231458907<<<<<<<<<<<<<<<";
        let l2 = "7408122F1204159UTO<<<<<<<<<<<6";
        let l3 = "ERIKSSON<<ANNA<MARIA<<<<<<<<<<";
        let mrz = MrzParser::parse_text(&format!("{}{}{}", l1, l2, l3)).unwrap();
        assert_eq!(mrz.format, MrzFormat::Td1);
        assert_eq!(mrz.document_number, "D23145890");
        assert_eq!(mrz.nationality, "UTO");
        assert_eq!(mrz.surname, "ERIKSSON");
        assert_eq!(mrz.date_of_birth_iso.as_deref(), Some("1974-08-12"));
    }
}
