use crate::models::{DocumentFormat, MrzResult};
use log::debug;
use std::collections::BTreeMap;

/// ICAO 9303 weighting applied cyclically to each character.
const WEIGHTS: [u32; 3] = [7, 3, 1];

/// Lines shorter than this (after whitespace removal) are OCR noise, not MRZ.
const MIN_LINE_LENGTH: usize = 30;

pub struct MrzValidator;

impl MrzValidator {
    /// Parse and checksum-validate MRZ lines. Never fails: anything that is
    /// not a recognisable TD1 or TD3 zone comes back with `valid = false`.
    pub fn validate<S: AsRef<str>>(lines: &[S]) -> MrzResult {
        let normalized: Vec<Vec<char>> = lines
            .iter()
            .map(|line| {
                line.as_ref()
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<Vec<char>>()
            })
            .filter(|line| line.len() >= MIN_LINE_LENGTH)
            .collect();

        let result = match Self::detect_format(&normalized) {
            Some(DocumentFormat::TD3) => Self::validate_td3(&normalized[1]),
            Some(DocumentFormat::TD1) => {
                Self::validate_td1(&normalized[0], &normalized[1], &normalized[2])
            }
            None => MrzResult::unsupported(),
        };
        debug!(
            "MRZ {:?} from {} candidate lines: valid={}",
            result.format,
            normalized.len(),
            result.valid
        );
        result
    }

    /// ICAO 7-3-1 check digit of a field, or `None` if it holds a character
    /// outside `0-9`, `A-Z` and the `<` filler.
    pub fn check_digit(field: &str) -> Option<u32> {
        let chars: Vec<char> = field.chars().collect();
        Self::check_digit_chars(&chars)
    }

    fn check_digit_chars(field: &[char]) -> Option<u32> {
        let mut total = 0u32;
        for (i, c) in field.iter().enumerate() {
            total += Self::char_value(*c)? * WEIGHTS[i % 3];
        }
        Some(total % 10)
    }

    fn char_value(c: char) -> Option<u32> {
        match c {
            '0'..='9' => c.to_digit(10),
            '<' => Some(0),
            'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
            'a'..='z' => Some(c.to_ascii_uppercase() as u32 - 'A' as u32 + 10),
            _ => None,
        }
    }

    fn detect_format(lines: &[Vec<char>]) -> Option<DocumentFormat> {
        [DocumentFormat::TD3, DocumentFormat::TD1]
            .into_iter()
            .find(|format| {
                lines.len() == format.mrz_lines()
                    && lines
                        .iter()
                        .all(|line| line.len() == format.mrz_chars_per_line())
            })
    }

    fn field_matches(field: &[char], declared: char) -> bool {
        match Self::check_digit_chars(field) {
            Some(digit) => declared.to_digit(10) == Some(digit),
            None => false,
        }
    }

    fn validate_td3(line2: &[char]) -> MrzResult {
        let passport_number = &line2[0..9];
        let dob = &line2[13..19];
        let expiry = &line2[21..27];

        let mut composite: Vec<char> = Vec::with_capacity(39);
        composite.extend_from_slice(&line2[0..10]);
        composite.extend_from_slice(&line2[13..20]);
        composite.extend_from_slice(&line2[21..43]);

        let valid = Self::field_matches(passport_number, line2[9])
            && Self::field_matches(dob, line2[19])
            && Self::field_matches(expiry, line2[27])
            && Self::field_matches(&composite, line2[43]);

        MrzResult {
            valid,
            format: Some(DocumentFormat::TD3),
            fields: Self::fields(DocumentFormat::TD3, passport_number, dob, expiry),
        }
    }

    fn validate_td1(line1: &[char], line2: &[char], line3: &[char]) -> MrzResult {
        let document_number = &line1[5..14];
        let dob = &line2[0..6];
        let expiry = &line2[8..14];

        let mut composite: Vec<char> = Vec::with_capacity(51);
        composite.extend_from_slice(&line1[5..15]);
        composite.extend_from_slice(&line2[0..7]);
        composite.extend_from_slice(&line2[8..15]);
        composite.extend_from_slice(&line1[15..30]);
        composite.extend_from_slice(&line2[15..30]);

        let valid = Self::field_matches(document_number, line1[14])
            && Self::field_matches(dob, line2[6])
            && Self::field_matches(expiry, line2[14])
            && Self::field_matches(&composite, line3[29]);

        MrzResult {
            valid,
            format: Some(DocumentFormat::TD1),
            fields: Self::fields(DocumentFormat::TD1, document_number, dob, expiry),
        }
    }

    fn fields(
        format: DocumentFormat,
        document_number: &[char],
        dob: &[char],
        expiry: &[char],
    ) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("format".to_string(), format.as_str().to_string());
        fields.insert(
            "document_number".to_string(),
            document_number.iter().filter(|c| **c != '<').collect(),
        );
        fields.insert("date_of_birth".to_string(), dob.iter().collect());
        fields.insert("expiry".to_string(), expiry.iter().collect());
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TD3_LINE1: &str = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
    const TD3_LINE2: &str = "L898902C36UTO7408122F1204159ZE184226B<<<<<10";

    const TD1_LINE1: &str = "I<UTOD231458907<<<<<<<<<<<<<<<";
    const TD1_LINE2: &str = "7408122F1204159UTO<<<<<<<<<<<6";
    const TD1_LINE3: &str = "ERIKSSON<<ANNA<MARIA<<<<<<<<<3";

    #[test]
    fn test_check_digit() {
        assert_eq!(MrzValidator::check_digit("L898902C3"), Some(6));
        assert_eq!(MrzValidator::check_digit("740812"), Some(2));
        assert_eq!(MrzValidator::check_digit("<<<<<<"), Some(0));
        assert_eq!(MrzValidator::check_digit(""), Some(0));
        assert_eq!(MrzValidator::check_digit("AB#"), None);
    }

    #[test]
    fn test_td3_specimen_is_valid() {
        let result = MrzValidator::validate(&[TD3_LINE1, TD3_LINE2]);
        assert!(result.valid);
        assert_eq!(result.format, Some(DocumentFormat::TD3));
        assert_eq!(result.fields["document_number"], "L898902C3");
        assert_eq!(result.fields["date_of_birth"], "740812");
        assert_eq!(result.fields["expiry"], "120415");
    }

    #[test]
    fn test_td3_flipped_check_digits_invalid() {
        // Check digit columns: passport number, dob, expiry, composite
        for col in [9usize, 19, 27, 43] {
            let mut chars: Vec<char> = TD3_LINE2.chars().collect();
            let digit = chars[col].to_digit(10).unwrap();
            chars[col] = std::char::from_digit((digit + 1) % 10, 10).unwrap();
            let line2: String = chars.into_iter().collect();
            let result = MrzValidator::validate(&[TD3_LINE1, line2.as_str()]);
            assert!(!result.valid, "flipping column {} stayed valid", col);
            // Fields are still returned for an invalid zone
            assert_eq!(result.fields["document_number"], "L898902C3");
        }
    }

    #[test]
    fn test_td1_valid_and_invalid_composite() {
        let result = MrzValidator::validate(&[TD1_LINE1, TD1_LINE2, TD1_LINE3]);
        assert!(result.valid);
        assert_eq!(result.format, Some(DocumentFormat::TD1));
        assert_eq!(result.fields["document_number"], "D23145890");

        let line3 = "ERIKSSON<<ANNA<MARIA<<<<<<<<<<";
        let result = MrzValidator::validate(&[TD1_LINE1, TD1_LINE2, line3]);
        assert!(!result.valid);
        assert_eq!(result.fields["expiry"], "120415");
    }

    #[test]
    fn test_whitespace_is_removed() {
        let spaced = "L898902C36 UTO7408122F 1204159ZE184226B<<<<<10";
        let result = MrzValidator::validate(&[TD3_LINE1, spaced]);
        assert!(result.valid);
    }

    #[test]
    fn test_short_lines_are_dropped() {
        let result = MrzValidator::validate(&["P<UTO", TD3_LINE1, TD3_LINE2, ""]);
        assert!(result.valid);
    }

    #[test]
    fn test_unsupported_shapes() {
        let empty: [&str; 0] = [];
        for lines in [
            empty.to_vec(),
            vec![TD3_LINE1],
            vec![TD3_LINE1, TD1_LINE1],
            vec![TD1_LINE1, TD1_LINE2],
            vec![TD3_LINE1, TD3_LINE2, TD3_LINE2],
        ] {
            let result = MrzValidator::validate(&lines);
            assert!(!result.valid);
            assert!(result.format.is_none());
            assert!(result.fields.is_empty());
        }
    }

    #[test]
    fn test_unexpected_characters_never_panic() {
        let garbage = "Ł898902C36UTO7408122F1204159ZE184226B<<<<<1é";
        let result = MrzValidator::validate(&[TD3_LINE1, garbage]);
        assert!(!result.valid);
        assert_eq!(result.format, Some(DocumentFormat::TD3));
    }
}
