use crate::validation::expiry::parse_document_date;
use std::collections::BTreeMap;

const NAME_FIELDS: [&str; 3] = ["surname", "last_name", "name"];
const DOB_FIELDS: [&str; 2] = ["date_of_birth", "dob"];

pub struct FormatValidator;

impl FormatValidator {
    /// Count simple consistency violations in OCR fields: a name written
    /// entirely in lowercase, and a date of birth that does not parse.
    pub fn consistency_flags(fields: &BTreeMap<String, String>) -> u32 {
        let mut flags = 0;

        if let Some(name) = Self::first_present(fields, &NAME_FIELDS) {
            if Self::is_all_lowercase(name) {
                flags += 1;
            }
        }

        if let Some(dob) = Self::first_present(fields, &DOB_FIELDS) {
            if parse_document_date(dob).is_none() {
                flags += 1;
            }
        }

        flags
    }

    fn first_present<'a>(fields: &'a BTreeMap<String, String>, names: &[&str]) -> Option<&'a str> {
        names
            .iter()
            .filter_map(|name| fields.get(*name))
            .map(|value| value.as_str())
            .find(|value| !value.is_empty())
    }

    // Needs at least one cased letter, like "john doe" but not "123"
    fn is_all_lowercase(value: &str) -> bool {
        value.chars().any(|c| c.is_lowercase()) && !value.chars().any(|c| c.is_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_clean_fields_have_no_flags() {
        let f = fields(&[("surname", "ERIKSSON"), ("date_of_birth", "1974-08-12")]);
        assert_eq!(FormatValidator::consistency_flags(&f), 0);
        assert_eq!(FormatValidator::consistency_flags(&fields(&[])), 0);
    }

    #[test]
    fn test_lowercase_name_and_bad_dob() {
        let f = fields(&[("last_name", "eriksson"), ("dob", "12 Aug 1974")]);
        assert_eq!(FormatValidator::consistency_flags(&f), 2);
    }

    #[test]
    fn test_name_fallback_order() {
        // Empty surname falls through to the next candidate
        let f = fields(&[("surname", ""), ("name", "anna maria")]);
        assert_eq!(FormatValidator::consistency_flags(&f), 1);
        let f = fields(&[("surname", "Eriksson"), ("name", "anna")]);
        assert_eq!(FormatValidator::consistency_flags(&f), 0);
    }

    #[test]
    fn test_name_without_letters_is_not_lowercase() {
        let f = fields(&[("name", "12345")]);
        assert_eq!(FormatValidator::consistency_flags(&f), 0);
    }
}
