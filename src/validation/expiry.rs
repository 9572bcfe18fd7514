use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Two-digit years below this pivot belong to the 2000s.
const CENTURY_PIVOT: u32 = 70;

const EXPIRY_FIELDS: [&str; 2] = ["date_of_expiry", "expiry_date"];

fn iso_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ](\d{2}):(\d{2})(?::(\d{2}))?)?$")
            .expect("static date pattern")
    })
}

pub struct ExpiryValidator;

impl ExpiryValidator {
    /// True iff the OCR expiry field parses to a moment strictly after `now`.
    /// Absent or unreadable expiry is simply not valid.
    pub fn is_valid(fields: &BTreeMap<String, String>, now: DateTime<Utc>) -> bool {
        let expiry = EXPIRY_FIELDS
            .iter()
            .filter_map(|name| fields.get(*name))
            .find(|value| !value.trim().is_empty());

        match expiry.and_then(|value| parse_document_date(value)) {
            Some(date) => date.and_utc() > now,
            None => false,
        }
    }
}

/// Parse a date as printed on identity documents: `YYYY-MM-DD`,
/// `YYYY/MM/DD` (optionally followed by a time), or MRZ-style `YYMMDD`.
pub fn parse_document_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim().replace('/', "-");
    if value.is_empty() {
        return None;
    }

    if value.len() == 6 && value.chars().all(|c| c.is_ascii_digit()) {
        let yy: u32 = value[0..2].parse().ok()?;
        let mm: u32 = value[2..4].parse().ok()?;
        let dd: u32 = value[4..6].parse().ok()?;
        let year = if yy < CENTURY_PIVOT { 2000 + yy } else { 1900 + yy };
        return NaiveDate::from_ymd_opt(year as i32, mm, dd)?.and_hms_opt(0, 0, 0);
    }

    let caps = iso_date_pattern().captures(&value)?;
    let number = |idx: usize| -> Option<u32> {
        match caps.get(idx) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(0),
        }
    };
    let date = NaiveDate::from_ymd_opt(number(1)? as i32, number(2)?, number(3)?)?;
    date.and_hms_opt(number(4)?, number(5)?, number(6)?)
}
