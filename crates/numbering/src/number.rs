//! Human-facing document numbers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use haulbooks_core::{DomainError, DomainResult, ValueObject};

use crate::counter::CounterKind;

/// A minted document number, e.g. `INV-2025-1001` or `SET-2025-1042`.
///
/// The persisted string always matches `^[A-Z]{2,4}-\d{4}-\d{4,}$`. Numbers
/// are unique per `(tenant, kind, year)` but gaps are acceptable; a failed
/// transaction may burn a value without it ever appearing on a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentNumber {
    prefix: String,
    year: i32,
    value: u64,
}

impl DocumentNumber {
    /// Build a number for a known counter kind.
    pub fn new(kind: CounterKind, year: i32, value: u64) -> DomainResult<Self> {
        Self::from_parts(kind.prefix(), year, value)
    }

    /// Build a number from raw parts, validating the persisted contract.
    pub fn from_parts(prefix: &str, year: i32, value: u64) -> DomainResult<Self> {
        if prefix.len() < 2
            || prefix.len() > 4
            || !prefix.bytes().all(|b| b.is_ascii_uppercase())
        {
            return Err(DomainError::validation(format!(
                "document prefix must be 2-4 uppercase letters, got `{prefix}`"
            )));
        }
        if !(1000..=9999).contains(&year) {
            return Err(DomainError::validation(format!(
                "document year must have four digits, got {year}"
            )));
        }
        Ok(Self {
            prefix: prefix.to_owned(),
            year,
            value,
        })
    }

    /// Parse a persisted number, validating the full contract.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let mut parts = s.splitn(3, '-');
        let (prefix, year, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(y), Some(v)) => (p, y, v),
            _ => {
                return Err(DomainError::validation(format!(
                    "document number `{s}` is not of the form PREFIX-YEAR-VALUE"
                )));
            }
        };

        let year: i32 = (year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()))
            .then(|| year.parse().ok())
            .flatten()
            .ok_or_else(|| {
                DomainError::validation(format!("document number `{s}` has a malformed year"))
            })?;

        if value.len() < 4 || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "document number `{s}` needs at least four sequence digits"
            )));
        }
        let value: u64 = value.parse().map_err(|_| {
            DomainError::validation(format!("document number `{s}` has an oversized sequence"))
        })?;

        Self::from_parts(prefix, year, value)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

impl ValueObject for DocumentNumber {}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{:04}", self.prefix, self.year, self.value)
    }
}

impl FromStr for DocumentNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DocumentNumber {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DocumentNumber> for String {
    fn from(n: DocumentNumber) -> Self {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn renders_the_documented_format() {
        let n = DocumentNumber::new(CounterKind::Invoice, 2025, 1001).unwrap();
        assert_eq!(n.to_string(), "INV-2025-1001");

        let n = DocumentNumber::new(CounterKind::Settlement, 2025, 1042).unwrap();
        assert_eq!(n.to_string(), "SET-2025-1042");
    }

    #[test]
    fn pads_small_values_to_four_digits() {
        let n = DocumentNumber::new(CounterKind::Invoice, 2025, 7).unwrap();
        assert_eq!(n.to_string(), "INV-2025-0007");
        assert_eq!(DocumentNumber::parse("INV-2025-0007").unwrap(), n);
    }

    #[test]
    fn parses_what_it_renders() {
        let n = DocumentNumber::new(CounterKind::Settlement, 2031, 250_101).unwrap();
        let parsed = DocumentNumber::parse(&n.to_string()).unwrap();
        assert_eq!(parsed, n);
        assert_eq!(parsed.prefix(), "SET");
        assert_eq!(parsed.year(), 2031);
        assert_eq!(parsed.value(), 250_101);
    }

    #[test]
    fn rejects_malformed_numbers() {
        for bad in [
            "",
            "INV",
            "INV-2025",
            "I-2025-1001",    // prefix too short
            "INVSS-2025-1001", // prefix too long
            "inv-2025-1001",  // lowercase prefix
            "INV-25-1001",    // two-digit year
            "INV-2025-999",   // three sequence digits
            "INV-2025-1a01",  // non-digit sequence
            "INV-20a5-1001",  // non-digit year
        ] {
            assert!(
                DocumentNumber::parse(bad).is_err(),
                "`{bad}` should not parse"
            );
        }
    }

    proptest! {
        #[test]
        fn round_trips_for_any_valid_parts(
            year in 1000i32..=9999,
            value in 0u64..10_000_000_000,
            kind in prop_oneof![Just(CounterKind::Invoice), Just(CounterKind::Settlement)],
        ) {
            let n = DocumentNumber::new(kind, year, value).unwrap();
            let parsed = DocumentNumber::parse(&n.to_string()).unwrap();
            prop_assert_eq!(parsed, n);
        }
    }
}
