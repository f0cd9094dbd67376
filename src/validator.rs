//! Field-level input validation
//!
//! A `Validator` collects one message per field; the first failure recorded
//! for a field wins. Handlers turn a non-empty validator into
//! `AppError::FailedValidation`.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::error::AppError;

/// HTML5 email address pattern
pub static EMAIL_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@",
        r"[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?",
        r"(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    ))
    .expect("email pattern is a valid regex")
});

/// Collects validation failures keyed by field name
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no failures were recorded
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a failure unless the field already has one
    pub fn add_error(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` for `key` when `ok` is false
    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_error(key, message);
        }
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Consume the validator, returning `Err(FailedValidation)` if anything failed
    pub fn finish(self) -> Result<(), AppError> {
        if self.valid() {
            Ok(())
        } else {
            Err(AppError::FailedValidation(self.errors))
        }
    }
}

/// True when `value` matches the pattern
pub fn matches(value: &str, rx: &Regex) -> bool {
    rx.is_match(value)
}

/// True when every element of `values` is distinct
pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(v))
}

/// True when `value` is one of `permitted`
pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: New validator is valid
    #[test]
    fn test_new_validator_is_valid() {
        assert!(Validator::new().valid());
    }

    // Test 2: First error for a key wins
    #[test]
    fn test_first_error_wins() {
        let mut v = Validator::new();
        v.add_error("password", "must be provided");
        v.add_error("password", "must be at least 8 bytes long");

        assert!(!v.valid());
        assert_eq!(v.errors()["password"], "must be provided");
    }

    // Test 3: check only records on failure
    #[test]
    fn test_check() {
        let mut v = Validator::new();
        v.check(true, "name", "must be provided");
        assert!(v.valid());

        v.check(false, "name", "must be provided");
        assert_eq!(v.errors().len(), 1);
    }

    // Test 4: Email pattern
    #[test]
    fn test_email_pattern() {
        assert!(matches("alice@example.com", &EMAIL_RX));
        assert!(matches("a.b+tag@sub.example.org", &EMAIL_RX));
        assert!(!matches("not-an-email", &EMAIL_RX));
        assert!(!matches("alice@", &EMAIL_RX));
        assert!(!matches("", &EMAIL_RX));
    }

    // Test 5: unique detects duplicates
    #[test]
    fn test_unique() {
        assert!(unique(&["drama", "comedy"]));
        assert!(!unique(&["drama", "drama"]));
        assert!(unique::<&str>(&[]));
    }

    // Test 6: finish converts errors into FailedValidation
    #[test]
    fn test_finish() {
        assert!(Validator::new().finish().is_ok());

        let mut v = Validator::new();
        v.add_error("email", "must be a valid email address");
        match v.finish() {
            Err(AppError::FailedValidation(errors)) => {
                assert_eq!(errors["email"], "must be a valid email address");
            }
            _ => panic!("Expected FailedValidation"),
        }
    }

    // Test 7: permitted_value
    #[test]
    fn test_permitted_value() {
        assert!(permitted_value(&"id", &["id", "title"]));
        assert!(!permitted_value(&"rating", &["id", "title"]));
    }
}
