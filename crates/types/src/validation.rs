//! Input validation for chain call arguments.
//!
//! Checks run client-side before a transaction is signed, so malformed input
//! never costs a fee.
//!
//! ## Character Whitelists
//!
//! - Bucket names: `[a-z0-9.-]{3,63}`, starting and ending alphanumeric.
//! - Gateway domains: printable ASCII without whitespace.

use std::fmt;

/// Shortest accepted bucket name.
pub const MIN_BUCKET_NAME_LEN: usize = 3;

/// Longest accepted bucket name.
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Longest accepted gateway domain, in bytes.
pub const MAX_DOMAIN_LEN: usize = 100;

/// Validation error with structured context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the violated constraint.
    pub constraint: String,
}

impl ValidationError {
    fn new(field: &str, constraint: impl Into<String>) -> Self {
        Self { field: field.to_owned(), constraint: constraint.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.constraint)
    }
}

impl std::error::Error for ValidationError {}

/// Validates a bucket name.
///
/// Bucket names must:
/// - Be 3 to 63 characters long
/// - Contain only `[a-z0-9.-]`
/// - Start and end with a letter or digit
/// - Not contain `..`, `.-` or `-.`
/// - Not look like an IPv4 address
///
/// # Errors
///
/// Returns [`ValidationError`] naming the first violated rule.
pub fn validate_bucket_name(name: &str) -> Result<(), ValidationError> {
    const FIELD: &str = "bucket_name";

    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
        return Err(ValidationError::new(
            FIELD,
            format!(
                "length {} outside {MIN_BUCKET_NAME_LEN}..={MAX_BUCKET_NAME_LEN}",
                name.len()
            ),
        ));
    }
    if let Some(pos) = name.find(|c: char| !is_bucket_char(c)) {
        return Err(ValidationError::new(
            FIELD,
            format!(
                "contains invalid character {:?} at byte offset {pos}; allowed: [a-z0-9.-]",
                name[pos..].chars().next().unwrap_or('\0'),
            ),
        ));
    }
    let alnum_edge = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !alnum_edge(name.chars().next()) || !alnum_edge(name.chars().last()) {
        return Err(ValidationError::new(FIELD, "must start and end with a letter or digit"));
    }
    if ["..", ".-", "-."].iter().any(|pattern| name.contains(pattern)) {
        return Err(ValidationError::new(FIELD, "must not contain '..', '.-' or '-.'"));
    }
    if name.parse::<std::net::Ipv4Addr>().is_ok() {
        return Err(ValidationError::new(FIELD, "must not be formatted as an IP address"));
    }
    Ok(())
}

/// Validates the domain a gateway advertises.
///
/// Empty domains are allowed: the gateway is then reachable by peer id only.
///
/// # Errors
///
/// Returns [`ValidationError`] if the domain is too long or contains
/// whitespace or non-ASCII characters.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(ValidationError::new(
            "domain",
            format!("length {} bytes exceeds maximum {MAX_DOMAIN_LEN} bytes", domain.len()),
        ));
    }
    if domain.chars().any(|c| !c.is_ascii_graphic()) {
        return Err(ValidationError::new("domain", "must be printable ASCII without whitespace"));
    }
    Ok(())
}

#[inline]
fn is_bucket_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-'
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_bucket_names() {
        for name in ["abc", "my-bucket", "photos.2024", "a1-b2.c3", &"x".repeat(63)] {
            assert!(validate_bucket_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_bad_bucket_names() {
        let cases = [
            ("ab", "length"),
            (&*"x".repeat(64), "length"),
            ("My-Bucket", "invalid character"),
            ("under_score", "invalid character"),
            ("-leading", "start and end"),
            ("trailing.", "start and end"),
            ("double..dot", "'..'"),
            ("dash.-dot", "'..'"),
            ("192.168.1.10", "IP address"),
        ];
        for (name, fragment) in cases {
            let err = validate_bucket_name(name).unwrap_err();
            assert_eq!(err.field, "bucket_name");
            assert!(err.constraint.contains(fragment), "{name}: {err}");
        }
    }

    #[test]
    fn domains() {
        assert!(validate_domain("").is_ok());
        assert!(validate_domain("gateway.example.com:8080").is_ok());
        assert!(validate_domain("has space.com").is_err());
        assert!(validate_domain(&"d".repeat(101)).is_err());
    }
}
