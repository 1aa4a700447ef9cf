use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `local@domain.tld`, case-sensitive, 1-255 characters. Mirrors spec §3.
static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// A validated email-shaped endpoint identifier.
///
/// Construction always goes through [`Address::parse`]; there is no public
/// constructor that skips validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address must be 1-255 characters")]
    BadLength,
    #[error("address must match local@domain.tld")]
    BadSyntax,
}

impl Address {
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        if raw.is_empty() || raw.len() > 255 {
            return Err(AddressError::BadLength);
        }
        if !ADDRESS_RE.is_match(raw) {
            return Err(AddressError::BadSyntax);
        }
        Ok(Address(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the last `@`, used for domain and federation routing.
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
