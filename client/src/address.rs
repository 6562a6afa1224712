use crate::error::Error;
use core::fmt;
use serde::Serialize;
use std::str::FromStr;

const HEX_DIGITS: usize = 40;

/// Account or contract address, kept in lowercase hex.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Parses an account as reported by the wallet.
    ///
    /// Only the lowercase form is accepted.
    pub fn from_account(account: &str) -> Result<Self, Error> {
        if is_valid_address(account) && !has_uppercase(account) {
            Ok(Self(account.to_string()))
        } else {
            Err(Error::InvalidAddressFormat(account.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The all-zero address, used as a placeholder in unconfigured builds.
    pub fn is_zero(&self) -> bool {
        self.0[2..].bytes().all(|b| b == b'0')
    }
}

/// Checks for `0x` followed by exactly 40 hex digits, in any case.
pub fn is_valid_address(s: &str) -> bool {
    s.len() == 2 + HEX_DIGITS
        && s.starts_with("0x")
        && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn has_uppercase(s: &str) -> bool {
    s[2..].bytes().any(|b| b.is_ascii_uppercase())
}

// accepts checksummed input
impl FromStr for Address {
    type Err = Error;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let trimmed = string.trim();
        if is_valid_address(trimmed) {
            Ok(Self(trimmed.to_ascii_lowercase()))
        } else {
            Err(Error::InvalidAddressFormat(string.to_string()))
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
