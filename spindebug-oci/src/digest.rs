//! `sha256:<hex>` content digests.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::OciError;

/// A content address. Only sha256 is supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Digest of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(bytes);
        Self(format!("sha256:{}", hex::encode(h.finalize())))
    }

    pub fn parse(s: &str) -> Result<Self, OciError> {
        let valid = s
            .strip_prefix("sha256:")
            .is_some_and(|hex| hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()));
        if valid {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(OciError::InvalidDigest(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0["sha256:".len()..]
    }

    /// Fail unless `bytes` hash to this digest.
    pub fn verify(&self, bytes: &[u8]) -> Result<(), OciError> {
        let actual = Self::of(bytes);
        if &actual == self {
            Ok(())
        } else {
            Err(OciError::DigestMismatch {
                expected: self.clone(),
                actual,
            })
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Digest {
    type Error = OciError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest_of_empty_input() {
        assert_eq!(
            Digest::of(b"").as_str(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn verify_detects_tampering() {
        let d = Digest::of(b"layer");
        assert!(d.verify(b"layer").is_ok());
        assert!(matches!(
            d.verify(b"layer!"),
            Err(OciError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn parse_rejects_other_algorithms() {
        assert!(Digest::parse("sha512:abcd").is_err());
        assert!(Digest::parse(Digest::of(b"x").as_str()).is_ok());
    }
}
