//! Content digests of the form `<algorithm>:<hex>` (spec.md §3.2).
//!
//! Generalizes the single-algorithm `Digest` hand-rolled in the teacher's
//! `peoci::spec::Digest` (sha256-only, fixed-size byte array) into the
//! string-based, multi-algorithm form the cache's on-disk paths and JSON
//! payloads actually need: a digest is carried around as a key into three
//! independent directory trees (`blobs/`, `refs/`, `manifests/`), not
//! decoded into bytes, so there is no benefit to the fixed-width array
//! representation here the way there was for `peoci`'s in-memory bincode
//! cache values.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid digest: {0}")]
pub struct InvalidDigest(pub String);

impl Digest {
    pub fn algorithm(&self) -> Algorithm {
        match self.0.split_once(':') {
            Some(("sha256", _)) => Algorithm::Sha256,
            Some(("sha384", _)) => Algorithm::Sha384,
            Some(("sha512", _)) => Algorithm::Sha512,
            _ => unreachable!("validated at construction"),
        }
    }

    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two hex characters used to shard `blobs/<xx>/<hash>` and `refs/<xx>/<hash>` (spec.md §4.5).
    pub fn shard(&self) -> &str {
        &self.hex()[..2]
    }

    pub fn sha256_of(data: impl AsRef<[u8]>) -> Digest {
        use sha2::{Digest as _, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(data.as_ref());
        Digest(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

impl FromStr for Digest {
    type Err = InvalidDigest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algo, hex_part)) = s.split_once(':') else {
            return Err(InvalidDigest(s.to_string()));
        };
        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha384" => Algorithm::Sha384,
            "sha512" => Algorithm::Sha512,
            _ => return Err(InvalidDigest(s.to_string())),
        };
        if hex_part.len() != algorithm.hex_len()
            || !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(InvalidDigest(s.to_string()));
        }
        Ok(Digest(s.to_string()))
    }
}

impl TryFrom<String> for Digest {
    type Error = InvalidDigest;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> String {
        d.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `true` iff `s` is a well-formed `<algorithm>:<hex>` digest (spec.md §3.2).
pub fn is_valid(s: &str) -> bool {
    s.parse::<Digest>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_each_algorithm() {
        let sha256 = format!("sha256:{}", "a".repeat(64));
        let sha384 = format!("sha384:{}", "b".repeat(96));
        let sha512 = format!("sha512:{}", "c".repeat(128));
        assert!(sha256.parse::<Digest>().is_ok());
        assert!(sha384.parse::<Digest>().is_ok());
        assert!(sha512.parse::<Digest>().is_ok());
    }

    #[test]
    fn rejects_wrong_length_or_unknown_algorithm() {
        assert!(format!("sha256:{}", "a".repeat(63)).parse::<Digest>().is_err());
        assert!(format!("sha256:{}", "a".repeat(65)).parse::<Digest>().is_err());
        assert!(format!("md5:{}", "a".repeat(32)).parse::<Digest>().is_err());
        assert!("not-a-digest".parse::<Digest>().is_err());
        assert!(format!("sha256:{}", "A".repeat(64)).parse::<Digest>().is_err());
    }

    #[test]
    fn shard_is_first_two_hex_chars() {
        let d: Digest = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
            .parse()
            .unwrap();
        assert_eq!(d.shard(), "2c");
    }

    #[test]
    fn sha256_of_matches_known_vector() {
        let d = Digest::sha256_of(b"hello");
        assert_eq!(
            d.as_str(),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
