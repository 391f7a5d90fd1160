// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest;
use thiserror::Error;

/// Size of SHA-256 digests.
pub const HASH_LEN: usize = 32;

/// 32-byte SHA-256 digest identifying the content of a blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sha256([u8; HASH_LEN]);

impl Sha256 {
    /// Calculate the digest of the provided bytes.
    pub fn new(buf: impl AsRef<[u8]>) -> Self {
        Self(sha2::Sha256::digest(buf.as_ref()).into())
    }

    /// Create a `Sha256` from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Bytes of the digest.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert the digest to a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First characters of the hex string, handy for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl AsRef<[u8]> for Sha256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; HASH_LEN]> for Sha256 {
    fn from(value: [u8; HASH_LEN]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Sha256 {
    type Error = HashError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let value_len = value.len();

        let checked_value: [u8; HASH_LEN] = value
            .try_into()
            .map_err(|_| HashError::InvalidLength(value_len, HASH_LEN))?;

        Ok(Self(checked_value))
    }
}

impl FromStr for Sha256 {
    type Err = HashError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::try_from(hex::decode(value.trim())?.as_slice())
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sha256").field(&self.to_hex()).finish()
    }
}

impl Serialize for Sha256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Sha256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value
            .parse()
            .map_err(|err: HashError| serde::de::Error::custom(err.to_string()))
    }
}

/// Error types for `Sha256` struct.
#[derive(Error, Debug)]
pub enum HashError {
    /// Hash string has an invalid length.
    #[error("invalid hash length {0} bytes, expected {1} bytes")]
    InvalidLength(usize, usize),

    /// Hash string contains invalid hexadecimal characters.
    #[error("invalid hex encoding in hash string")]
    InvalidHexEncoding(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::{HashError, Sha256};

    #[test]
    fn hashing() {
        let hash = Sha256::new(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(hash.short(), "ba7816bf");
    }

    #[test]
    fn parse_from_hex() {
        let hash: Sha256 = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
            .parse()
            .unwrap();
        assert_eq!(hash, Sha256::new(b"abc"));

        assert!(matches!(
            "ba7816".parse::<Sha256>(),
            Err(HashError::InvalidLength(3, 32))
        ));
        assert!(matches!(
            "not hex".parse::<Sha256>(),
            Err(HashError::InvalidHexEncoding(_))
        ));
    }

    #[test]
    fn serde_as_hex_string() {
        let hash = Sha256::new(b"abc");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(
            json,
            "\"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\""
        );

        let decoded: Sha256 = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, hash);
    }
}
