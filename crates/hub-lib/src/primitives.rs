use bitcoin::hashes::{sha256::Hash as Sha256, Hash as _};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::fmt;

use crate::serde_utils::SliceHex;

/// A 256-bit hash digest, used as channel identifiers, secret hashes and secrets.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Hash256(#[serde_as(as = "SliceHex")] [u8; 32]);

impl From<[u8; 32]> for Hash256 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl From<Hash256> for [u8; 32] {
    fn from(value: Hash256) -> Self {
        value.0
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Hash256 {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 32 {
            return Err(anyhow::anyhow!("Invalid hash length"));
        }
        let mut data = [0u8; 32];
        data.copy_from_slice(value);
        Ok(Hash256(data))
    }
}

impl std::str::FromStr for Hash256 {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash256({:#x})", self)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self)
    }
}

pub fn sha256<T: AsRef<[u8]>>(data: T) -> [u8; 32] {
    Sha256::hash(data.as_ref()).to_byte_array()
}

impl Hash256 {
    /// The hash-lock committed to by a secret.
    pub fn lock_of(secret: &Hash256) -> Hash256 {
        sha256(secret).into()
    }
}

pub const SIGNATURE_SIZE: usize = 65;

/// A recoverable ECDSA signature laid out as `r || s || recovery_id`.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Signature(#[serde_as(as = "SliceHex")] [u8; SIGNATURE_SIZE]);

impl From<[u8; SIGNATURE_SIZE]> for Signature {
    fn from(value: [u8; SIGNATURE_SIZE]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = anyhow::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let data: [u8; SIGNATURE_SIZE] = value.try_into().map_err(|_| {
            anyhow::anyhow!(
                "Invalid signature length {}, expecting {}",
                value.len(),
                SIGNATURE_SIZE
            )
        })?;
        Ok(Signature(data))
    }
}

impl std::str::FromStr for Signature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.0))
    }
}

/// A settlement-layer account identifier.
///
/// Principals are compared byte-wise; the ordering decides which party is
/// `principal-1` in a channel key.
#[derive(Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Principal {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Principal({})", self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a fungible-token contract. The native asset has no identifier.
#[derive(Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
