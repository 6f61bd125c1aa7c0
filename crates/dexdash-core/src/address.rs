use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::RpcError;

/// Length in bytes of a decoded account address.
pub const ADDRESS_LEN: usize = 32;

/// A base58-encoded on-chain account address.
///
/// Construction always validates that the string decodes to exactly
/// [`ADDRESS_LEN`] bytes, so any `AccountAddress` in hand is well-formed.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn parse(s: &str) -> Result<Self, RpcError> {
        let trimmed = s.trim();
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| RpcError::InvalidAddress(format!("{trimmed}: {e}")))?;
        if bytes.len() != ADDRESS_LEN {
            return Err(RpcError::InvalidAddress(format!(
                "{trimmed}: expected {ADDRESS_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bs58::encode(bytes).into_string())
    }

    /// A fresh random address nobody owns. Used as the target of keep-alive
    /// listeners, which only exist to hold the push channel open.
    pub fn throwaway() -> Self {
        Self::from_bytes(rand::random())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountAddress {
    type Err = RpcError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for AccountAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
