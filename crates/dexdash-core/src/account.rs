use serde::{Deserialize, Serialize};

use crate::address::AccountAddress;

/// The state of one on-chain account as last reported by an endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: AccountAddress,
    pub data: Vec<u8>,
    pub executable: bool,
    pub rent_epoch: u64,
}

impl AccountInfo {
    /// Whether `other` is a material change relative to `self`.
    ///
    /// Only the raw data bytes and the balance count. Owner, executable flag,
    /// rent epoch and however the endpoint framed the notification are
    /// ignored, so redundant pushes compare equal.
    pub fn differs_from(&self, other: &AccountInfo) -> bool {
        self.data != other.data || self.lamports != other.lamports
    }
}

/// A slot-change notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub slot: u64,
    pub parent: u64,
    pub root: u64,
}
