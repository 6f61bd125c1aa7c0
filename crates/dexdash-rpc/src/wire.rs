//! JSON-RPC 2.0 envelopes and the account encoding used by the endpoint.

use base64::Engine as _;
use dexdash_core::{AccountAddress, AccountInfo, RpcError, SlotInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Split into the result value or a typed error.
    pub fn into_result(self) -> Result<Value, RpcError> {
        if let Some(err) = self.error {
            return Err(RpcError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        // `null` is a legitimate result (e.g. a missing account), so only
        // an absent field is an error.
        self.result
            .ok_or_else(|| RpcError::Decode("response carried neither result nor error".into()))
    }
}

/// `{ "context": { "slot": n }, "value": T }` wrapper used by read methods.
#[derive(Debug, Deserialize)]
pub struct WithContext<T> {
    pub context: ResponseContext,
    pub value: T,
}

#[derive(Debug, Deserialize)]
pub struct ResponseContext {
    pub slot: u64,
}

/// Account as encoded on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAccount {
    pub lamports: u64,
    pub owner: String,
    pub data: UiAccountData,
    pub executable: bool,
    #[serde(default)]
    pub rent_epoch: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UiAccountData {
    /// `["<payload>", "base64"]`
    Encoded(String, String),
    /// Bare base58 string (legacy binary encoding).
    Legacy(String),
}

impl UiAccount {
    pub fn decode(self) -> Result<AccountInfo, RpcError> {
        let data = match self.data {
            UiAccountData::Encoded(payload, encoding) => match encoding.as_str() {
                "base64" => base64::engine::general_purpose::STANDARD
                    .decode(payload.as_bytes())
                    .map_err(|e| RpcError::Decode(format!("account data: {e}")))?,
                "base58" => bs58::decode(&payload)
                    .into_vec()
                    .map_err(|e| RpcError::Decode(format!("account data: {e}")))?,
                other => {
                    return Err(RpcError::Decode(format!(
                        "unsupported account encoding: {other}"
                    )))
                }
            },
            UiAccountData::Legacy(payload) => bs58::decode(&payload)
                .into_vec()
                .map_err(|e| RpcError::Decode(format!("account data: {e}")))?,
        };

        Ok(AccountInfo {
            lamports: self.lamports,
            owner: AccountAddress::parse(&self.owner)?,
            data,
            executable: self.executable,
            rent_epoch: self.rent_epoch,
        })
    }
}

/// Decode a `getAccountInfo` result or an `accountNotification` result.
pub fn decode_account_value(value: Value) -> Result<Option<AccountInfo>, RpcError> {
    let wrapped: WithContext<Option<UiAccount>> = serde_json::from_value(value)?;
    wrapped.value.map(UiAccount::decode).transpose()
}

pub fn decode_slot(value: Value) -> Result<SlotInfo, RpcError> {
    Ok(serde_json::from_value(value)?)
}
