//! Typed request payloads
//!
//! Each dispatcher arm deserializes its payload into one of these. A payload
//! that does not match is a validation error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{
    AccountInfo, Error, EarningCombineInfo, ProcessStep, Result, StepFee, StepType,
    SwapCombineInfo,
};

/// Decode a request payload
pub fn parse<T: DeserializeOwned>(request: Value) -> Result<T> {
    serde_json::from_value(request).map_err(|e| Error::validation(format!("Malformed request: {}", e)))
}

/// Payload carrying only a request or subscription id.
///
/// Accepts either a bare string or `{ "id": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdRequest {
    /// Bare id
    Bare(String),
    /// Wrapped id
    Wrapped {
        /// The id
        id: String,
    },
}

impl IdRequest {
    /// The id
    pub fn into_id(self) -> String {
        match self {
            IdRequest::Bare(id) | IdRequest::Wrapped { id } => id,
        }
    }
}

/// `pri(keyring.unlock)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    /// Wallet password
    pub password: String,
}

/// `pri(keyring.change)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    /// Current password
    pub old_password: String,
    /// Replacement password
    pub new_password: String,
}

/// `pri(accounts.export.json)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportAccountRequest {
    /// Account to export
    pub address: String,
    /// Wallet password
    pub password: String,
}

/// `pri(settings.saveAutoLockTime)`
#[derive(Debug, Clone, Deserialize)]
pub struct SaveAutoLockTimeRequest {
    /// Minutes; zero disables the timer
    pub value: u32,
}

/// `pri(settings.saveAlwaysLock)`
#[derive(Debug, Clone, Deserialize)]
pub struct SaveAlwaysLockRequest {
    /// Lock after each sensitive action when the timer is off
    pub value: bool,
}

/// `pri(balance.subscribe)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSubscribeRequest {
    /// Chain slug
    pub chain: String,
    /// Account address
    pub address: String,
    /// Token slug
    pub token: String,
}

/// `pri(balance.sync)`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSyncRequest {
    /// Accounts to sync; all accounts when empty
    #[serde(default)]
    pub addresses: Vec<String>,
}

/// What a dapp asks the user to sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    /// Signing account
    pub address: String,
    /// Hex-encoded bytes
    pub data: String,
    /// Requesting site
    #[serde(default)]
    pub origin: Option<String>,
}

/// Settled signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningResult {
    /// Request id
    pub id: String,
    /// Hex-encoded signature
    pub signature: String,
}

/// `pri(signing.approve.password)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovePasswordRequest {
    /// Signing request id
    pub id: String,
    /// Password, needed when the keyring is locked
    #[serde(default)]
    pub password: Option<String>,
}

/// `pri(signing.approve.signature)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveSignatureRequest {
    /// Signing request id
    pub id: String,
    /// Hex-encoded signature produced outside the keyring
    pub signature: String,
}

/// `pub(authorize.tab)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    /// Requesting site
    pub origin: String,
    /// Page URL
    pub url: String,
}

/// `pub(metadata.provide)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRequest {
    /// Requesting site
    pub origin: String,
    /// Chain name
    pub chain: String,
    /// Genesis hash identifying the chain
    pub genesis_hash: String,
    /// Runtime spec version
    pub spec_version: u32,
}

/// Request waiting in the confirmation queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConfirmationRequest {
    /// Site asks to see accounts
    Authorize(AuthorizeRequest),
    /// Site offers chain metadata
    Metadata(MetadataRequest),
}

/// How a confirmation was approved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResponse {
    /// Accounts exposed to the site
    Authorized(Vec<String>),
    /// Metadata accepted
    MetadataAccepted,
}

/// `pri(authorize.approve)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeApproveRequest {
    /// Authorization request id
    pub id: String,
    /// Accounts the user chose to expose
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// One step of a flow as sent by the UI
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    /// Kind of work
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Quoted fee
    #[serde(default)]
    pub fee: Option<StepFee>,
}

/// `pri(swap.handleProcess)` and `pri(earning.handleProcess)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleProcessRequest<I> {
    /// Process id chosen by the UI
    pub process_id: String,
    /// Signing account
    pub address: String,
    /// Ordered steps
    pub steps: Vec<StepRequest>,
    /// Flow-specific data
    pub combine_info: I,
    /// Submit later steps without asking again
    #[serde(default)]
    pub one_sign: bool,
}

impl<I> HandleProcessRequest<I> {
    /// Queued steps with positional ids
    pub fn process_steps(&self) -> Vec<ProcessStep> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| ProcessStep::new(i, s.step_type, s.fee.clone()))
            .collect()
    }
}

/// Swap flow request
pub type SwapProcessRequest = HandleProcessRequest<SwapCombineInfo>;

/// Earning flow request
pub type EarningProcessRequest = HandleProcessRequest<EarningCombineInfo>;

/// `pri(process.submitStep)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitStepRequest {
    /// Process id
    pub process_id: String,
    /// Step index
    pub step: usize,
}

/// `pri(process.subscribe)`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSubscribeRequest {
    /// Process id
    pub process_id: String,
}

/// Response to `pri(accounts.create)`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedAccount {
    /// New account
    pub account: AccountInfo,
    /// Total accounts after creation
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_request_forms() {
        let bare: IdRequest = parse(json!("sub1")).unwrap();
        let wrapped: IdRequest = parse(json!({"id": "sub1"})).unwrap();
        assert_eq!(bare.into_id(), "sub1");
        assert_eq!(wrapped.into_id(), "sub1");
    }

    #[test]
    fn test_malformed_payload_is_validation_error() {
        let result: Result<UnlockRequest> = parse(json!({"pass": "x"}));
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_handle_process_request() {
        let request: SwapProcessRequest = parse(json!({
            "processId": "p1",
            "address": "5Grw",
            "steps": [{"type": "XCM"}, {"type": "SET_FEE_TOKEN"}, {"type": "SWAP", "fee": {"amount": "10", "token": "HDX"}}],
            "combineInfo": {
                "quoteId": "q1",
                "fromToken": "DOT",
                "toToken": "HDX",
                "fromAmount": "1",
                "toAmount": "2",
                "slippage": 0.01
            },
            "oneSign": true
        }))
        .unwrap();

        let steps = request.process_steps();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].id, 2);
        assert_eq!(steps[0].step_type, StepType::Xcm);
        assert!(steps[2].fee.is_some());
        assert!(request.one_sign);
    }

    #[test]
    fn test_confirmation_request_is_tagged() {
        let json = serde_json::to_value(ConfirmationRequest::Authorize(AuthorizeRequest {
            origin: "polkadot.js".to_string(),
            url: "https://polkadot.js.org/apps".to_string(),
        }))
        .unwrap();
        assert_eq!(json["type"], "authorize");
        assert_eq!(json["origin"], "polkadot.js");
    }
}
