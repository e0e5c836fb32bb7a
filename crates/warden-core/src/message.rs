//! RPC message table and wire envelopes
//!
//! Every message type the background understands is declared once in
//! [`message_types!`]; the wire string, the enum variant and the
//! subscription/sensitivity flags are generated from that single table.

use crate::error::{Error, ErrorCategory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

macro_rules! message_types {
    ($($(#[$doc:meta])* $variant:ident => $wire:literal),* $(,)?) => {
        /// Message types routed by the dispatcher
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($(#[$doc])* $variant,)*
        }

        impl MessageType {
            /// All known message types
            pub const ALL: &'static [MessageType] = &[$(MessageType::$variant,)*];

            /// Wire name, e.g. `pri(keyring.unlock)`
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(MessageType::$variant => $wire,)*
                }
            }
        }

        impl FromStr for MessageType {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(MessageType::$variant),)*
                    other => Err(Error::UnhandledMessage(other.to_string())),
                }
            }
        }
    };
}

message_types! {
    /// Liveness check from the UI
    Ping => "pri(ping)",
    /// Liveness check from a dapp
    PublicPing => "pub(ping)",
    /// Cancel a subscription by id
    SubscriptionCancel => "pri(subscription.cancel)",

    /// Lock the keyring
    KeyringLock => "pri(keyring.lock)",
    /// Unlock the keyring with a password
    KeyringUnlock => "pri(keyring.unlock)",
    /// Query lock state
    KeyringIsLocked => "pri(keyring.isLocked)",
    /// Stream lock state changes
    KeyringSubscribe => "pri(keyring.subscribe)",
    /// Change the keyring password
    KeyringChangePassword => "pri(keyring.change)",

    /// Create a new account
    AccountsCreate => "pri(accounts.create)",
    /// Stream the account list
    AccountsSubscribe => "pri(accounts.subscribe)",
    /// Export an account as an encrypted blob
    AccountsExport => "pri(accounts.export.json)",

    /// Stream auto-lock settings
    SettingsSubscribe => "pri(settings.subscribe)",
    /// Save the auto-lock timeout in minutes
    SettingsSaveAutoLockTime => "pri(settings.saveAutoLockTime)",
    /// Save the always-lock flag
    SettingsSaveAlwaysLock => "pri(settings.saveAlwaysLock)",

    /// Stream balance updates for an address
    BalanceSubscribe => "pri(balance.subscribe)",
    /// Run the initial balance sync
    BalanceSync => "pri(balance.sync)",

    /// Dapp asks for a signature over raw bytes
    SignBytes => "pub(bytes.sign)",
    /// Stream pending signing requests
    SigningRequests => "pri(signing.requests)",
    /// Approve a signing request and sign with the keyring
    SigningApprovePassword => "pri(signing.approve.password)",
    /// Approve a signing request with an externally produced signature
    SigningApproveSignature => "pri(signing.approve.signature)",
    /// Reject a signing request
    SigningReject => "pri(signing.reject)",
    /// Cancel a signing request
    SigningCancel => "pri(signing.cancel)",

    /// Dapp asks for account access
    AuthorizeTab => "pub(authorize.tab)",
    /// Dapp offers chain metadata
    MetadataProvide => "pub(metadata.provide)",
    /// Stream pending authorization and metadata requests
    ConfirmationRequests => "pri(confirmations.requests)",
    /// Approve an authorization request
    AuthorizeApprove => "pri(authorize.approve)",
    /// Reject an authorization request
    AuthorizeReject => "pri(authorize.reject)",
    /// Cancel an authorization request
    AuthorizeCancel => "pri(authorize.cancel)",
    /// Approve a metadata request
    MetadataApprove => "pri(metadata.approve)",
    /// Reject a metadata request
    MetadataReject => "pri(metadata.reject)",

    /// Start a swap flow
    SwapHandleProcess => "pri(swap.handleProcess)",
    /// Start an earning flow
    EarningHandleProcess => "pri(earning.handleProcess)",
    /// Submit one step of a tracked process
    ProcessSubmitStep => "pri(process.submitStep)",
    /// Stream a tracked process
    ProcessSubscribe => "pri(process.subscribe)",
    /// List persisted processes
    ProcessList => "pri(process.list)",
    /// Delete terminal processes
    ProcessClear => "pri(process.clear)",
}

impl MessageType {
    /// Whether the call opens a stream correlated by its message id
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            MessageType::KeyringSubscribe
                | MessageType::AccountsSubscribe
                | MessageType::SettingsSubscribe
                | MessageType::BalanceSubscribe
                | MessageType::SigningRequests
                | MessageType::ConfirmationRequests
                | MessageType::ProcessSubscribe
        )
    }

    /// Actions after which a zero-timeout always-lock wallet locks at once
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            MessageType::AccountsCreate
                | MessageType::AccountsExport
                | MessageType::KeyringChangePassword
        )
    }

    /// Whether the message comes from a dapp rather than the wallet UI
    pub fn is_public(&self) -> bool {
        self.as_str().starts_with("pub(")
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound message from a client port
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    /// Correlation id, reused as subscription id for streams
    pub id: String,
    /// Wire message type, e.g. `pri(keyring.unlock)`
    pub message: String,
    /// Request payload
    #[serde(default)]
    pub request: Value,
}

/// Outbound message to a client port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortMessage {
    /// Final response to a call
    Response {
        /// Correlation id
        id: String,
        /// Result value
        response: Value,
    },
    /// Failed call
    Error {
        /// Correlation id
        id: String,
        /// Human readable error
        error: String,
        /// Error category for UI branching
        category: ErrorCategory,
    },
    /// Pushed stream value
    Subscription {
        /// Subscription id (the id of the call that opened it)
        id: String,
        /// Pushed value
        subscription: Value,
    },
}

impl PortMessage {
    /// Build an error envelope for `id`
    pub fn error(id: impl Into<String>, error: &Error) -> Self {
        PortMessage::Error {
            id: id.into(),
            error: error.user_message(),
            category: error.category(),
        }
    }

    /// Correlation id of the envelope
    pub fn id(&self) -> &str {
        match self {
            PortMessage::Response { id, .. }
            | PortMessage::Error { id, .. }
            | PortMessage::Subscription { id, .. } => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_wire_names_are_unique_and_parse_back() {
        let mut seen = HashSet::new();
        for ty in MessageType::ALL {
            assert!(seen.insert(ty.as_str()), "duplicate wire name {}", ty);
            assert_eq!(ty.as_str().parse::<MessageType>().unwrap(), *ty);
        }
    }

    #[test]
    fn test_wire_names_follow_convention() {
        for ty in MessageType::ALL {
            let name = ty.as_str();
            assert!(
                (name.starts_with("pri(") || name.starts_with("pub(")) && name.ends_with(')'),
                "bad wire name {}",
                name
            );
        }
    }

    #[test]
    fn test_unknown_type_is_unhandled() {
        let err = "pri(nope.nothing)".parse::<MessageType>().unwrap_err();
        assert!(matches!(err, Error::UnhandledMessage(ref t) if t == "pri(nope.nothing)"));
    }

    #[test]
    fn test_flags() {
        assert!(MessageType::BalanceSubscribe.is_subscription());
        assert!(!MessageType::KeyringLock.is_subscription());
        assert!(MessageType::KeyringChangePassword.is_sensitive());
        assert!(!MessageType::Ping.is_sensitive());
        assert!(!MessageType::KeyringUnlock.is_sensitive());
        assert!(MessageType::SignBytes.is_public());
        assert!(!MessageType::SigningCancel.is_public());
    }

    #[test]
    fn test_port_message_shapes() {
        let msg = PortMessage::Subscription {
            id: "sub1".to_string(),
            subscription: serde_json::json!({"free": "10"}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["id"], "sub1");
        assert_eq!(json["subscription"]["free"], "10");

        let err = PortMessage::error("x", &Error::Cancelled);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "Cancelled");
        assert_eq!(json["category"], "user_cancel");
    }
}
