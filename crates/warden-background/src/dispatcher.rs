//! Request dispatcher
//!
//! [`Background`] owns every orchestrator component and routes each inbound
//! message type to its handler. Routing is one exhaustive `match` over
//! [`MessageType`], so a new message type does not compile until it has a
//! handler.

use crate::auto_lock::AutoLockController;
use crate::config::BackgroundConfig;
use crate::pending::PendingRequestStore;
use crate::port::Port;
use crate::process::{EngineConfig, ProcessEngine};
use crate::requests::{
    parse, ApprovePasswordRequest, ApproveSignatureRequest, AuthorizeApproveRequest,
    AuthorizeRequest, BalanceSubscribeRequest, BalanceSyncRequest, ChangePasswordRequest,
    ConfirmationRequest, ConfirmationResponse, CreatedAccount, EarningProcessRequest,
    ExportAccountRequest, HandleProcessRequest, IdRequest, MetadataRequest,
    ProcessSubscribeRequest, SaveAlwaysLockRequest, SaveAutoLockTimeRequest, SigningRequest,
    SigningResult, SubmitStepRequest, SwapProcessRequest, UnlockRequest,
};
use crate::services::{BalanceService, StepBuilder};
use crate::subscriptions::SubscriptionRegistry;
use crate::SharedDatabase;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use warden_core::{
    AccountInfo, CombineInfo, Error, KeyringGateway, MessageType, NewAccount, ProcessStatus,
    Result,
};
use warden_storage_sqlite::{Database, SettingsStore};

/// Signing queue
pub type SigningQueue = PendingRequestStore<SigningRequest, SigningResult>;

/// Authorization and metadata queue
pub type ConfirmationQueue = PendingRequestStore<ConfirmationRequest, ConfirmationResponse>;

/// The background orchestrator
pub struct Background {
    config: BackgroundConfig,
    keyring: Arc<dyn KeyringGateway>,
    balances: Arc<dyn BalanceService>,
    auto_lock: Arc<AutoLockController>,
    subscriptions: SubscriptionRegistry,
    signing: SigningQueue,
    confirmations: ConfirmationQueue,
    engine: ProcessEngine,
    accounts: watch::Sender<Vec<AccountInfo>>,
}

impl Background {
    /// Open the configured database and start the orchestrator
    pub async fn new(
        config: BackgroundConfig,
        keyring: Arc<dyn KeyringGateway>,
        balances: Arc<dyn BalanceService>,
        builder: Arc<dyn StepBuilder>,
    ) -> Result<Arc<Self>> {
        let db = match &config.database_path {
            Some(path) => Database::open(path)?,
            None => Database::open_in_memory()?,
        };
        Self::with_database(config, db, keyring, balances, builder).await
    }

    /// Start the orchestrator on an open database
    pub async fn with_database(
        config: BackgroundConfig,
        db: Database,
        keyring: Arc<dyn KeyringGateway>,
        balances: Arc<dyn BalanceService>,
        builder: Arc<dyn StepBuilder>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let db: SharedDatabase = Arc::new(Mutex::new(db));

        let (settings, last_active) = {
            let db = db.lock();
            let store = SettingsStore::new(&db);
            (store.load_auto_lock()?, store.last_active().ok().flatten())
        };
        let settings = settings.unwrap_or(config.auto_lock);

        let auto_lock = AutoLockController::new(
            keyring.clone(),
            db.clone(),
            settings,
            keyring.is_locked().await,
        );
        auto_lock.reset();

        let engine = ProcessEngine::new(
            db,
            builder,
            balances.clone(),
            EngineConfig::from(&config),
        );
        let recovered = engine.recover_interrupted()?;

        let (accounts, _) = watch::channel(keyring.accounts().await);

        info!(
            event = "background_started",
            time_auto_lock = settings.time_auto_lock,
            always_lock = settings.always_lock,
            recovered_processes = recovered,
            last_active = %last_active.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "Background started"
        );

        Ok(Arc::new(Self {
            signing: PendingRequestStore::new("signing", config.settled_history),
            confirmations: PendingRequestStore::new("confirmations", config.settled_history),
            config,
            keyring,
            balances,
            auto_lock,
            subscriptions: SubscriptionRegistry::new(),
            engine,
            accounts,
        }))
    }

    /// Configuration in use
    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Auto-lock controller
    pub fn auto_lock(&self) -> &Arc<AutoLockController> {
        &self.auto_lock
    }

    /// Live subscriptions
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Signing queue
    pub fn signing(&self) -> &SigningQueue {
        &self.signing
    }

    /// Authorization and metadata queue
    pub fn confirmations(&self) -> &ConfirmationQueue {
        &self.confirmations
    }

    /// Process engine
    pub fn engine(&self) -> &ProcessEngine {
        &self.engine
    }

    /// Handle one inbound message.
    ///
    /// Re-arms the auto-lock timer before routing and runs the always-lock
    /// check after a successful dispatch. Unknown message types fail with
    /// [`Error::UnhandledMessage`].
    pub async fn handle(&self, id: &str, message: &str, request: Value, port: &Port) -> Result<Value> {
        self.auto_lock.reset();

        let message_type: MessageType = message.parse()?;
        debug!(request_id = %id, message = %message_type, port_id = %port.id(), "Dispatching");

        let first = self.auto_lock.begin_dispatch();
        let result = self.dispatch(message_type, id, request, port).await;
        if result.is_ok() {
            self.auto_lock.after_dispatch(message_type, first).await;
        }
        result
    }

    async fn dispatch(&self, message: MessageType, id: &str, request: Value, port: &Port) -> Result<Value> {
        match message {
            MessageType::Ping | MessageType::PublicPing => Ok(json!(true)),
            MessageType::SubscriptionCancel => {
                let target = parse::<IdRequest>(request)?.into_id();
                Ok(json!(self.subscriptions.cancel(&target)))
            }

            MessageType::KeyringLock => {
                self.auto_lock.lock_now().await?;
                Ok(json!(true))
            }
            MessageType::KeyringUnlock => {
                let req: UnlockRequest = parse(request)?;
                self.keyring.unlock(&req.password).await?;
                self.auto_lock.set_locked(false);
                Ok(json!(true))
            }
            MessageType::KeyringIsLocked => Ok(json!(self.keyring.is_locked().await)),
            MessageType::KeyringSubscribe => {
                self.subscriptions
                    .forward_watch(id, port, self.auto_lock.subscribe_lock_state())
            }
            MessageType::KeyringChangePassword => {
                let req: ChangePasswordRequest = parse(request)?;
                self.keyring
                    .change_password(&req.old_password, &req.new_password)
                    .await?;
                info!(event = "password_changed", "Keyring password changed");
                Ok(json!(true))
            }

            MessageType::AccountsCreate => {
                let req: NewAccount = parse(request)?;
                let account = self.keyring.create_account(req).await?;
                let total = self.refresh_accounts().await;
                info!(event = "account_created", address = %account.address, kind = ?account.kind, "Account created");
                Ok(serde_json::to_value(CreatedAccount { account, total })?)
            }
            MessageType::AccountsSubscribe => {
                self.subscriptions
                    .forward_watch(id, port, self.accounts.subscribe())
            }
            MessageType::AccountsExport => {
                let req: ExportAccountRequest = parse(request)?;
                let export = self.keyring.export_account(&req.address, &req.password).await?;
                Ok(serde_json::to_value(export)?)
            }

            MessageType::SettingsSubscribe => {
                self.subscriptions
                    .forward_watch(id, port, self.auto_lock.subscribe_settings())
            }
            MessageType::SettingsSaveAutoLockTime => {
                let req: SaveAutoLockTimeRequest = parse(request)?;
                let saved = self
                    .auto_lock
                    .update_settings(|s| s.time_auto_lock = req.value)?;
                Ok(serde_json::to_value(saved)?)
            }
            MessageType::SettingsSaveAlwaysLock => {
                let req: SaveAlwaysLockRequest = parse(request)?;
                let saved = self.auto_lock.update_settings(|s| s.always_lock = req.value)?;
                Ok(serde_json::to_value(saved)?)
            }

            MessageType::BalanceSubscribe => {
                let req: BalanceSubscribeRequest = parse(request)?;
                let stream = self
                    .balances
                    .subscribe_balance(&req.chain, &req.address, &req.token)
                    .await?;
                let current = stream.current.clone();
                let (receiver, producer) = stream.into_parts();
                self.subscriptions.forward(id, port, receiver, producer);
                Ok(serde_json::to_value(current)?)
            }
            MessageType::BalanceSync => {
                let req: BalanceSyncRequest = if request.is_null() {
                    BalanceSyncRequest::default()
                } else {
                    parse(request)?
                };
                let addresses = if req.addresses.is_empty() {
                    self.keyring
                        .accounts()
                        .await
                        .into_iter()
                        .map(|a| a.address)
                        .collect()
                } else {
                    req.addresses
                };
                self.auto_lock
                    .without_auto_lock(self.balances.sync(&addresses))
                    .await?;
                Ok(json!(true))
            }

            MessageType::SignBytes => self.sign_bytes(id, request).await,
            MessageType::SigningRequests => {
                self.subscriptions
                    .forward_watch(id, port, self.signing.subscribe())
            }
            MessageType::SigningApprovePassword => {
                self.approve_with_password(parse(request)?).await
            }
            MessageType::SigningApproveSignature => {
                let req: ApproveSignatureRequest = parse(request)?;
                decode_hex(&req.signature)?;
                self.signing.resolve(
                    &req.id,
                    SigningResult {
                        id: req.id.clone(),
                        signature: req.signature,
                    },
                )?;
                Ok(json!(true))
            }
            MessageType::SigningReject => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.signing.reject(&target, Error::UserRejected)?;
                Ok(json!(true))
            }
            MessageType::SigningCancel => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.signing.cancel(&target)?;
                Ok(json!(true))
            }

            MessageType::AuthorizeTab => {
                let req: AuthorizeRequest = parse(request)?;
                let response = self
                    .confirmations
                    .enqueue(id, ConfirmationRequest::Authorize(req))?;
                match response.await? {
                    ConfirmationResponse::Authorized(accounts) => {
                        if let Err(e) = self.confirmations.complete(id) {
                            debug!(request_id = %id, "Settled request was not completed: {}", e);
                        }
                        Ok(json!(accounts))
                    }
                    ConfirmationResponse::MetadataAccepted => {
                        Err(Error::Other("Authorization settled as metadata".to_string()))
                    }
                }
            }
            MessageType::MetadataProvide => {
                let req: MetadataRequest = parse(request)?;
                let response = self
                    .confirmations
                    .enqueue(id, ConfirmationRequest::Metadata(req))?;
                response.await?;
                if let Err(e) = self.confirmations.complete(id) {
                    debug!(request_id = %id, "Settled request was not completed: {}", e);
                }
                Ok(json!(true))
            }
            MessageType::ConfirmationRequests => {
                self.subscriptions
                    .forward_watch(id, port, self.confirmations.subscribe())
            }
            MessageType::AuthorizeApprove => {
                let req: AuthorizeApproveRequest = parse(request)?;
                self.expect_confirmation(&req.id, ConfirmationKind::Authorize)?;
                self.confirmations
                    .resolve(&req.id, ConfirmationResponse::Authorized(req.accounts))?;
                Ok(json!(true))
            }
            MessageType::AuthorizeReject => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.expect_confirmation(&target, ConfirmationKind::Authorize)?;
                self.confirmations.reject(&target, Error::UserRejected)?;
                Ok(json!(true))
            }
            MessageType::AuthorizeCancel => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.expect_confirmation(&target, ConfirmationKind::Authorize)?;
                self.confirmations.cancel(&target)?;
                Ok(json!(true))
            }
            MessageType::MetadataApprove => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.expect_confirmation(&target, ConfirmationKind::Metadata)?;
                self.confirmations
                    .resolve(&target, ConfirmationResponse::MetadataAccepted)?;
                Ok(json!(true))
            }
            MessageType::MetadataReject => {
                let target = parse::<IdRequest>(request)?.into_id();
                self.expect_confirmation(&target, ConfirmationKind::Metadata)?;
                self.confirmations.reject(&target, Error::UserRejected)?;
                Ok(json!(true))
            }

            MessageType::SwapHandleProcess => {
                let req: SwapProcessRequest = parse(request)?;
                self.handle_process(req, CombineInfo::Swap).await
            }
            MessageType::EarningHandleProcess => {
                let req: EarningProcessRequest = parse(request)?;
                self.handle_process(req, CombineInfo::Earning).await
            }
            MessageType::ProcessSubmitStep => {
                let req: SubmitStepRequest = parse(request)?;
                let process = self.engine.submit_step(&req.process_id, req.step).await?;
                Ok(serde_json::to_value(process)?)
            }
            MessageType::ProcessSubscribe => {
                let req: ProcessSubscribeRequest = parse(request)?;
                let updates = self.engine.subscribe(&req.process_id)?;
                self.subscriptions.forward_watch(id, port, updates)
            }
            MessageType::ProcessList => Ok(serde_json::to_value(self.engine.list()?)?),
            MessageType::ProcessClear => {
                let removed = self.engine.clear_terminal()?;
                Ok(json!({ "removed": removed }))
            }
        }
    }

    async fn refresh_accounts(&self) -> usize {
        let accounts = self.keyring.accounts().await;
        let total = accounts.len();
        self.accounts.send_replace(accounts);
        total
    }

    async fn sign_bytes(&self, id: &str, request: Value) -> Result<Value> {
        let req: SigningRequest = parse(request)?;
        decode_hex(&req.data)?;
        if self.keyring.account(&req.address).await.is_none() {
            return Err(Error::NotFound(format!("account {}", req.address)));
        }

        let response = self.signing.enqueue(id, req)?;
        let result = response.await?;
        if let Err(e) = self.signing.complete(id) {
            debug!(request_id = %id, "Settled request was not completed: {}", e);
        }
        Ok(serde_json::to_value(result)?)
    }

    async fn approve_with_password(&self, req: ApprovePasswordRequest) -> Result<Value> {
        let pending = self.signing.payload(&req.id)?;

        if self.keyring.is_locked().await {
            let password = req.password.as_deref().ok_or(Error::Locked)?;
            self.keyring.unlock(password).await?;
            self.auto_lock.set_locked(false);
        }

        let payload = decode_hex(&pending.data)?;
        let signature = self.keyring.sign(&pending.address, &payload).await?;
        self.signing.resolve(
            &req.id,
            SigningResult {
                id: req.id.clone(),
                signature: format!("0x{}", hex::encode(signature)),
            },
        )?;
        Ok(json!(true))
    }

    fn expect_confirmation(&self, id: &str, kind: ConfirmationKind) -> Result<()> {
        let matches = match (self.confirmations.payload(id)?, kind) {
            (ConfirmationRequest::Authorize(_), ConfirmationKind::Authorize) => true,
            (ConfirmationRequest::Metadata(_), ConfirmationKind::Metadata) => true,
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::validation(format!("Request {} is not a {:?} request", id, kind)))
        }
    }

    async fn handle_process<I>(
        &self,
        req: HandleProcessRequest<I>,
        wrap: fn(I) -> CombineInfo,
    ) -> Result<Value> {
        let steps = req.process_steps();
        let account = self
            .keyring
            .account(&req.address)
            .await
            .ok_or_else(|| Error::NotFound(format!("account {}", req.address)))?;

        if req.one_sign {
            if !account.kind.supports_one_sign() {
                return Err(Error::validation(
                    "One-sign is only available for password accounts",
                ));
            }
            if steps.len() <= 2 {
                return Err(Error::validation("One-sign needs more than two steps"));
            }
        }

        let combine_info = wrap(req.combine_info);
        if steps.len() < self.engine.min_steps() {
            let done = self
                .engine
                .execute_direct(&req.address, steps, combine_info)
                .await?;
            return Ok(json!({ "processId": Value::Null, "steps": done }));
        }

        let process = self.engine.create_process_if_need(
            &req.process_id,
            &req.address,
            steps,
            combine_info,
            req.one_sign,
        )?;
        if process.status != ProcessStatus::Queued {
            debug!(process_id = %process.id, "Process already started, returning current state");
            return Ok(serde_json::to_value(process)?);
        }

        let process = if process.one_sign {
            self.auto_lock
                .without_auto_lock(self.engine.run(&process.id))
                .await?
        } else {
            self.engine.submit_step(&process.id, 0).await?
        };
        Ok(serde_json::to_value(process)?)
    }

    /// Tear down every subscription and cancel every pending request
    pub fn shutdown(&self) {
        self.subscriptions.cancel_all();
        let signing = self.signing.cancel_all();
        let confirmations = self.confirmations.cancel_all();
        self.auto_lock.disarm();
        info!(
            event = "background_stopped",
            cancelled_signing = signing,
            cancelled_confirmations = confirmations,
            "Background stopped"
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfirmationKind {
    Authorize,
    Metadata,
}

fn decode_hex(data: &str) -> Result<Vec<u8>> {
    let trimmed = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(trimmed).map_err(|e| Error::validation(format!("Invalid hex data: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("0x0102").unwrap(), vec![1, 2]);
        assert_eq!(decode_hex("ff").unwrap(), vec![255]);
        assert!(matches!(decode_hex("0xzz"), Err(Error::Validation(_))));
    }
}
