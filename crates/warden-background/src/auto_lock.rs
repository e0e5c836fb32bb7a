//! Auto-lock controller
//!
//! Locks the keyring after a period without inbound messages. Every
//! dispatched message re-arms the countdown. Long unattended work can hold a
//! [`SkipGuard`] to keep the wallet unlocked while it runs.

use crate::SharedDatabase;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_core::{AutoLockSettings, Error, KeyringGateway, MessageType, Result, MAX_AUTO_LOCK_MINUTES};
use warden_storage_sqlite::SettingsStore;

#[derive(Default)]
struct TimerState {
    handle: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
}

/// Suppresses auto-lock while alive
#[must_use = "auto-lock resumes as soon as the guard is dropped"]
pub struct SkipGuard {
    skips: Arc<AtomicUsize>,
}

impl Drop for SkipGuard {
    fn drop(&mut self) {
        self.skips.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Inactivity lock owned by the background
pub struct AutoLockController {
    keyring: Arc<dyn KeyringGateway>,
    db: SharedDatabase,
    settings: watch::Sender<AutoLockSettings>,
    lock_state: watch::Sender<bool>,
    timer: Mutex<TimerState>,
    skips: Arc<AtomicUsize>,
    first_dispatch: AtomicBool,
}

impl AutoLockController {
    /// Create a disarmed controller; call [`reset`](Self::reset) to arm it
    pub fn new(
        keyring: Arc<dyn KeyringGateway>,
        db: SharedDatabase,
        settings: AutoLockSettings,
        locked: bool,
    ) -> Arc<Self> {
        let (settings, _) = watch::channel(settings);
        let (lock_state, _) = watch::channel(locked);
        Arc::new(Self {
            keyring,
            db,
            settings,
            lock_state,
            timer: Mutex::new(TimerState::default()),
            skips: Arc::new(AtomicUsize::new(0)),
            first_dispatch: AtomicBool::new(true),
        })
    }

    /// Current settings
    pub fn settings(&self) -> AutoLockSettings {
        *self.settings.borrow()
    }

    /// Watch settings changes
    pub fn subscribe_settings(&self) -> watch::Receiver<AutoLockSettings> {
        self.settings.subscribe()
    }

    /// Watch keyring lock state
    pub fn subscribe_lock_state(&self) -> watch::Receiver<bool> {
        self.lock_state.subscribe()
    }

    /// Last broadcast lock state
    pub fn is_locked(&self) -> bool {
        *self.lock_state.borrow()
    }

    /// Broadcast a lock state change
    pub fn set_locked(&self, locked: bool) {
        self.lock_state.send_if_modified(|state| {
            let changed = *state != locked;
            *state = locked;
            changed
        });
    }

    /// When the armed timer fires, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.lock().deadline
    }

    /// Cancel the countdown and start a new one from now
    pub fn reset(self: &Arc<Self>) {
        let settings = self.settings();
        let mut timer = self.timer.lock();
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        timer.deadline = None;

        if !settings.timer_enabled() {
            return;
        }

        let deadline = Instant::now() + Duration::from_secs(u64::from(settings.time_auto_lock) * 60);
        let controller: Weak<Self> = Arc::downgrade(self);
        timer.deadline = Some(deadline);
        timer.handle = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(controller) = controller.upgrade() {
                controller.fire(deadline).await;
            }
        }));
    }

    /// Disarm the countdown
    pub fn disarm(&self) {
        let mut timer = self.timer.lock();
        if let Some(handle) = timer.handle.take() {
            handle.abort();
        }
        timer.deadline = None;
    }

    async fn fire(&self, deadline: Instant) {
        {
            let mut timer = self.timer.lock();
            if timer.deadline != Some(deadline) {
                debug!(event = "auto_lock_superseded", "Countdown was re-armed, not locking");
                return;
            }
            timer.deadline = None;
            timer.handle = None;
        }

        if self.is_skipping() {
            debug!(event = "auto_lock_skipped", "Auto-lock suppressed by a running task");
            return;
        }

        match self.keyring.lock().await {
            Ok(()) => {
                self.set_locked(true);
                info!(event = "auto_locked", "Keyring locked after inactivity");
                self.record_last_active();
            }
            Err(e) => debug!(event = "auto_lock_failed", "Auto-lock did not lock: {}", e),
        }
    }

    fn record_last_active(&self) {
        let db = self.db.lock();
        if let Err(e) = SettingsStore::new(&db).set_last_active(chrono::Utc::now()) {
            warn!("Failed to persist last active time: {}", e);
        }
    }

    /// Whether a [`SkipGuard`] is alive
    pub fn is_skipping(&self) -> bool {
        self.skips.load(Ordering::Acquire) > 0
    }

    /// Suppress auto-lock until the guard drops
    pub fn skip_guard(&self) -> SkipGuard {
        self.skips.fetch_add(1, Ordering::AcqRel);
        SkipGuard {
            skips: self.skips.clone(),
        }
    }

    /// Run `fut` with auto-lock suppressed, whatever its outcome
    pub async fn without_auto_lock<F: Future>(&self, fut: F) -> F::Output {
        let _guard = self.skip_guard();
        fut.await
    }

    /// Claim the first-call slot; true only for the first message dispatched
    /// since startup, whether or not it has finished
    pub fn begin_dispatch(&self) -> bool {
        self.first_dispatch.swap(false, Ordering::AcqRel)
    }

    /// Zero-timeout always-lock check, run after each successfully dispatched
    /// message. `first` is what [`begin_dispatch`](Self::begin_dispatch)
    /// returned for that message; the first message never locks.
    pub async fn after_dispatch(&self, message: MessageType, first: bool) {
        if first || !message.is_sensitive() || !self.settings().locks_after_action() {
            return;
        }

        match self.keyring.lock().await {
            Ok(()) => {
                self.set_locked(true);
                info!(event = "always_locked", message = %message, "Keyring locked after sensitive action");
            }
            Err(e) => debug!("Always-lock did not lock: {}", e),
        }
    }

    /// Lock now on user request; locking a locked keyring succeeds
    pub async fn lock_now(&self) -> Result<()> {
        match self.keyring.lock().await {
            Ok(()) | Err(Error::Locked) => {}
            Err(e) => return Err(e),
        }
        self.set_locked(true);
        self.disarm();
        Ok(())
    }

    /// Change, persist and apply settings
    pub fn update_settings<F>(self: &Arc<Self>, change: F) -> Result<AutoLockSettings>
    where
        F: FnOnce(&mut AutoLockSettings),
    {
        let mut settings = self.settings();
        change(&mut settings);
        if settings.time_auto_lock > MAX_AUTO_LOCK_MINUTES {
            return Err(Error::validation(format!(
                "Auto-lock time must be at most {} minutes",
                MAX_AUTO_LOCK_MINUTES
            )));
        }

        {
            let db = self.db.lock();
            SettingsStore::new(&db).save_auto_lock(&settings)?;
        }
        self.settings.send_replace(settings);
        info!(
            event = "auto_lock_settings_saved",
            time_auto_lock = settings.time_auto_lock,
            always_lock = settings.always_lock,
            "Auto-lock settings saved"
        );
        self.reset();
        Ok(settings)
    }
}

impl Drop for AutoLockController {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{KdfParams, MemoryKeyring};
    use warden_storage_sqlite::Database;

    fn controller(minutes: u32, always_lock: bool) -> (Arc<AutoLockController>, Arc<MemoryKeyring>) {
        let keyring = Arc::new(MemoryKeyring::with_kdf("correct horse", KdfParams::insecure_fast()).unwrap());
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let controller = AutoLockController::new(
            keyring.clone(),
            db,
            AutoLockSettings {
                time_auto_lock: minutes,
                always_lock,
            },
            false,
        );
        (controller, keyring)
    }

    #[tokio::test(start_paused = true)]
    async fn test_locks_after_timeout() {
        let (controller, keyring) = controller(5, false);
        controller.reset();

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        assert!(!keyring.is_locked().await);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(keyring.is_locked().await);
        assert!(controller.is_locked());
        assert!(controller.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_pushes_deadline() {
        let (controller, keyring) = controller(5, false);
        controller.reset();

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(4 * 60)).await;
            controller.reset();
            assert_eq!(
                controller.deadline(),
                Some(Instant::now() + Duration::from_secs(5 * 60))
            );
        }
        assert!(!keyring.is_locked().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_guard_suppresses_and_clears() {
        let (controller, keyring) = controller(1, false);
        controller.reset();

        let result: std::result::Result<(), &str> = controller
            .without_auto_lock(async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Err("sync failed")
            })
            .await;
        assert!(result.is_err());
        assert!(!keyring.is_locked().await);
        assert!(!controller.is_skipping());

        controller.reset();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(keyring.is_locked().await);
    }

    #[tokio::test]
    async fn test_zero_timeout_disarms() {
        let (controller, _) = controller(0, false);
        controller.reset();
        assert!(controller.deadline().is_none());
    }

    #[tokio::test]
    async fn test_always_lock_skips_first_call() {
        let (controller, keyring) = controller(0, true);

        let first = controller.begin_dispatch();
        controller.after_dispatch(MessageType::AccountsCreate, first).await;
        assert!(!keyring.is_locked().await);

        let first = controller.begin_dispatch();
        controller.after_dispatch(MessageType::Ping, first).await;
        assert!(!keyring.is_locked().await);

        let first = controller.begin_dispatch();
        controller.after_dispatch(MessageType::KeyringChangePassword, first).await;
        assert!(keyring.is_locked().await);
        assert!(controller.is_locked());
    }

    #[tokio::test]
    async fn test_first_slot_taken_at_dispatch_not_completion() {
        let (controller, keyring) = controller(0, true);

        // A long-running first message claims the slot before it finishes.
        let slow = controller.begin_dispatch();
        let create = controller.begin_dispatch();
        assert!(slow);
        assert!(!create);

        controller.after_dispatch(MessageType::AccountsCreate, create).await;
        assert!(keyring.is_locked().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_countdown_does_not_lock() {
        let (controller, keyring) = controller(1, false);
        controller.reset();
        let stale = controller.deadline().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        controller.reset();
        let current = controller.deadline();

        controller.fire(stale).await;
        assert!(!keyring.is_locked().await);
        assert_eq!(controller.deadline(), current);

        controller.fire(current.unwrap()).await;
        assert!(keyring.is_locked().await);
        assert!(controller.deadline().is_none());
    }

    #[tokio::test]
    async fn test_lock_now_is_idempotent() {
        let (controller, keyring) = controller(5, false);
        controller.reset();

        controller.lock_now().await.unwrap();
        controller.lock_now().await.unwrap();
        assert!(keyring.is_locked().await);
        assert!(controller.is_locked());
        assert!(controller.deadline().is_none());
    }

    #[tokio::test]
    async fn test_update_settings_persists() {
        let (controller, _) = controller(5, false);
        let saved = controller.update_settings(|s| s.time_auto_lock = 30).unwrap();
        assert_eq!(saved.time_auto_lock, 30);
        assert!(controller.deadline().is_some());

        let stored = {
            let db = controller.db.lock();
            SettingsStore::new(&db).load_auto_lock().unwrap()
        };
        assert_eq!(stored, Some(saved));

        assert!(controller
            .update_settings(|s| s.time_auto_lock = MAX_AUTO_LOCK_MINUTES + 1)
            .is_err());
    }
}
