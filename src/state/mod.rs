pub mod clock;
pub mod mirror;
pub mod question_bank;
mod session;
mod sse;
/// Session status transitions.
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{identity::IdentityStore, session_store::SessionStore},
    error::ServiceError,
    services::session_repository::SessionRepository,
    state::question_bank::QuestionBank,
};

pub use self::session::ActiveSession;
pub use self::sse::SseHub;

/// Handle shared between the router, the sync tasks and the host automation.
pub type SharedState = Arc<AppState>;

const VIEW_SSE_CAPACITY: usize = 16;

/// Per-device application state: store handle, local identity, active session and view hub.
pub struct AppState {
    config: AppConfig,
    bank: Arc<QuestionBank>,
    identity: Arc<dyn IdentityStore>,
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    active: RwLock<Option<Arc<ActiveSession>>>,
    view_sse: SseHub,
    degraded: watch::Sender<bool>,
    transition_gate: Mutex<()>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a session store is installed.
    pub fn new(
        config: AppConfig,
        bank: QuestionBank,
        identity: Arc<dyn IdentityStore>,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            bank: Arc::new(bank),
            identity,
            session_store: RwLock::new(None),
            active: RwLock::new(None),
            view_sse: SseHub::new(VIEW_SSE_CAPACITY),
            degraded: degraded_tx,
            transition_gate: Mutex::new(()),
        })
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Question bank shared by every device of the session.
    pub fn bank(&self) -> &QuestionBank {
        &self.bank
    }

    /// Local persistence of the device identity.
    pub fn identity(&self) -> &Arc<dyn IdentityStore> {
        &self.identity
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Store handle, or [`ServiceError::Degraded`] while none is installed or it is unhealthy.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Repository over the installed store.
    pub async fn repository(&self) -> Result<SessionRepository, ServiceError> {
        Ok(SessionRepository::new(self.require_session_store().await?))
    }

    /// Session this device currently takes part in.
    pub async fn active(&self) -> Option<Arc<ActiveSession>> {
        self.active.read().await.clone()
    }

    /// Active session, or [`ServiceError::InvalidState`] when the device is not in one.
    pub async fn require_active(&self) -> Result<Arc<ActiveSession>, ServiceError> {
        self.active()
            .await
            .ok_or_else(|| ServiceError::InvalidState("device is not in a session".into()))
    }

    /// Swap the active session, returning the previous one.
    pub async fn replace_active(
        &self,
        session: Option<Arc<ActiveSession>>,
    ) -> Option<Arc<ActiveSession>> {
        let mut guard = self.active.write().await;
        std::mem::replace(&mut *guard, session)
    }

    /// Broadcast hub of the view SSE stream.
    pub fn view_sse(&self) -> &SseHub {
        &self.view_sse
    }

    /// Serialise host transitions issued from this device.
    pub async fn transition_gate(&self) -> MutexGuard<'_, ()> {
        self.transition_gate.lock().await
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}
