pub mod events;
pub mod leaderboard;
pub mod rounds;
mod session;
mod sse;
pub mod state_machine;
pub mod timing;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{models::SessionPin, session_store::SessionStore},
    error::ServiceError,
};

pub use self::session::{
    CommandOutcome, CommandReply, HostAction, HostCommand, LiveView, SessionHandle,
};
pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};
use self::timing::HostClock;

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the store slot and live sessions.
pub struct AppState {
    config: AppConfig,
    clock: HostClock,
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    degraded: watch::Sender<bool>,
    sessions: DashMap<SessionPin, SessionHandle>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, HostClock::new())
    }

    pub fn with_clock(config: AppConfig, clock: HostClock) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            config,
            clock,
            session_store: RwLock::new(None),
            degraded: degraded_tx,
            sessions: DashMap::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn clock(&self) -> &HostClock {
        &self.clock
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Driver handle of a live session.
    pub fn session(&self, pin: &SessionPin) -> Option<SessionHandle> {
        self.sessions.get(pin).map(|entry| entry.clone())
    }

    pub fn register_session(&self, pin: SessionPin, handle: SessionHandle) {
        self.sessions.insert(pin, handle);
    }

    /// Drop the registry entry if it still belongs to the driver `driver_id`.
    pub fn remove_session(&self, pin: &SessionPin, driver_id: uuid::Uuid) -> bool {
        self.sessions
            .remove_if(pin, |_, handle| handle.id() == driver_id)
            .is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
