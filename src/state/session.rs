use std::{
    collections::HashSet,
    sync::Mutex as StdMutex,
};

use tokio::{sync::Mutex, task::JoinHandle};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{identity::DeviceIdentity, models::QuestionKey},
    services::{scoring::Scorer, sync_client::SyncClient},
    state::mirror::SessionMirror,
};

/// The session this device takes part in, with its sync loops and local guards.
///
/// Dropping it stops every task attached to it.
pub struct ActiveSession {
    session_id: Uuid,
    player_id: Uuid,
    game_code: String,
    is_host: bool,
    sync: SyncClient,
    scorer: Mutex<Scorer>,
    answer_locks: StdMutex<HashSet<(u64, QuestionKey)>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ActiveSession {
    /// Bundle a running [`SyncClient`] with the player this device acts as.
    pub fn new(player_id: Uuid, game_code: String, is_host: bool, sync: SyncClient) -> Self {
        Self {
            session_id: sync.session_id(),
            player_id,
            game_code,
            is_host,
            sync,
            scorer: Mutex::new(Scorer::default()),
            answer_locks: StdMutex::new(HashSet::new()),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Session this device is in.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Player row owned by this device.
    pub fn player_id(&self) -> Uuid {
        self.player_id
    }

    /// Code other devices join with.
    pub fn game_code(&self) -> &str {
        &self.game_code
    }

    /// Role recorded when the device joined; transitions re-read it from the store.
    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Identity to persist for resumption.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            session_id: self.session_id,
            player_id: self.player_id,
        }
    }

    /// Feed and poll driver keeping the mirror current.
    pub fn sync(&self) -> &SyncClient {
        &self.sync
    }

    /// Copy of the live mirror.
    pub fn mirror(&self) -> SessionMirror {
        self.sync.mirror()
    }

    /// Host scoring guard.
    pub fn scorer(&self) -> &Mutex<Scorer> {
        &self.scorer
    }

    /// Lock answer input for `key` in game `generation`. Returns `false` when it was already
    /// locked.
    pub fn lock_answer(&self, generation: u64, key: &QuestionKey) -> bool {
        self.answer_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert((generation, key.clone()))
    }

    /// Whether answer input for `key` in game `generation` is locked on this device.
    pub fn is_answer_locked(&self, generation: u64, key: &QuestionKey) -> bool {
        self.answer_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&(generation, key.clone()))
    }

    /// Drop every lock, after the session was reset.
    pub fn clear_answer_locks(&self) {
        self.answer_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Tie a background task to this session's lifetime.
    pub fn attach_task(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!(session_id = %self.session_id, player_id = %self.player_id, "active session released");
    }
}
