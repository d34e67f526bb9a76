//! Realtime sync client: keeps one device's [`SessionMirror`] converged with the store.
//!
//! Two producers feed the same reducer. The change feed merges single rows as they are
//! pushed; the poll loop re-reads the three collections on a fixed interval and replaces them,
//! so a device converges within one interval even if no notification ever arrives.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::session_repository::SessionRepository,
    state::mirror::{MirrorUpdate, SessionMirror},
};

/// Running sync loops of one session. Dropping the client stops them.
pub struct SyncClient {
    session_id: Uuid,
    repository: SessionRepository,
    mirror: Arc<watch::Sender<SessionMirror>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncClient {
    /// Subscribe to the session's changes, load a first snapshot, then start both loops.
    ///
    /// The subscription is opened before the snapshot so no change can slip between them.
    /// A store without a working change feed still syncs through polling.
    pub async fn start(
        repository: SessionRepository,
        session_id: Uuid,
        poll_interval: Duration,
    ) -> Result<Self, ServiceError> {
        let feed = match repository.store().subscribe(session_id).await {
            Ok(feed) => Some(feed),
            Err(err) => {
                warn!(%session_id, error = %err, "change feed unavailable; relying on polling");
                None
            }
        };

        let snapshot = repository.snapshot(session_id).await?;
        let mut mirror = SessionMirror::new(session_id);
        mirror.apply(MirrorUpdate::Poll(snapshot));
        let (sender, _receiver) = watch::channel(mirror);
        let sender = Arc::new(sender);

        let mut tasks = Vec::with_capacity(2);
        if let Some(mut feed) = feed {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = feed.next().await {
                    debug!(%session_id, ?event, "change notification");
                    sender.send_if_modified(|mirror| mirror.apply(MirrorUpdate::Notification(event)));
                }
                warn!(%session_id, "change feed ended; relying on polling");
            }));
        }

        {
            let sender = sender.clone();
            let repository = repository.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match repository.snapshot(session_id).await {
                        Ok(snapshot) => {
                            sender.send_if_modified(|mirror| mirror.apply(MirrorUpdate::Poll(snapshot)));
                        }
                        Err(err) => debug!(%session_id, error = %err, "session poll failed"),
                    }
                }
            }));
        }

        info!(%session_id, "session sync started");
        Ok(Self {
            session_id,
            repository,
            mirror: sender,
            tasks,
        })
    }

    /// Session being mirrored.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Receiver notified whenever the mirror changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionMirror> {
        self.mirror.subscribe()
    }

    /// Copy of the current mirror.
    pub fn mirror(&self) -> SessionMirror {
        self.mirror.borrow().clone()
    }

    /// Poll once right away, outside the regular interval.
    pub async fn refresh(&self) {
        match self.repository.snapshot(self.session_id).await {
            Ok(snapshot) => {
                self.mirror
                    .send_if_modified(|mirror| mirror.apply(MirrorUpdate::Poll(snapshot)));
            }
            Err(err) => debug!(session_id = %self.session_id, error = %err, "session refresh failed"),
        }
    }

    /// Stop both loops.
    pub fn stop(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.stop();
        debug!(session_id = %self.session_id, "session sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::{
        dao::{
            models::{NewAnswer, QuestionKey, SessionCursor, SessionPatch, SessionStatus},
            session_store::memory::MemoryStore,
        },
        state::mirror::{SessionMirror, SessionSnapshot},
    };

    const POLL: Duration = Duration::from_millis(50);

    fn mirrors(mirror: &SessionMirror, snapshot: &SessionSnapshot) -> bool {
        mirror.session() == snapshot.session.as_ref()
            && mirror.players().eq(snapshot.players.iter())
            && mirror.answers().eq(snapshot.answers.iter())
    }

    /// Wait a few poll intervals for `client` to show exactly what the store holds.
    async fn converged(client: &SyncClient, repository: &SessionRepository, session_id: Uuid) {
        let expected = repository.snapshot(session_id).await.unwrap();
        let mut updates = client.subscribe();
        timeout(POLL * 6, updates.wait_for(|mirror| mirrors(mirror, &expected)))
            .await
            .expect("mirror matched the store by polling")
            .unwrap();
    }

    #[tokio::test]
    async fn notifications_reach_the_mirror() {
        let store = MemoryStore::new();
        let repository = SessionRepository::new(Arc::new(store.clone()));
        let (session, _) = repository.create_session("Host", Some("SYNC")).await.unwrap();
        let client = SyncClient::start(repository.clone(), session.id, Duration::from_secs(3600))
            .await
            .unwrap();
        let mut updates = client.subscribe();

        repository.join_by_code("Guest", "sync").await.unwrap();

        timeout(Duration::from_secs(2), updates.wait_for(|m| m.player_count() == 2))
            .await
            .expect("mirror converged")
            .unwrap();
    }

    #[tokio::test]
    async fn polling_alone_mirrors_every_table() {
        let store = MemoryStore::new();
        store.set_feed_muted(true);
        let repository = SessionRepository::new(Arc::new(store.clone()));
        let (session, _) = repository.create_session("Host", Some("MUTE")).await.unwrap();
        let client = SyncClient::start(repository.clone(), session.id, POLL)
            .await
            .unwrap();

        let (_, guest) = repository.join_by_code("Guest", "mute").await.unwrap();
        let question = SessionCursor {
            status: SessionStatus::Question,
            current_round: 1,
            current_question_index: 0,
        };
        repository
            .update_session(session.id, SessionPatch::full(question))
            .await
            .unwrap();
        repository
            .insert_answer(NewAnswer {
                game_session_id: session.id,
                player_id: guest.id,
                question_key: QuestionKey::new(1, 0),
                answer: "7".into(),
                time_remaining: 8,
            })
            .await
            .unwrap();
        repository.increment_score(guest.id, 18).await.unwrap();
        converged(&client, &repository, session.id).await;
        assert_eq!(client.mirror().answers().count(), 1);
        assert_eq!(client.mirror().player(guest.id).map(|p| p.score), Some(18));

        repository.reset_session(session.id, None).await.unwrap();
        converged(&client, &repository, session.id).await;
        let mirror = client.mirror();
        assert_eq!(mirror.cursor(), Some(SessionCursor::LOBBY));
        assert_eq!(mirror.answers().count(), 0);
        assert!(mirror.players().all(|player| player.score == 0));
    }

    #[tokio::test]
    async fn polling_alone_converges() {
        let store = MemoryStore::new();
        store.set_feed_muted(true);
        let repository = SessionRepository::new(Arc::new(store.clone()));
        let (session, _) = repository.create_session("Host", Some("POLL")).await.unwrap();
        let client = SyncClient::start(repository.clone(), session.id, Duration::from_millis(50))
            .await
            .unwrap();
        let mut updates = client.subscribe();

        repository
            .update_session(
                session.id,
                crate::dao::models::SessionPatch {
                    status: Some(SessionStatus::Intro),
                    current_round: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        timeout(
            Duration::from_secs(2),
            updates.wait_for(|m| m.cursor().map(|c| c.status) == Some(SessionStatus::Intro)),
        )
        .await
        .expect("poll converged")
        .unwrap();
    }
}
