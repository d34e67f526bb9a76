//! In-process session store shared by every device living in the same process.
//!
//! Rows live in [`DashMap`] tables; per-row mutations hold the shard lock, which gives the
//! conditional update and the score increment the same atomicity the database backends
//! provide. Change notifications go through a Tokio broadcast channel that can be muted to
//! simulate a notification channel that silently drops everything.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::SystemTime,
};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::{self, BoxFuture};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;
use uuid::Uuid;

use super::{ChangeFeed, SessionStore};
use crate::dao::{
    models::{
        AnswerEntity, AnswerInsert, ChangeEvent, NewAnswer, NewPlayer, NewSession, PlayerEntity,
        QuestionKey, Record, SessionCursor, SessionEntity, SessionPatch, Table,
    },
    storage::{StorageError, StorageResult},
};

const FEED_CAPACITY: usize = 256;

/// Failure injected while the store is switched offline.
#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// The store was switched offline with [`MemoryStore::set_online`].
    #[error("memory store is offline")]
    Offline,
}

/// Row plus its insertion sequence, used to return rows in insertion order.
#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    value: T,
}

struct MemoryInner {
    sessions: DashMap<Uuid, Row<SessionEntity>>,
    codes: DashMap<String, Uuid>,
    players: DashMap<Uuid, Row<PlayerEntity>>,
    answers: DashMap<Uuid, Row<AnswerEntity>>,
    answer_keys: DashMap<(Uuid, QuestionKey), Uuid>,
    seq: AtomicU64,
    events: broadcast::Sender<ChangeEvent>,
    feed_muted: AtomicBool,
    online: AtomicBool,
}

/// Cheaply clonable handle to an in-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with a live change feed.
    pub fn new() -> Self {
        let (events, _receiver) = broadcast::channel(FEED_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                sessions: DashMap::new(),
                codes: DashMap::new(),
                players: DashMap::new(),
                answers: DashMap::new(),
                answer_keys: DashMap::new(),
                seq: AtomicU64::new(0),
                events,
                feed_muted: AtomicBool::new(false),
                online: AtomicBool::new(true),
            }),
        }
    }

    /// Drop every change notification instead of delivering it.
    pub fn set_feed_muted(&self, muted: bool) {
        self.inner.feed_muted.store(muted, Ordering::SeqCst);
    }

    /// Switch the store offline (every call fails) or back online.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                "memory store offline".into(),
                MemoryStoreError::Offline,
            ))
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event: ChangeEvent) {
        if self.inner.feed_muted.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.events.send(event);
    }

    fn insert_session_now(&self, session: NewSession) -> StorageResult<SessionEntity> {
        self.ensure_online()?;
        let id = Uuid::new_v4();
        match self.inner.codes.entry(session.game_code.clone()) {
            Entry::Occupied(_) => {
                return Err(StorageError::conflict(format!(
                    "game code `{}` is already in use",
                    session.game_code
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let now = SystemTime::now();
        let cursor = SessionCursor::LOBBY;
        let entity = SessionEntity {
            id,
            game_code: session.game_code,
            status: cursor.status,
            current_round: cursor.current_round,
            current_question_index: cursor.current_question_index,
            created_at: now,
            updated_at: now,
        };
        let seq = self.next_seq();
        self.inner.sessions.insert(
            id,
            Row {
                seq,
                value: entity.clone(),
            },
        );
        self.emit(ChangeEvent::Upserted(Record::Session(entity.clone())));
        Ok(entity)
    }

    fn find_session_now(&self, id: Uuid) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online()?;
        Ok(self.inner.sessions.get(&id).map(|row| row.value.clone()))
    }

    fn find_session_by_code_now(&self, game_code: &str) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online()?;
        let Some(id) = self.inner.codes.get(game_code).map(|entry| *entry.value()) else {
            return Ok(None);
        };
        Ok(self.inner.sessions.get(&id).map(|row| row.value.clone()))
    }

    fn update_session_now(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online()?;
        let updated = {
            let Some(mut row) = self.inner.sessions.get_mut(&id) else {
                return Ok(None);
            };
            if expected.is_some_and(|cursor| cursor != row.value.cursor()) {
                return Ok(None);
            }
            // Never older than the previous write, so readers can order rows by it.
            let now = SystemTime::now().max(row.value.updated_at);
            row.value.apply_patch(&patch, now);
            row.value.clone()
        };
        self.emit(ChangeEvent::Upserted(Record::Session(updated.clone())));
        Ok(Some(updated))
    }

    fn insert_player_now(&self, player: NewPlayer) -> StorageResult<PlayerEntity> {
        self.ensure_online()?;
        let entity = PlayerEntity {
            id: Uuid::new_v4(),
            game_session_id: player.game_session_id,
            name: player.name,
            score: 0,
            is_host: player.is_host,
            selfie_url: player.selfie_url,
            created_at: SystemTime::now(),
        };
        let seq = self.next_seq();
        self.inner.players.insert(
            entity.id,
            Row {
                seq,
                value: entity.clone(),
            },
        );
        self.emit(ChangeEvent::Upserted(Record::Player(entity.clone())));
        Ok(entity)
    }

    fn find_player_now(&self, id: Uuid) -> StorageResult<Option<PlayerEntity>> {
        self.ensure_online()?;
        Ok(self.inner.players.get(&id).map(|row| row.value.clone()))
    }

    fn list_players_now(&self, session_id: Uuid) -> StorageResult<Vec<PlayerEntity>> {
        self.ensure_online()?;
        let mut rows: Vec<Row<PlayerEntity>> = self
            .inner
            .players
            .iter()
            .filter(|row| row.value.game_session_id == session_id)
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|row| row.seq);
        Ok(rows.into_iter().map(|row| row.value).collect())
    }

    fn increment_score_now(&self, player_id: Uuid, points: u32) -> StorageResult<bool> {
        self.ensure_online()?;
        let updated = {
            let Some(mut row) = self.inner.players.get_mut(&player_id) else {
                return Ok(false);
            };
            row.value.score = row.value.score.saturating_add(points);
            row.value.clone()
        };
        self.emit(ChangeEvent::Upserted(Record::Player(updated)));
        Ok(true)
    }

    fn reset_scores_now(&self, session_id: Uuid) -> StorageResult<()> {
        self.ensure_online()?;
        let mut changed = Vec::new();
        for mut row in self.inner.players.iter_mut() {
            if row.value.game_session_id == session_id {
                row.value.score = 0;
                changed.push(row.value.clone());
            }
        }
        for player in changed {
            self.emit(ChangeEvent::Upserted(Record::Player(player)));
        }
        Ok(())
    }

    fn insert_answer_now(&self, answer: NewAnswer) -> StorageResult<AnswerInsert> {
        self.ensure_online()?;
        // Held until the answer is stored, so a transition cannot slip between check and insert.
        let Some(session) = self.inner.sessions.get(&answer.game_session_id) else {
            return Ok(AnswerInsert::Closed(None));
        };
        let cursor = session.value.cursor();
        if !cursor.accepts_answers_for(&answer.question_key) {
            return Ok(AnswerInsert::Closed(Some(cursor)));
        }

        let id = Uuid::new_v4();
        match self
            .inner
            .answer_keys
            .entry((answer.player_id, answer.question_key.clone()))
        {
            Entry::Occupied(existing) => {
                let existing_id = *existing.get();
                drop(existing);
                return match self.inner.answers.get(&existing_id) {
                    Some(row) => Ok(AnswerInsert::Duplicate(row.value.clone())),
                    None => Err(StorageError::conflict(format!(
                        "player `{}` already answered `{}`",
                        answer.player_id, answer.question_key
                    ))),
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let entity = AnswerEntity {
            id,
            game_session_id: answer.game_session_id,
            player_id: answer.player_id,
            question_key: answer.question_key,
            answer: answer.answer,
            time_remaining: answer.time_remaining,
            created_at: SystemTime::now(),
        };
        let seq = self.next_seq();
        self.inner.answers.insert(
            id,
            Row {
                seq,
                value: entity.clone(),
            },
        );
        self.emit(ChangeEvent::Upserted(Record::Answer(entity.clone())));
        Ok(AnswerInsert::Inserted(entity))
    }

    fn list_answers_now(&self, session_id: Uuid) -> StorageResult<Vec<AnswerEntity>> {
        self.ensure_online()?;
        let mut rows: Vec<Row<AnswerEntity>> = self
            .inner
            .answers
            .iter()
            .filter(|row| row.value.game_session_id == session_id)
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by_key(|row| row.seq);
        Ok(rows.into_iter().map(|row| row.value).collect())
    }

    fn delete_answers_now(&self, session_id: Uuid) -> StorageResult<u64> {
        self.ensure_online()?;
        let ids: Vec<(Uuid, Uuid, QuestionKey)> = self
            .inner
            .answers
            .iter()
            .filter(|row| row.value.game_session_id == session_id)
            .map(|row| (row.value.id, row.value.player_id, row.value.question_key.clone()))
            .collect();

        let mut deleted = 0;
        for (id, player_id, question_key) in ids {
            if self.inner.answers.remove(&id).is_some() {
                deleted += 1;
                self.inner.answer_keys.remove(&(player_id, question_key));
                self.emit(ChangeEvent::Deleted {
                    table: Table::Answers,
                    id,
                    game_session_id: Some(session_id),
                });
            }
        }
        Ok(deleted)
    }

    fn subscribe_now(&self, session_id: Uuid) -> StorageResult<ChangeFeed> {
        self.ensure_online()?;
        let mut receiver = self.inner.events.subscribe();
        let feed = async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.concerns(session_id) {
                            yield event;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(%session_id, skipped, "memory change feed lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(feed))
    }
}

impl SessionStore for MemoryStore {
    fn insert_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        Box::pin(future::ready(self.insert_session_now(session)))
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        Box::pin(future::ready(self.find_session_now(id)))
    }

    fn find_session_by_code(
        &self,
        game_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        Box::pin(future::ready(self.find_session_by_code_now(&game_code)))
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        Box::pin(future::ready(self.update_session_now(id, patch, expected)))
    }

    fn insert_player(&self, player: NewPlayer) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        Box::pin(future::ready(self.insert_player_now(player)))
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        Box::pin(future::ready(self.find_player_now(id)))
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        Box::pin(future::ready(self.list_players_now(session_id)))
    }

    fn increment_score(&self, player_id: Uuid, points: u32) -> BoxFuture<'static, StorageResult<bool>> {
        Box::pin(future::ready(self.increment_score_now(player_id, points)))
    }

    fn reset_scores(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.reset_scores_now(session_id)))
    }

    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StorageResult<AnswerInsert>> {
        Box::pin(future::ready(self.insert_answer_now(answer)))
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        Box::pin(future::ready(self.list_answers_now(session_id)))
    }

    fn delete_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        Box::pin(future::ready(self.delete_answers_now(session_id)))
    }

    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        Box::pin(future::ready(self.subscribe_now(session_id)))
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.ensure_online()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(future::ready(self.ensure_online()))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::dao::models::SessionStatus;

    fn new_player(session_id: Uuid, name: &str) -> NewPlayer {
        NewPlayer {
            game_session_id: session_id,
            name: name.into(),
            is_host: false,
            selfie_url: None,
        }
    }

    async fn open_question(store: &MemoryStore, session_id: Uuid, round: u32, index: i32) {
        let cursor = SessionCursor {
            status: SessionStatus::Question,
            current_round: round,
            current_question_index: index,
        };
        store
            .update_session(session_id, SessionPatch::full(cursor), None)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_game_code_is_a_conflict() {
        let store = MemoryStore::new();
        store
            .insert_session(NewSession {
                game_code: "ABCD".into(),
            })
            .await
            .unwrap();
        let err = store
            .insert_session(NewSession {
                game_code: "ABCD".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
    }

    #[tokio::test]
    async fn conditional_update_only_applies_once() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(NewSession {
                game_code: "WXYZ".into(),
            })
            .await
            .unwrap();
        let patch = SessionPatch {
            status: Some(SessionStatus::Intro),
            current_round: Some(1),
            ..SessionPatch::default()
        };

        let first = store
            .update_session(session.id, patch, Some(SessionCursor::LOBBY))
            .await
            .unwrap();
        let second = store
            .update_session(session.id, patch, Some(SessionCursor::LOBBY))
            .await
            .unwrap();

        assert_eq!(first.map(|s| s.status), Some(SessionStatus::Intro));
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn increments_accumulate() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(NewSession {
                game_code: "INCR".into(),
            })
            .await
            .unwrap();
        let player = store
            .insert_player(new_player(session.id, "Robin"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            store.increment_score(player.id, 17),
            store.increment_score(player.id, 12)
        );
        assert!(a.unwrap() && b.unwrap());
        let stored = store.find_player(player.id).await.unwrap().unwrap();
        assert_eq!(stored.score, 29);
        assert!(!store.increment_score(Uuid::new_v4(), 5).await.unwrap());
    }

    #[tokio::test]
    async fn second_answer_for_same_key_is_rejected() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(NewSession {
                game_code: "ANSW".into(),
            })
            .await
            .unwrap();
        open_question(&store, session.id, 1, 0).await;
        let player = store
            .insert_player(new_player(session.id, "Sam"))
            .await
            .unwrap();
        let answer = |text: &str| NewAnswer {
            game_session_id: session.id,
            player_id: player.id,
            question_key: QuestionKey::new(1, 0),
            answer: text.into(),
            time_remaining: 9,
        };

        let first = store.insert_answer(answer("2017")).await.unwrap();
        let second = store.insert_answer(answer("2018")).await.unwrap();

        assert!(matches!(first, AnswerInsert::Inserted(_)));
        match second {
            AnswerInsert::Duplicate(stored) => assert_eq!(stored.answer, "2017"),
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(store.list_answers(session.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn answers_after_the_question_closed_are_refused() {
        let store = MemoryStore::new();
        let session = store
            .insert_session(NewSession {
                game_code: "LATE".into(),
            })
            .await
            .unwrap();
        open_question(&store, session.id, 1, 0).await;
        let player = store
            .insert_player(new_player(session.id, "Kim"))
            .await
            .unwrap();
        let reveal = SessionPatch {
            status: Some(SessionStatus::Reveal),
            ..SessionPatch::default()
        };
        let revealed = store
            .update_session(session.id, reveal, None)
            .await
            .unwrap()
            .unwrap();

        let late = store
            .insert_answer(NewAnswer {
                game_session_id: session.id,
                player_id: player.id,
                question_key: QuestionKey::new(1, 0),
                answer: "7".into(),
                time_remaining: 3,
            })
            .await
            .unwrap();

        assert_eq!(late, AnswerInsert::Closed(Some(revealed.cursor())));
        assert!(store.list_answers(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn feed_is_scoped_to_the_session() {
        let store = MemoryStore::new();
        let mine = store
            .insert_session(NewSession {
                game_code: "MINE".into(),
            })
            .await
            .unwrap();
        let other = store
            .insert_session(NewSession {
                game_code: "OTHR".into(),
            })
            .await
            .unwrap();
        let mut feed = store.subscribe(mine.id).await.unwrap();

        store.insert_player(new_player(other.id, "Elsewhere")).await.unwrap();
        let joined = store.insert_player(new_player(mine.id, "Here")).await.unwrap();

        match feed.next().await {
            Some(ChangeEvent::Upserted(Record::Player(player))) => assert_eq!(player, joined),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_online(false);
        assert!(store.health_check().await.is_err());
        assert!(store.find_session(Uuid::new_v4()).await.is_err());
        store.set_online(true);
        assert!(store.health_check().await.is_ok());
    }
}
