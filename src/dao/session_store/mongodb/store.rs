use std::{sync::Arc, time::SystemTime};

use futures::{StreamExt, TryStreamExt, future::BoxFuture, stream};
use mongodb::{
    Collection, Database, IndexModel,
    bson::{Document, doc},
    change_stream::{
        ChangeStream,
        event::{ChangeStreamEvent, OperationType},
    },
    options::{FullDocumentType, IndexOptions, ReturnDocument},
};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key},
    models::{
        ANSWER_COLLECTION, IntoRecord, MongoAnswerDocument, MongoPlayerDocument,
        MongoSessionDocument, PLAYER_COLLECTION, SESSION_COLLECTION, doc_id,
    },
};
use crate::dao::{
    models::{
        AnswerEntity, AnswerInsert, ChangeEvent, NewAnswer, NewPlayer, NewSession, PlayerEntity,
        SessionCursor, SessionEntity, SessionPatch, Table,
    },
    session_store::{ChangeFeed, SessionStore},
    storage::StorageResult,
};

/// Session store persisted in three MongoDB collections.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let database =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        *self.database.write().await = database;
        Ok(())
    }
}

const ANSWER_TRANSACTION_ATTEMPTS: u32 = 3;

fn cursor_filter(id: Uuid, expected: Option<SessionCursor>) -> Document {
    let mut filter = doc_id(id);
    if let Some(cursor) = expected {
        filter.insert("status", cursor.status.as_str());
        filter.insert("current_round", i64::from(cursor.current_round));
        filter.insert(
            "current_question_index",
            i64::from(cursor.current_question_index),
        );
    }
    filter
}

/// Update for `patch`. `updated_at` takes the server clock so every device orders rows alike.
fn patch_update(patch: &SessionPatch) -> Document {
    let mut set = Document::new();
    if let Some(status) = patch.status {
        set.insert("status", status.as_str());
    }
    if let Some(round) = patch.current_round {
        set.insert("current_round", i64::from(round));
    }
    if let Some(index) = patch.current_question_index {
        set.insert("current_question_index", i64::from(index));
    }
    let mut update = doc! { "$currentDate": {"updated_at": true} };
    if !set.is_empty() {
        update.insert("$set", set);
    }
    update
}

fn to_change_event<D: IntoRecord>(table: Table, event: ChangeStreamEvent<D>) -> Option<ChangeEvent> {
    match event.operation_type {
        OperationType::Insert | OperationType::Update | OperationType::Replace => {
            let document = event.full_document?;
            match document.into_record() {
                Ok(record) => Some(ChangeEvent::Upserted(record)),
                Err(err) => {
                    warn!(table = table.name(), error = %err, "skipping malformed change");
                    None
                }
            }
        }
        OperationType::Delete => {
            let raw = event.document_key.as_ref()?.get_str("_id").ok()?;
            let id = Uuid::parse_str(raw).ok()?;
            Some(ChangeEvent::Deleted {
                table,
                id,
                game_session_id: None,
            })
        }
        _ => None,
    }
}

fn change_feed<D>(table: Table, mut changes: ChangeStream<ChangeStreamEvent<D>>) -> ChangeFeed
where
    D: IntoRecord + DeserializeOwned + Unpin + Send + Sync + 'static,
{
    Box::pin(async_stream::stream! {
        while let Some(change) = changes.next().await {
            match change {
                Ok(event) => {
                    if let Some(event) = to_change_event(table, event) {
                        yield event;
                    }
                }
                Err(err) => {
                    warn!(table = table.name(), error = %err, "MongoDB change stream closed");
                    break;
                }
            }
        }
    })
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let database = establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, Document, bool); 4] = [
            (SESSION_COLLECTION, "game_code", doc! {"game_code": 1}, true),
            (PLAYER_COLLECTION, "game_session_id", doc! {"game_session_id": 1, "created_at": 1}, false),
            (ANSWER_COLLECTION, "player_id,question_key", doc! {"player_id": 1, "question_key": 1}, true),
            (ANSWER_COLLECTION, "game_session_id", doc! {"game_session_id": 1, "created_at": 1}, false),
        ];

        let database = self.database().await;
        for (collection, index, keys, unique) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .unique(Some(unique))
                        .build(),
                )
                .build();
            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.database.read().await.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION)
    }

    async fn players(&self) -> Collection<MongoPlayerDocument> {
        self.database().await.collection(PLAYER_COLLECTION)
    }

    async fn answers(&self) -> Collection<MongoAnswerDocument> {
        self.database().await.collection(ANSWER_COLLECTION)
    }

    async fn insert_session(&self, session: NewSession) -> MongoResult<SessionEntity> {
        let cursor = SessionCursor::LOBBY;
        let fields = doc! {
            "game_code": session.game_code,
            "status": cursor.status.as_str(),
            "current_round": i64::from(cursor.current_round),
            "current_question_index": i64::from(cursor.current_question_index),
        };
        self.sessions()
            .await
            .find_one_and_update(
                doc_id(Uuid::new_v4()),
                doc! {
                    "$setOnInsert": fields,
                    "$currentDate": {"created_at": true, "updated_at": true},
                },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::operation("insert session", SESSION_COLLECTION, source))?
            .ok_or_else(|| MongoDaoError::Malformed {
                collection: SESSION_COLLECTION,
                id: String::new(),
                reason: "upserted session was not returned".into(),
            })
            .and_then(SessionEntity::try_from)
    }

    async fn find_session(&self, filter: Document) -> MongoResult<Option<SessionEntity>> {
        self.sessions()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::operation("load session", SESSION_COLLECTION, source))?
            .map(SessionEntity::try_from)
            .transpose()
    }

    async fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> MongoResult<Option<SessionEntity>> {
        self.sessions()
            .await
            .find_one_and_update(cursor_filter(id, expected), patch_update(&patch))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::operation("update session", SESSION_COLLECTION, source))?
            .map(SessionEntity::try_from)
            .transpose()
    }

    async fn insert_player(&self, player: NewPlayer) -> MongoResult<PlayerEntity> {
        let entity = PlayerEntity {
            id: Uuid::new_v4(),
            game_session_id: player.game_session_id,
            name: player.name,
            score: 0,
            is_host: player.is_host,
            selfie_url: player.selfie_url,
            created_at: SystemTime::now(),
        };
        self.players()
            .await
            .insert_one(MongoPlayerDocument::from(&entity))
            .await
            .map_err(|source| MongoDaoError::operation("insert player", PLAYER_COLLECTION, source))?;
        Ok(entity)
    }

    async fn find_player(&self, id: Uuid) -> MongoResult<Option<PlayerEntity>> {
        self.players()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::operation("load player", PLAYER_COLLECTION, source))?
            .map(PlayerEntity::try_from)
            .transpose()
    }

    async fn list_players(&self, session_id: Uuid) -> MongoResult<Vec<PlayerEntity>> {
        let map_err =
            |source| MongoDaoError::operation("list players", PLAYER_COLLECTION, source);
        let documents: Vec<MongoPlayerDocument> = self
            .players()
            .await
            .find(doc! {"game_session_id": session_id.to_string()})
            .sort(doc! {"created_at": 1, "_id": 1})
            .await
            .map_err(map_err)?
            .try_collect()
            .await
            .map_err(map_err)?;
        documents.into_iter().map(PlayerEntity::try_from).collect()
    }

    async fn increment_score(&self, player_id: Uuid, points: u32) -> MongoResult<bool> {
        let result = self
            .players()
            .await
            .update_one(doc_id(player_id), doc! {"$inc": {"score": i64::from(points)}})
            .await
            .map_err(|source| MongoDaoError::operation("increment score", PLAYER_COLLECTION, source))?;
        Ok(result.matched_count > 0)
    }

    async fn reset_scores(&self, session_id: Uuid) -> MongoResult<()> {
        self.players()
            .await
            .update_many(
                doc! {"game_session_id": session_id.to_string()},
                doc! {"$set": {"score": 0_i64}},
            )
            .await
            .map_err(|source| MongoDaoError::operation("reset scores", PLAYER_COLLECTION, source))?;
        Ok(())
    }

    /// Insert an answer while the session is still showing its question.
    ///
    /// The transaction bumps `answers_taken` on the session document under the open-question
    /// filter, so a concurrent transition write on that document is ordered against the insert.
    async fn insert_answer(&self, answer: NewAnswer) -> MongoResult<AnswerInsert> {
        let entity = AnswerEntity {
            id: Uuid::new_v4(),
            game_session_id: answer.game_session_id,
            player_id: answer.player_id,
            question_key: answer.question_key,
            answer: answer.answer,
            time_remaining: answer.time_remaining,
            created_at: SystemTime::now(),
        };
        let Some(open) = SessionCursor::open_question(&entity.question_key) else {
            return self.closed_answer(entity.game_session_id).await;
        };

        let mut attempt = 1;
        loop {
            match self.insert_answer_once(&entity, open).await {
                Err(err) if err.is_transient_transaction() && attempt < ANSWER_TRANSACTION_ATTEMPTS => {
                    debug!(attempt, error = %err, "answer transaction conflicted; retrying");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    async fn insert_answer_once(
        &self,
        entity: &AnswerEntity,
        open: SessionCursor,
    ) -> MongoResult<AnswerInsert> {
        let database = self.database().await;
        let sessions = database.collection::<Document>(SESSION_COLLECTION);
        let answers = database.collection::<MongoAnswerDocument>(ANSWER_COLLECTION);
        let mut transaction = database
            .client()
            .start_session()
            .await
            .map_err(|source| MongoDaoError::operation("start session", ANSWER_COLLECTION, source))?;
        transaction
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::operation("start transaction", ANSWER_COLLECTION, source))?;

        let claimed = sessions
            .update_one(
                cursor_filter(entity.game_session_id, Some(open)),
                doc! {"$inc": {"answers_taken": 1_i64}},
            )
            .session(&mut transaction)
            .await;
        let claimed = match claimed {
            Ok(result) => result.matched_count > 0,
            Err(source) => {
                let _ = transaction.abort_transaction().await;
                return Err(MongoDaoError::operation("claim question", SESSION_COLLECTION, source));
            }
        };
        if !claimed {
            let _ = transaction.abort_transaction().await;
            return self.closed_answer(entity.game_session_id).await;
        }

        let inserted = answers
            .insert_one(MongoAnswerDocument::from(entity))
            .session(&mut transaction)
            .await;
        match inserted {
            Ok(_) => {
                transaction.commit_transaction().await.map_err(|source| {
                    MongoDaoError::operation("commit answer", ANSWER_COLLECTION, source)
                })?;
                Ok(AnswerInsert::Inserted(entity.clone()))
            }
            Err(source) if is_duplicate_key(&source) => {
                let _ = transaction.abort_transaction().await;
                let filter = doc! {
                    "player_id": entity.player_id.to_string(),
                    "question_key": entity.question_key.as_str(),
                };
                let existing = answers
                    .find_one(filter)
                    .await
                    .map_err(|source| MongoDaoError::operation("load answer", ANSWER_COLLECTION, source))?
                    .ok_or_else(|| MongoDaoError::DuplicateKey {
                        collection: ANSWER_COLLECTION,
                        detail: format!(
                            "answer of `{}` to `{}` vanished",
                            entity.player_id, entity.question_key
                        ),
                    })?;
                Ok(AnswerInsert::Duplicate(AnswerEntity::try_from(existing)?))
            }
            Err(source) => {
                let _ = transaction.abort_transaction().await;
                Err(MongoDaoError::operation("insert answer", ANSWER_COLLECTION, source))
            }
        }
    }

    async fn closed_answer(&self, session_id: Uuid) -> MongoResult<AnswerInsert> {
        let session = self.find_session(doc_id(session_id)).await?;
        Ok(AnswerInsert::Closed(session.map(|session| session.cursor())))
    }

    async fn list_answers(&self, session_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let map_err =
            |source| MongoDaoError::operation("list answers", ANSWER_COLLECTION, source);
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(doc! {"game_session_id": session_id.to_string()})
            .sort(doc! {"created_at": 1, "_id": 1})
            .await
            .map_err(map_err)?
            .try_collect()
            .await
            .map_err(map_err)?;
        documents.into_iter().map(AnswerEntity::try_from).collect()
    }

    async fn delete_answers(&self, session_id: Uuid) -> MongoResult<u64> {
        let result = self
            .answers()
            .await
            .delete_many(doc! {"game_session_id": session_id.to_string()})
            .await
            .map_err(|source| MongoDaoError::operation("delete answers", ANSWER_COLLECTION, source))?;
        Ok(result.deleted_count)
    }

    async fn subscribe(&self, session_id: Uuid) -> MongoResult<ChangeFeed> {
        let id = session_id.to_string();
        let owned_by_session = |field: &str| {
            vec![doc! {"$match": {"$or": [
                {field: id.as_str()},
                {"operationType": "delete"},
            ]}}]
        };

        let sessions = self
            .sessions()
            .await
            .watch()
            .pipeline(owned_by_session("documentKey._id"))
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::operation("watch", SESSION_COLLECTION, source))?;
        let players = self
            .players()
            .await
            .watch()
            .pipeline(owned_by_session("fullDocument.game_session_id"))
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::operation("watch", PLAYER_COLLECTION, source))?;
        let answers = self
            .answers()
            .await
            .watch()
            .pipeline(owned_by_session("fullDocument.game_session_id"))
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::operation("watch", ANSWER_COLLECTION, source))?;

        debug!(%session_id, "MongoDB change streams opened");
        Ok(Box::pin(stream::select_all([
            change_feed(Table::Sessions, sessions),
            change_feed(Table::Players, players),
            change_feed(Table::Answers, answers),
        ])))
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_session_by_code(
        &self,
        game_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(doc! {"game_code": game_code})
                .await
                .map_err(Into::into)
        })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session(id, patch, expected)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_player(&self, player: NewPlayer) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        let store = self.clone();
        Box::pin(async move { store.insert_player(player).await.map_err(Into::into) })
    }

    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_player(id).await.map_err(Into::into) })
    }

    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_players(session_id).await.map_err(Into::into) })
    }

    fn increment_score(&self, player_id: Uuid, points: u32) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .increment_score(player_id, points)
                .await
                .map_err(Into::into)
        })
    }

    fn reset_scores(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.reset_scores(session_id).await.map_err(Into::into) })
    }

    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StorageResult<AnswerInsert>> {
        let store = self.clone();
        Box::pin(async move { store.insert_answer(answer).await.map_err(Into::into) })
    }

    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(session_id).await.map_err(Into::into) })
    }

    fn delete_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.delete_answers(session_id).await.map_err(Into::into) })
    }

    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let store = self.clone();
        Box::pin(async move { store.subscribe(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
