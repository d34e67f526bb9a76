//! Typed session operations on top of the shared store.
//!
//! Failures are logged and returned; nothing here retries a user operation.

use std::sync::Arc;

use rand::{Rng, rng};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            AnswerEntity, AnswerInsert, NewAnswer, NewPlayer, NewSession, PlayerEntity,
            SessionCursor, SessionEntity, SessionPatch,
        },
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::validation::{validate_game_code, validate_player_name},
    error::ServiceError,
    state::{mirror::SessionSnapshot, state_machine::Plan},
};

const GENERATED_CODE_LEN: usize = 6;
const GENERATED_CODE_ATTEMPTS: usize = 5;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Outcome of a conditional session write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The write matched the expected cursor and was applied.
    Applied(SessionEntity),
    /// Another writer moved the session first; nothing was written.
    Superseded(Option<SessionEntity>),
}

/// Uppercase a player-supplied game code after validating it.
pub fn normalize_game_code(code: &str) -> Result<String, ServiceError> {
    validate_game_code(code).map_err(|err| {
        ServiceError::InvalidInput(
            err.message
                .map(|message| message.into_owned())
                .unwrap_or_else(|| "invalid game code".into()),
        )
    })?;
    Ok(code.trim().to_ascii_uppercase())
}

/// Random uppercase alphanumeric game code.
pub fn generate_game_code() -> String {
    let mut rng = rng();
    (0..GENERATED_CODE_LEN)
        .map(|_| char::from(CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())]))
        .collect()
}

fn normalize_name(name: &str) -> Result<String, ServiceError> {
    validate_player_name(name).map_err(|_| ServiceError::InvalidInput("name must not be blank".into()))?;
    Ok(name.trim().to_owned())
}

/// Repository over a [`SessionStore`].
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn SessionStore>,
}

impl SessionRepository {
    /// Wrap `store`.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Create a lobby session and its host player.
    ///
    /// Without `code` a random one is generated, retrying on collisions. When the host player
    /// cannot be inserted the session row is left behind.
    pub async fn create_session(
        &self,
        host_name: &str,
        code: Option<&str>,
    ) -> Result<(SessionEntity, PlayerEntity), ServiceError> {
        let name = normalize_name(host_name)?;
        let session = match code {
            Some(code) => {
                let game_code = normalize_game_code(code)?;
                self.insert_session(game_code).await?
            }
            None => self.insert_generated_session().await?,
        };

        let host = self
            .store
            .insert_player(NewPlayer {
                game_session_id: session.id,
                name,
                is_host: true,
                selfie_url: None,
            })
            .await
            .map_err(|err| {
                warn!(
                    session_id = %session.id,
                    error = %err,
                    "failed to insert host player; session left without players"
                );
                ServiceError::from(err)
            })?;

        info!(
            session_id = %session.id,
            game_code = %session.game_code,
            host_id = %host.id,
            "session created"
        );
        Ok((session, host))
    }

    async fn insert_session(&self, game_code: String) -> Result<SessionEntity, ServiceError> {
        self.store
            .insert_session(NewSession {
                game_code: game_code.clone(),
            })
            .await
            .map_err(|err| match err {
                StorageError::Conflict { .. } => {
                    ServiceError::Duplicate(format!("game code `{game_code}` is already in use"))
                }
                other => {
                    warn!(game_code = %game_code, error = %other, "failed to insert session");
                    other.into()
                }
            })
    }

    async fn insert_generated_session(&self) -> Result<SessionEntity, ServiceError> {
        let mut last_error = None;
        for _ in 0..GENERATED_CODE_ATTEMPTS {
            match self.insert_session(generate_game_code()).await {
                Ok(session) => return Ok(session),
                Err(err @ ServiceError::Duplicate(_)) => last_error = Some(err),
                Err(err) => return Err(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ServiceError::Duplicate("could not generate a free game code".into())))
    }

    /// Join the session whose code matches `code` (case-insensitive) as a guest.
    pub async fn join_by_code(
        &self,
        name: &str,
        code: &str,
    ) -> Result<(SessionEntity, PlayerEntity), ServiceError> {
        let name = normalize_name(name)?;
        let game_code = normalize_game_code(code)?;
        let Some(session) = self.store.find_session_by_code(game_code.clone()).await? else {
            return Err(ServiceError::NotFound(format!(
                "no game found with code `{game_code}`"
            )));
        };

        let player = self
            .store
            .insert_player(NewPlayer {
                game_session_id: session.id,
                name,
                is_host: false,
                selfie_url: None,
            })
            .await
            .inspect_err(|err| warn!(session_id = %session.id, error = %err, "failed to join session"))?;

        info!(session_id = %session.id, player_id = %player.id, "player joined");
        Ok((session, player))
    }

    /// Session by id.
    pub async fn get_session(&self, id: Uuid) -> Result<Option<SessionEntity>, ServiceError> {
        Ok(self.store.find_session(id).await?)
    }

    /// Player by id.
    pub async fn find_player(&self, id: Uuid) -> Result<Option<PlayerEntity>, ServiceError> {
        Ok(self.store.find_player(id).await?)
    }

    /// Players of a session in join order.
    pub async fn list_players(&self, session_id: Uuid) -> Result<Vec<PlayerEntity>, ServiceError> {
        Ok(self.store.list_players(session_id).await?)
    }

    /// Answers of a session in submission order.
    pub async fn list_answers(&self, session_id: Uuid) -> Result<Vec<AnswerEntity>, ServiceError> {
        Ok(self.store.list_answers(session_id).await?)
    }

    /// Session, players and answers read together.
    pub async fn snapshot(&self, session_id: Uuid) -> Result<SessionSnapshot, ServiceError> {
        let (session, players, answers) = tokio::try_join!(
            self.store.find_session(session_id),
            self.store.list_players(session_id),
            self.store.list_answers(session_id),
        )?;
        Ok(SessionSnapshot {
            session,
            players,
            answers,
        })
    }

    /// Unconditional partial update.
    pub async fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> Result<SessionEntity, ServiceError> {
        self.store
            .update_session(id, patch, None)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("session `{id}` not found")))
    }

    /// Write `plan` only while the session still sits at `plan.from`.
    pub async fn transition(
        &self,
        session_id: Uuid,
        plan: &Plan,
    ) -> Result<TransitionOutcome, ServiceError> {
        match self
            .store
            .update_session(session_id, plan.patch(), Some(plan.from))
            .await?
        {
            Some(session) => Ok(TransitionOutcome::Applied(session)),
            None => {
                let current = self.store.find_session(session_id).await?;
                Ok(TransitionOutcome::Superseded(current))
            }
        }
    }

    /// Store an answer for the question the session is currently showing.
    ///
    /// The store checks the question is still open in the same step as the insert, so an
    /// answer can never land after the reveal that scores it. A second answer from the same
    /// player for the same key is rejected and the first one kept.
    pub async fn insert_answer(&self, answer: NewAnswer) -> Result<AnswerEntity, ServiceError> {
        let session_id = answer.game_session_id;
        let question_key = answer.question_key.clone();
        match self.store.insert_answer(answer).await? {
            AnswerInsert::Inserted(stored) => Ok(stored),
            AnswerInsert::Duplicate(existing) => {
                warn!(
                    player_id = %existing.player_id,
                    question_key = %existing.question_key,
                    "rejected second answer; first answer kept"
                );
                Err(ServiceError::Duplicate(format!(
                    "player already answered question `{}`",
                    existing.question_key
                )))
            }
            AnswerInsert::Closed(None) => Err(ServiceError::NotFound(format!(
                "session `{session_id}` not found"
            ))),
            AnswerInsert::Closed(Some(cursor)) => {
                debug!(
                    %session_id,
                    %question_key,
                    status = ?cursor.status,
                    "answer arrived after the question closed"
                );
                Err(ServiceError::InvalidState(format!(
                    "question `{question_key}` is not open for answers"
                )))
            }
        }
    }

    /// Atomically add `points` to a player's score.
    pub async fn increment_score(&self, player_id: Uuid, points: u32) -> Result<(), ServiceError> {
        if self.store.increment_score(player_id, points).await? {
            Ok(())
        } else {
            Err(ServiceError::NotFound(format!("player `{player_id}` not found")))
        }
    }

    /// Put the session back to the lobby, zero every score and delete every answer.
    ///
    /// With `expected`, nothing happens unless the session still sits at that cursor.
    pub async fn reset_session(
        &self,
        id: Uuid,
        expected: Option<SessionCursor>,
    ) -> Result<TransitionOutcome, ServiceError> {
        let Some(session) = self
            .store
            .update_session(id, SessionPatch::full(SessionCursor::LOBBY), expected)
            .await?
        else {
            return match self.store.find_session(id).await? {
                Some(current) => Ok(TransitionOutcome::Superseded(Some(current))),
                None => Err(ServiceError::NotFound(format!("session `{id}` not found"))),
            };
        };

        self.store.reset_scores(id).await?;
        let deleted = self.store.delete_answers(id).await?;
        info!(session_id = %id, deleted_answers = deleted, "session reset");
        Ok(TransitionOutcome::Applied(session))
    }
}
