pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::{future::BoxFuture, stream::BoxStream};
use uuid::Uuid;

use crate::dao::{
    models::{
        AnswerEntity, AnswerInsert, ChangeEvent, NewAnswer, NewPlayer, NewSession, PlayerEntity,
        SessionCursor, SessionEntity, SessionPatch,
    },
    storage::StorageResult,
};

/// Stream of change notifications scoped to one session.
pub type ChangeFeed = BoxStream<'static, ChangeEvent>;

/// Abstraction over the shared persistent store every device talks to.
pub trait SessionStore: Send + Sync {
    /// Insert a session at the lobby cursor. Fails with a conflict when the code is taken.
    fn insert_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Session by id.
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Session by its join code, used when a guest joins.
    fn find_session_by_code(
        &self,
        game_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Write `patch` and bump `updated_at`. With `expected`, the write only happens while the
    /// row still matches that cursor. Returns `None` when no row matched.
    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Add a player to a session with a zero score.
    fn insert_player(&self, player: NewPlayer) -> BoxFuture<'static, StorageResult<PlayerEntity>>;
    /// Player by id.
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>>;
    /// Players of a session in join order.
    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>>;
    /// Server-side `score = score + points`. Returns whether the player exists.
    fn increment_score(&self, player_id: Uuid, points: u32) -> BoxFuture<'static, StorageResult<bool>>;
    /// Set every score of the session back to zero.
    fn reset_scores(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Store an answer while its question is open.
    ///
    /// The open check and the insert are one atomic step. A second answer from the same
    /// player for the same question yields [`AnswerInsert::Duplicate`].
    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StorageResult<AnswerInsert>>;
    /// Answers of a session in submission order.
    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    /// Drop every answer of the session. Returns how many were removed.
    fn delete_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<u64>>;
    /// Subscribe to inserts, updates and deletes touching `session_id` in all three tables.
    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeFeed>>;
    /// Cheap round trip proving the store is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
