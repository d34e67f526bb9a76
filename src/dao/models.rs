use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Legal statuses a quiz session can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Players gather and join with the game code.
    Lobby,
    /// Title card of the current round.
    Intro,
    /// A question is open for answers.
    Question,
    /// The correct answer is shown and the question is scored.
    Reveal,
    /// Points of the last question and the cumulative standings.
    Leaderboard,
}

impl SessionStatus {
    /// Storage representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Lobby => "lobby",
            SessionStatus::Intro => "intro",
            SessionStatus::Question => "question",
            SessionStatus::Reveal => "reveal",
            SessionStatus::Leaderboard => "leaderboard",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The part of a session row the state machine reads and writes.
///
/// Conditional transitions compare the whole cursor, so two writers planning from the same
/// cursor cannot both succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionCursor {
    /// Current status.
    pub status: SessionStatus,
    /// 0 before the game starts, then 1..=N.
    pub current_round: u32,
    /// -1 when no question is active, else the 0-based index in the current round.
    pub current_question_index: i32,
}

impl SessionCursor {
    /// Cursor of a freshly created (or reset) session.
    pub const LOBBY: Self = Self {
        status: SessionStatus::Lobby,
        current_round: 0,
        current_question_index: -1,
    };

    /// Cursor of the open question `key`, the only one accepting answers for it.
    pub fn open_question(key: &QuestionKey) -> Option<Self> {
        let (round, index) = key.as_str().split_once('-')?;
        Some(Self {
            status: SessionStatus::Question,
            current_round: round.parse().ok()?,
            current_question_index: index.parse().ok()?,
        })
    }

    /// Whether answers for `key` are accepted at this cursor.
    pub fn accepts_answers_for(&self, key: &QuestionKey) -> bool {
        self.status == SessionStatus::Question && self.question_key().as_ref() == Some(key)
    }

    /// Key of the question this cursor points at, if any.
    pub fn question_key(&self) -> Option<QuestionKey> {
        let index = u32::try_from(self.current_question_index).ok()?;
        (self.current_round > 0).then(|| QuestionKey::new(self.current_round, index))
    }
}

impl Default for SessionCursor {
    fn default() -> Self {
        Self::LOBBY
    }
}

/// `"{round}-{questionIndex}"`, scoping answers to one question occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct QuestionKey(String);

impl QuestionKey {
    /// Build the key for a round (1-based) and question index (0-based).
    pub fn new(round: u32, index: u32) -> Self {
        Self(format!("{round}-{index}"))
    }

    /// Borrow the raw key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for QuestionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row per game instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key, immutable.
    pub id: Uuid,
    /// Uppercased shareable code.
    pub game_code: String,
    /// Current status.
    pub status: SessionStatus,
    /// Current round (0 before start).
    pub current_round: u32,
    /// Current question index (-1 when none).
    pub current_question_index: i32,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Set on every mutation; observability only.
    pub updated_at: SystemTime,
}

impl SessionEntity {
    /// Project the state-machine fields of the row.
    pub fn cursor(&self) -> SessionCursor {
        SessionCursor {
            status: self.status,
            current_round: self.current_round,
            current_question_index: self.current_question_index,
        }
    }

    /// Write the given fields and bump `updated_at`.
    pub fn apply_patch(&mut self, patch: &SessionPatch, now: SystemTime) {
        let next = patch.apply_to(self.cursor());
        self.status = next.status;
        self.current_round = next.current_round;
        self.current_question_index = next.current_question_index;
        self.updated_at = now;
    }
}

/// One row per participant per session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerEntity {
    /// Primary key.
    pub id: Uuid,
    /// Session the player belongs to for its whole lifetime.
    pub game_session_id: Uuid,
    /// Display name.
    pub name: String,
    /// Cumulative score, only ever changed by atomic increments and resets.
    pub score: u32,
    /// Set once, for the creator of the session.
    pub is_host: bool,
    /// Optional avatar, display only.
    pub selfie_url: Option<String>,
    /// Join timestamp, used to order the player list.
    pub created_at: SystemTime,
}

/// One row per (player, question) submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Primary key.
    pub id: Uuid,
    /// Owning session.
    pub game_session_id: Uuid,
    /// Submitting player.
    pub player_id: Uuid,
    /// Question occurrence the answer belongs to.
    pub question_key: QuestionKey,
    /// Option text the player picked.
    pub answer: String,
    /// Seconds left on the submitting device's countdown.
    pub time_remaining: u32,
    /// Submission timestamp; the earliest answer per player and key is the one that counts.
    pub created_at: SystemTime,
}

/// Payload of a session insert. Sessions always start at [`SessionCursor::LOBBY`].
#[derive(Debug, Clone)]
pub struct NewSession {
    /// Uppercased game code.
    pub game_code: String,
}

/// Payload of a player insert. Players always start with a zero score.
#[derive(Debug, Clone)]
pub struct NewPlayer {
    /// Owning session.
    pub game_session_id: Uuid,
    /// Display name.
    pub name: String,
    /// Whether this player is the creator of the session.
    pub is_host: bool,
    /// Optional avatar.
    pub selfie_url: Option<String>,
}

/// Payload of an answer insert.
#[derive(Debug, Clone)]
pub struct NewAnswer {
    /// Owning session.
    pub game_session_id: Uuid,
    /// Submitting player.
    pub player_id: Uuid,
    /// Question occurrence.
    pub question_key: QuestionKey,
    /// Selected option text.
    pub answer: String,
    /// Seconds left on the countdown.
    pub time_remaining: u32,
}

/// Partial update of a session row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New status, if changed.
    pub status: Option<SessionStatus>,
    /// New round, if changed.
    pub current_round: Option<u32>,
    /// New question index, if changed.
    pub current_question_index: Option<i32>,
}

impl SessionPatch {
    /// Patch writing every state-machine field of `cursor`.
    pub fn full(cursor: SessionCursor) -> Self {
        Self {
            status: Some(cursor.status),
            current_round: Some(cursor.current_round),
            current_question_index: Some(cursor.current_question_index),
        }
    }

    /// Result of applying this patch on top of `cursor`.
    pub fn apply_to(&self, cursor: SessionCursor) -> SessionCursor {
        SessionCursor {
            status: self.status.unwrap_or(cursor.status),
            current_round: self.current_round.unwrap_or(cursor.current_round),
            current_question_index: self
                .current_question_index
                .unwrap_or(cursor.current_question_index),
        }
    }
}

/// Outcome of an answer insert under the first-write-wins rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerInsert {
    /// The answer was stored.
    Inserted(AnswerEntity),
    /// The player already answered this question; the stored answer is returned untouched.
    Duplicate(AnswerEntity),
    /// The session is not showing this question. Carries the cursor it sits at, `None` when
    /// the session does not exist.
    Closed(Option<SessionCursor>),
}

/// Tables (collections) of the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// `game_sessions`
    Sessions,
    /// `quiz_players`
    Players,
    /// `quiz_answers`
    Answers,
}

impl Table {
    /// Name of the table in the store.
    pub fn name(&self) -> &'static str {
        match self {
            Table::Sessions => "game_sessions",
            Table::Players => "quiz_players",
            Table::Answers => "quiz_answers",
        }
    }
}

/// A full row carried by an insert or update notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A `game_sessions` row.
    Session(SessionEntity),
    /// A `quiz_players` row.
    Player(PlayerEntity),
    /// A `quiz_answers` row.
    Answer(AnswerEntity),
}

impl Record {
    /// Session the row belongs to.
    pub fn session_id(&self) -> Uuid {
        match self {
            Record::Session(session) => session.id,
            Record::Player(player) => player.game_session_id,
            Record::Answer(answer) => answer.game_session_id,
        }
    }
}

/// Change notification emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A row was inserted or updated.
    Upserted(Record),
    /// A row was deleted. Backends that cannot see the deleted row only know its id.
    Deleted {
        /// Table the row was removed from.
        table: Table,
        /// Primary key of the removed row.
        id: Uuid,
        /// Owning session, when the backend knows it.
        game_session_id: Option<Uuid>,
    },
}

impl ChangeEvent {
    /// Whether a subscriber scoped to `session_id` should see this event.
    ///
    /// Deletes with an unknown owner are delivered to everyone; applying them is a no-op for
    /// mirrors that do not hold the row.
    pub fn concerns(&self, session_id: Uuid) -> bool {
        match self {
            ChangeEvent::Upserted(record) => record.session_id() == session_id,
            ChangeEvent::Deleted {
                game_session_id, ..
            } => game_session_id.is_none_or(|owner| owner == session_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_key_matches_round_and_index() {
        assert_eq!(QuestionKey::new(2, 0).as_str(), "2-0");
        let cursor = SessionCursor {
            status: SessionStatus::Question,
            current_round: 3,
            current_question_index: 4,
        };
        assert_eq!(cursor.question_key(), Some(QuestionKey::new(3, 4)));
    }

    #[test]
    fn open_question_cursor_follows_the_key() {
        let key = QuestionKey::new(2, 3);
        let cursor = SessionCursor::open_question(&key).unwrap();
        assert!(cursor.accepts_answers_for(&key));
        assert!(!cursor.accepts_answers_for(&QuestionKey::new(2, 2)));
        let reveal = SessionCursor {
            status: SessionStatus::Reveal,
            ..cursor
        };
        assert!(!reveal.accepts_answers_for(&key));
        assert_eq!(SessionCursor::open_question(&QuestionKey::from("x".to_owned())), None);
    }

    #[test]
    fn no_question_key_outside_a_question() {
        assert_eq!(SessionCursor::LOBBY.question_key(), None);
        let intro = SessionCursor {
            status: SessionStatus::Intro,
            current_round: 1,
            current_question_index: -1,
        };
        assert_eq!(intro.question_key(), None);
    }

    #[test]
    fn patch_only_touches_given_fields() {
        let cursor = SessionCursor {
            status: SessionStatus::Leaderboard,
            current_round: 1,
            current_question_index: 2,
        };
        let patch = SessionPatch {
            status: Some(SessionStatus::Question),
            current_question_index: Some(3),
            ..SessionPatch::default()
        };
        let next = patch.apply_to(cursor);
        assert_eq!(next.status, SessionStatus::Question);
        assert_eq!(next.current_round, 1);
        assert_eq!(next.current_question_index, 3);
    }
}
