//! In-memory projection of one session's rows, fed by change notifications and polls.
//!
//! Both producers go through [`SessionMirror::apply`]: notifications merge single rows by key,
//! polls replace whole collections. Either path converges to the store contents.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, ChangeEvent, PlayerEntity, QuestionKey, Record, SessionCursor, SessionEntity,
    SessionStatus, Table,
};

/// Full read of a session's three collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session row, `None` when it no longer exists.
    pub session: Option<SessionEntity>,
    /// Players in join order.
    pub players: Vec<PlayerEntity>,
    /// Answers in submission order.
    pub answers: Vec<AnswerEntity>,
}

/// Input of the mirror reducer.
#[derive(Debug, Clone)]
pub enum MirrorUpdate {
    /// A pushed change notification.
    Notification(ChangeEvent),
    /// Result of a full fetch.
    Poll(SessionSnapshot),
}

/// Live local view of a session.
#[derive(Debug, Clone)]
pub struct SessionMirror {
    session_id: Uuid,
    session: Option<SessionEntity>,
    players: IndexMap<Uuid, PlayerEntity>,
    answers: IndexMap<(Uuid, QuestionKey), AnswerEntity>,
    cursor_since: Instant,
    generation: u64,
}

impl SessionMirror {
    /// Empty mirror for `session_id`, filled by the first update.
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            session: None,
            players: IndexMap::new(),
            answers: IndexMap::new(),
            cursor_since: Instant::now(),
            generation: 0,
        }
    }

    /// Merge `update`; returns whether anything changed.
    pub fn apply(&mut self, update: MirrorUpdate) -> bool {
        let before_cursor = self.cursor();
        let changed = match update {
            MirrorUpdate::Notification(event) => self.merge(event),
            MirrorUpdate::Poll(snapshot) => self.replace(snapshot),
        };
        let after_cursor = self.cursor();
        if after_cursor != before_cursor {
            self.cursor_since = Instant::now();
            if let (Some(before), Some(after)) = (before_cursor, after_cursor) {
                if restarted(before, after) {
                    self.generation += 1;
                }
            }
        }
        changed
    }

    fn merge(&mut self, event: ChangeEvent) -> bool {
        if !event.concerns(self.session_id) {
            return false;
        }
        match event {
            ChangeEvent::Upserted(Record::Session(session)) => {
                if self.session.as_ref() == Some(&session) || self.is_stale(&session) {
                    return false;
                }
                self.session = Some(session);
                true
            }
            ChangeEvent::Upserted(Record::Player(player)) => {
                if self.players.get(&player.id) == Some(&player) {
                    return false;
                }
                self.players.insert(player.id, player);
                true
            }
            ChangeEvent::Upserted(Record::Answer(answer)) => {
                let key = (answer.player_id, answer.question_key.clone());
                if self.answers.get(&key) == Some(&answer) {
                    return false;
                }
                self.answers.insert(key, answer);
                true
            }
            ChangeEvent::Deleted {
                table: Table::Sessions,
                id,
                ..
            } => {
                if id != self.session_id || self.session.is_none() {
                    return false;
                }
                self.session = None;
                true
            }
            ChangeEvent::Deleted {
                table: Table::Players,
                id,
                ..
            } => self.players.shift_remove(&id).is_some(),
            ChangeEvent::Deleted {
                table: Table::Answers,
                id,
                ..
            } => {
                let before = self.answers.len();
                self.answers.retain(|_, answer| answer.id != id);
                self.answers.len() != before
            }
        }
    }

    fn replace(&mut self, snapshot: SessionSnapshot) -> bool {
        let session = match snapshot.session.filter(|s| s.id == self.session_id) {
            // The poll was read before a newer row reached us through a notification.
            Some(session) if self.is_stale(&session) => self.session.clone(),
            other => other,
        };
        let players: IndexMap<Uuid, PlayerEntity> = snapshot
            .players
            .into_iter()
            .filter(|p| p.game_session_id == self.session_id)
            .map(|p| (p.id, p))
            .collect();
        let mut answers = IndexMap::new();
        for answer in snapshot
            .answers
            .into_iter()
            .filter(|a| a.game_session_id == self.session_id)
        {
            answers
                .entry((answer.player_id, answer.question_key.clone()))
                .or_insert(answer);
        }

        let changed = session != self.session || players != self.players || answers != self.answers;
        self.session = session;
        self.players = players;
        self.answers = answers;
        changed
    }

    /// Whether `session` is older than the row already mirrored.
    fn is_stale(&self, session: &SessionEntity) -> bool {
        self.session
            .as_ref()
            .is_some_and(|current| session.updated_at < current.updated_at)
    }

    /// Session this mirror follows.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Session row, if known and still present.
    pub fn session(&self) -> Option<&SessionEntity> {
        self.session.as_ref()
    }

    /// Current cursor, if the session is known.
    pub fn cursor(&self) -> Option<SessionCursor> {
        self.session.as_ref().map(SessionEntity::cursor)
    }

    /// Number of game restarts observed; bumps when the session returns to the lobby or its
    /// cursor moves backwards, even if the lobby itself was never seen.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time since this device observed the current cursor.
    pub fn cursor_elapsed(&self) -> Duration {
        self.cursor_since.elapsed()
    }

    /// Players in join order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Player by id.
    pub fn player(&self, id: Uuid) -> Option<&PlayerEntity> {
        self.players.get(&id)
    }

    /// Every answer of the session, one per player and key.
    pub fn answers(&self) -> impl Iterator<Item = &AnswerEntity> {
        self.answers.values()
    }

    /// Answers for one question occurrence in submission order.
    pub fn answers_for<'a>(&'a self, key: &'a QuestionKey) -> impl Iterator<Item = &'a AnswerEntity> {
        self.answers.values().filter(move |a| &a.question_key == key)
    }

    /// Whether `player_id` has an answer for `key`.
    pub fn has_answered(&self, player_id: Uuid, key: &QuestionKey) -> bool {
        self.answers.contains_key(&(player_id, key.clone()))
    }

    /// Whether every current player has an answer for `key`.
    pub fn all_answered(&self, key: &QuestionKey) -> bool {
        !self.players.is_empty() && self.players.keys().all(|id| self.has_answered(*id, key))
    }

    /// Players by descending score; ties keep join order.
    pub fn standings(&self) -> Vec<&PlayerEntity> {
        let mut standings: Vec<&PlayerEntity> = self.players.values().collect();
        standings.sort_by(|a, b| b.score.cmp(&a.score));
        standings
    }
}

fn restarted(before: SessionCursor, after: SessionCursor) -> bool {
    let entered_lobby =
        after.status == SessionStatus::Lobby && before.status != SessionStatus::Lobby;
    let moved_back = (after.current_round, after.current_question_index)
        < (before.current_round, before.current_question_index);
    entered_lobby || moved_back
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn session(id: Uuid, status: SessionStatus) -> SessionEntity {
        SessionEntity {
            id,
            game_code: "ABCD".into(),
            status,
            current_round: 1,
            current_question_index: 0,
            created_at: SystemTime::UNIX_EPOCH,
            updated_at: SystemTime::UNIX_EPOCH,
        }
    }

    fn player(session_id: Uuid, name: &str, score: u32) -> PlayerEntity {
        PlayerEntity {
            id: Uuid::new_v4(),
            game_session_id: session_id,
            name: name.into(),
            score,
            is_host: false,
            selfie_url: None,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    fn answer(player: &PlayerEntity, key: QuestionKey, text: &str) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            game_session_id: player.game_session_id,
            player_id: player.id,
            question_key: key,
            answer: text.into(),
            time_remaining: 5,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn notification_replaces_player_by_id() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        let mut p = player(id, "Ana", 0);
        assert!(mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Player(p.clone())
        ))));
        p.score = 17;
        assert!(mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Player(p.clone())
        ))));
        assert!(!mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Player(p.clone())
        ))));
        assert_eq!(mirror.player_count(), 1);
        assert_eq!(mirror.player(p.id).map(|p| p.score), Some(17));
    }

    #[test]
    fn foreign_rows_are_ignored() {
        let mut mirror = SessionMirror::new(Uuid::new_v4());
        let stranger = player(Uuid::new_v4(), "Bo", 0);
        assert!(!mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Player(stranger)
        ))));
        assert_eq!(mirror.player_count(), 0);
    }

    #[test]
    fn poll_replaces_everything() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        let a = player(id, "Ana", 0);
        let b = player(id, "Ben", 0);
        let key = QuestionKey::new(1, 0);
        mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Answer(answer(&a, key.clone(), "x")),
        )));

        let changed = mirror.apply(MirrorUpdate::Poll(SessionSnapshot {
            session: Some(session(id, SessionStatus::Question)),
            players: vec![a.clone(), b.clone()],
            answers: vec![answer(&b, key.clone(), "y")],
        }));

        assert!(changed);
        assert!(!mirror.has_answered(a.id, &key));
        assert!(mirror.has_answered(b.id, &key));
        assert!(!mirror.all_answered(&key));
        assert_eq!(mirror.cursor().map(|c| c.status), Some(SessionStatus::Question));
    }

    #[test]
    fn late_poll_does_not_rewind_the_session() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        let mut question = session(id, SessionStatus::Question);
        let polled = SessionSnapshot {
            session: Some(question.clone()),
            ..SessionSnapshot::default()
        };
        question.status = SessionStatus::Reveal;
        question.updated_at = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Session(question.clone()),
        )));
        let generation = mirror.generation();

        mirror.apply(MirrorUpdate::Poll(polled));
        assert_eq!(mirror.cursor().map(|c| c.status), Some(SessionStatus::Reveal));
        assert_eq!(mirror.generation(), generation);

        let mut older = question.clone();
        older.status = SessionStatus::Question;
        older.updated_at = SystemTime::UNIX_EPOCH;
        assert!(!mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Session(older)
        ))));
        assert_eq!(mirror.session(), Some(&question));
    }

    #[test]
    fn delete_notifications_remove_answers() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        let a = player(id, "Ana", 0);
        let stored = answer(&a, QuestionKey::new(1, 0), "x");
        mirror.apply(MirrorUpdate::Notification(ChangeEvent::Upserted(
            Record::Answer(stored.clone()),
        )));

        let removed = mirror.apply(MirrorUpdate::Notification(ChangeEvent::Deleted {
            table: Table::Answers,
            id: stored.id,
            game_session_id: None,
        }));

        assert!(removed);
        assert_eq!(mirror.answers().count(), 0);
    }

    #[test]
    fn all_answered_needs_players() {
        let mirror = SessionMirror::new(Uuid::new_v4());
        assert!(!mirror.all_answered(&QuestionKey::new(1, 0)));
    }

    #[test]
    fn standings_sort_by_score() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        mirror.apply(MirrorUpdate::Poll(SessionSnapshot {
            session: Some(session(id, SessionStatus::Leaderboard)),
            players: vec![player(id, "Low", 3), player(id, "High", 25), player(id, "Mid", 12)],
            answers: vec![],
        }));
        let names: Vec<&str> = mirror.standings().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["High", "Mid", "Low"]);
    }

    #[test]
    fn restart_is_seen_even_when_the_lobby_is_skipped() {
        let id = Uuid::new_v4();
        let mut mirror = SessionMirror::new(id);
        let mut at = |status, round, index| {
            let mut row = session(id, status);
            row.current_round = round;
            row.current_question_index = index;
            mirror.apply(MirrorUpdate::Poll(SessionSnapshot {
                session: Some(row),
                ..Default::default()
            }));
            mirror.generation()
        };

        assert_eq!(at(SessionStatus::Intro, 1, -1), 0);
        assert_eq!(at(SessionStatus::Question, 1, 0), 0);
        assert_eq!(at(SessionStatus::Leaderboard, 3, 1), 0);
        assert_eq!(at(SessionStatus::Intro, 1, -1), 1);
        assert_eq!(at(SessionStatus::Lobby, 0, -1), 2);
    }
}
