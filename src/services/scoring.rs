//! Scoring engine: one correctness predicate and one bonus formula, shared by the host's
//! scoring pass and the leaderboard breakdown.

use std::collections::HashSet;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, QuestionKey, SessionCursor},
    error::ServiceError,
    services::session_repository::SessionRepository,
    state::question_bank::{Question, QuestionBank},
};

/// Points for any correct answer, before the speed bonus.
pub const BASE_POINTS: u32 = 10;

/// Exact string match against the bank's correct option.
pub fn is_correct(question: &Question, answer: &str) -> bool {
    answer == question.correct
}

/// Points earned by one answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsBreakdown {
    /// Answering player.
    pub player_id: Uuid,
    /// Option the player picked.
    pub answer: String,
    /// Whether the answer matched.
    pub correct: bool,
    /// [`BASE_POINTS`] when correct.
    pub base: u32,
    /// Seconds left at submission when correct.
    pub bonus: u32,
    /// `base + bonus`.
    pub total: u32,
}

impl PointsBreakdown {
    /// Score `answer` against `question`.
    pub fn of(question: &Question, answer: &AnswerEntity) -> Self {
        let correct = is_correct(question, &answer.answer);
        let (base, bonus) = if correct {
            (BASE_POINTS, answer.time_remaining)
        } else {
            (0, 0)
        };
        Self {
            player_id: answer.player_id,
            answer: answer.answer.clone(),
            correct,
            base,
            bonus,
            total: base + bonus,
        }
    }
}

/// First answer per player for `key`, in submission order.
pub fn first_answers<'a>(
    answers: impl IntoIterator<Item = &'a AnswerEntity>,
    key: &QuestionKey,
) -> Vec<&'a AnswerEntity> {
    let mut seen = HashSet::new();
    answers
        .into_iter()
        .filter(|a| &a.question_key == key && seen.insert(a.player_id))
        .collect()
}

/// Breakdown of one question, highest total first.
pub fn question_breakdown<'a>(
    question: &Question,
    answers: impl IntoIterator<Item = &'a AnswerEntity>,
    key: &QuestionKey,
) -> Vec<PointsBreakdown> {
    let mut breakdown: Vec<PointsBreakdown> = first_answers(answers, key)
        .into_iter()
        .map(|answer| PointsBreakdown::of(question, answer))
        .collect();
    breakdown.sort_by(|a, b| b.total.cmp(&a.total));
    breakdown
}

/// Result of a scoring pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// The key was scored before on this device; nothing was written.
    AlreadyScored(QuestionKey),
    /// Increments applied, one per scoring player.
    Scored {
        /// Question that was scored.
        key: QuestionKey,
        /// `(player, points)` of every successful increment.
        awarded: Vec<(Uuid, u32)>,
    },
}

/// Host-local scoring guard remembering the last question key scored.
#[derive(Debug, Default)]
pub struct Scorer {
    last_scored: Option<QuestionKey>,
}

impl Scorer {
    /// Forget the last scored key, after a reset.
    pub fn clear(&mut self) {
        self.last_scored = None;
    }

    /// Last key scored on this device.
    pub fn last_scored(&self) -> Option<&QuestionKey> {
        self.last_scored.as_ref()
    }

    /// Score the question `cursor` points at, at most once per key.
    ///
    /// Answers are read fresh from the store. The key is marked before any increment, so a
    /// partial failure is logged and never retried.
    pub async fn score_question(
        &mut self,
        repository: &SessionRepository,
        session_id: Uuid,
        cursor: SessionCursor,
        bank: &QuestionBank,
    ) -> Result<ScoreOutcome, ServiceError> {
        let key = cursor
            .question_key()
            .ok_or_else(|| ServiceError::InvalidState("no question to score".into()))?;
        if self.last_scored.as_ref() == Some(&key) {
            return Ok(ScoreOutcome::AlreadyScored(key));
        }
        let question = bank
            .question_at(&cursor)
            .ok_or_else(|| ServiceError::InvalidState(format!("question `{key}` is not in the bank")))?;

        let answers = repository.list_answers(session_id).await?;
        self.last_scored = Some(key.clone());

        let mut awarded = Vec::new();
        for points in question_breakdown(question, &answers, &key)
            .into_iter()
            .filter(|points| points.correct)
        {
            match repository.increment_score(points.player_id, points.total).await {
                Ok(()) => awarded.push((points.player_id, points.total)),
                Err(err) => warn!(
                    %session_id,
                    player_id = %points.player_id,
                    points = points.total,
                    error = %err,
                    "failed to apply score increment"
                ),
            }
        }

        info!(%session_id, question_key = %key, scoring_players = awarded.len(), "question scored");
        Ok(ScoreOutcome::Scored { key, awarded })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use super::*;
    use crate::dao::{
        models::{NewAnswer, SessionPatch, SessionStatus},
        session_store::memory::MemoryStore,
    };

    fn question() -> Question {
        QuestionBank::builtin().question(1, 0).cloned().unwrap()
    }

    fn answer(player_id: Uuid, text: &str, time_remaining: u32) -> AnswerEntity {
        AnswerEntity {
            id: Uuid::new_v4(),
            game_session_id: Uuid::nil(),
            player_id,
            question_key: QuestionKey::new(1, 0),
            answer: text.into(),
            time_remaining,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn correct_answer_earns_base_plus_time_left() {
        let points = PointsBreakdown::of(&question(), &answer(Uuid::new_v4(), "7", 7));
        assert!(points.correct);
        assert_eq!((points.base, points.bonus, points.total), (10, 7, 17));
    }

    #[test]
    fn wrong_answer_earns_nothing() {
        let points = PointsBreakdown::of(&question(), &answer(Uuid::new_v4(), "6", 12));
        assert!(!points.correct);
        assert_eq!(points.total, 0);
    }

    #[test]
    fn only_the_first_answer_per_player_counts() {
        let player = Uuid::new_v4();
        let answers = [answer(player, "6", 14), answer(player, "7", 13)];
        let breakdown = question_breakdown(&question(), &answers, &QuestionKey::new(1, 0));
        assert_eq!(breakdown.len(), 1);
        assert!(!breakdown[0].correct);
    }

    #[tokio::test]
    async fn scoring_twice_applies_once() {
        let repository = SessionRepository::new(Arc::new(MemoryStore::new()));
        let bank = QuestionBank::builtin();
        let (session, host) = repository.create_session("Host", Some("SCOR")).await.unwrap();
        let (_, guest) = repository.join_by_code("Guest", "SCOR").await.unwrap();
        let open = repository
            .update_session(
                session.id,
                SessionPatch {
                    status: Some(SessionStatus::Question),
                    current_round: Some(1),
                    current_question_index: Some(0),
                },
            )
            .await
            .unwrap();
        for (player, text, left) in [(host.id, "7", 7), (guest.id, "5", 9)] {
            repository
                .insert_answer(NewAnswer {
                    game_session_id: session.id,
                    player_id: player,
                    question_key: QuestionKey::new(1, 0),
                    answer: text.into(),
                    time_remaining: left,
                })
                .await
                .unwrap();
        }

        let mut scorer = Scorer::default();
        let first = scorer
            .score_question(&repository, session.id, open.cursor(), &bank)
            .await
            .unwrap();
        let second = scorer
            .score_question(&repository, session.id, open.cursor(), &bank)
            .await
            .unwrap();

        assert_eq!(
            first,
            ScoreOutcome::Scored {
                key: QuestionKey::new(1, 0),
                awarded: vec![(host.id, 17)],
            }
        );
        assert_eq!(second, ScoreOutcome::AlreadyScored(QuestionKey::new(1, 0)));
        let host_score = repository.find_player(host.id).await.unwrap().unwrap().score;
        let guest_score = repository.find_player(guest.id).await.unwrap().unwrap().score;
        assert_eq!((host_score, guest_score), (17, 0));
    }
}
