use std::fmt;

use thiserror::Error;

use crate::{
    dao::models::{SessionCursor, SessionPatch, SessionStatus},
    state::question_bank::QuestionBank,
};

/// Role of the device issuing an event, taken from its player's `is_host` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Creator of the session, the only device allowed to advance it.
    Host,
    /// Every other participant.
    Guest,
}

impl DeviceRole {
    /// Role matching a player's `is_host` flag.
    pub fn from_is_host(is_host: bool) -> Self {
        if is_host {
            DeviceRole::Host
        } else {
            DeviceRole::Guest
        }
    }
}

/// Why a question is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealReason {
    /// Every current player has an answer for the question key.
    AllAnswered,
    /// The host's countdown reached zero.
    TimeUp,
    /// The host closed the question by hand.
    Manual,
}

/// Events that can be applied to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host starts the game from the lobby.
    StartGame,
    /// The intro card timer elapsed.
    IntroElapsed,
    /// Close the current question and show the answer.
    Reveal(RevealReason),
    /// Host moves on: intro to question, reveal to leaderboard, leaderboard to what comes next.
    Continue,
    /// Host restarts a finished game.
    PlayAgain,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::StartGame => f.write_str("start game"),
            SessionEvent::IntroElapsed => f.write_str("intro elapsed"),
            SessionEvent::Reveal(reason) => write!(f, "reveal ({reason:?})"),
            SessionEvent::Continue => f.write_str("continue"),
            SessionEvent::PlayAgain => f.write_str("play again"),
        }
    }
}

/// Error returned when an event is not legal from the current cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} cannot be applied while in {}", .from.status)]
pub struct InvalidTransition {
    /// Cursor the session was in.
    pub from: SessionCursor,
    /// Rejected event.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Only the host may advance the session.
    #[error("only the host can trigger {0}")]
    Unauthorized(SessionEvent),
    /// The event is not legal from the current cursor.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// A validated transition, written to the store conditionally on `from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Cursor the plan was computed from.
    pub from: SessionCursor,
    /// Cursor after the transition.
    pub to: SessionCursor,
    /// Event that triggered the plan.
    pub event: SessionEvent,
}

impl Plan {
    /// Continuing from the final leaderboard changes nothing.
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    /// Fields to write for this plan.
    pub fn patch(&self) -> SessionPatch {
        SessionPatch::full(self.to)
    }

    /// Whether the plan enters the reveal status, which triggers scoring.
    pub fn enters_reveal(&self) -> bool {
        self.from.status != SessionStatus::Reveal && self.to.status == SessionStatus::Reveal
    }
}

/// Plan `event` from `cursor` on behalf of a device with `role`.
pub fn plan(
    cursor: SessionCursor,
    event: SessionEvent,
    role: DeviceRole,
    bank: &QuestionBank,
) -> Result<Plan, PlanError> {
    if role != DeviceRole::Host {
        return Err(PlanError::Unauthorized(event));
    }

    let to = compute_transition(cursor, event, bank)?;
    Ok(Plan {
        from: cursor,
        to,
        event,
    })
}

fn compute_transition(
    cursor: SessionCursor,
    event: SessionEvent,
    bank: &QuestionBank,
) -> Result<SessionCursor, InvalidTransition> {
    let invalid = || InvalidTransition {
        from: cursor,
        event,
    };
    let at = |status, current_round, current_question_index| SessionCursor {
        status,
        current_round,
        current_question_index,
    };

    let next = match (cursor.status, event) {
        (SessionStatus::Lobby, SessionEvent::StartGame) => at(SessionStatus::Intro, 1, -1),
        (SessionStatus::Intro, SessionEvent::IntroElapsed | SessionEvent::Continue) => {
            bank.round(cursor.current_round).ok_or_else(invalid)?;
            at(SessionStatus::Question, cursor.current_round, 0)
        }
        (SessionStatus::Question, SessionEvent::Reveal(_)) => SessionCursor {
            status: SessionStatus::Reveal,
            ..cursor
        },
        (SessionStatus::Reveal, SessionEvent::Continue) => SessionCursor {
            status: SessionStatus::Leaderboard,
            ..cursor
        },
        (SessionStatus::Leaderboard, SessionEvent::Continue) => {
            if bank.round(cursor.current_round).is_none() {
                return Err(invalid());
            }
            if !bank.is_last_in_round(&cursor) {
                at(
                    SessionStatus::Question,
                    cursor.current_round,
                    cursor.current_question_index + 1,
                )
            } else if cursor.current_round < bank.round_count() {
                at(SessionStatus::Intro, cursor.current_round + 1, -1)
            } else {
                cursor
            }
        }
        (SessionStatus::Leaderboard, SessionEvent::PlayAgain) if bank.is_final(&cursor) => {
            SessionCursor::LOBBY
        }
        _ => return Err(invalid()),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(cursor: SessionCursor, event: SessionEvent) -> SessionCursor {
        plan(cursor, event, DeviceRole::Host, &QuestionBank::builtin())
            .unwrap()
            .to
    }

    fn cursor(status: SessionStatus, round: u32, index: i32) -> SessionCursor {
        SessionCursor {
            status,
            current_round: round,
            current_question_index: index,
        }
    }

    #[test]
    fn full_happy_path_through_first_round() {
        let mut c = SessionCursor::LOBBY;
        c = host(c, SessionEvent::StartGame);
        assert_eq!(c, cursor(SessionStatus::Intro, 1, -1));
        c = host(c, SessionEvent::IntroElapsed);
        assert_eq!(c, cursor(SessionStatus::Question, 1, 0));
        c = host(c, SessionEvent::Reveal(RevealReason::AllAnswered));
        assert_eq!(c, cursor(SessionStatus::Reveal, 1, 0));
        c = host(c, SessionEvent::Continue);
        assert_eq!(c, cursor(SessionStatus::Leaderboard, 1, 0));
        c = host(c, SessionEvent::Continue);
        assert_eq!(c, cursor(SessionStatus::Question, 1, 1));
    }

    #[test]
    fn exhausted_round_moves_to_next_intro() {
        let next = host(
            cursor(SessionStatus::Leaderboard, 1, 2),
            SessionEvent::Continue,
        );
        assert_eq!(next, cursor(SessionStatus::Intro, 2, -1));
    }

    #[test]
    fn final_leaderboard_continue_is_a_noop() {
        let last = cursor(SessionStatus::Leaderboard, 3, 1);
        let plan = plan(
            last,
            SessionEvent::Continue,
            DeviceRole::Host,
            &QuestionBank::builtin(),
        )
        .unwrap();
        assert!(plan.is_noop());
        assert_eq!(host(last, SessionEvent::PlayAgain), SessionCursor::LOBBY);
    }

    #[test]
    fn play_again_requires_final_leaderboard() {
        let bank = QuestionBank::builtin();
        let err = plan(
            cursor(SessionStatus::Leaderboard, 1, 0),
            SessionEvent::PlayAgain,
            DeviceRole::Host,
            &bank,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));
    }

    #[test]
    fn lobby_only_accepts_start() {
        let bank = QuestionBank::builtin();
        for event in [
            SessionEvent::IntroElapsed,
            SessionEvent::Reveal(RevealReason::Manual),
            SessionEvent::Continue,
            SessionEvent::PlayAgain,
        ] {
            let err = plan(SessionCursor::LOBBY, event, DeviceRole::Host, &bank).unwrap_err();
            match err {
                PlanError::InvalidTransition(invalid) => {
                    assert_eq!(invalid.from, SessionCursor::LOBBY);
                    assert_eq!(invalid.event, event);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(plan(SessionCursor::LOBBY, SessionEvent::StartGame, DeviceRole::Host, &bank).is_ok());
    }

    #[test]
    fn guests_cannot_advance() {
        let err = plan(
            SessionCursor::LOBBY,
            SessionEvent::StartGame,
            DeviceRole::Guest,
            &QuestionBank::builtin(),
        )
        .unwrap_err();
        assert_eq!(err, PlanError::Unauthorized(SessionEvent::StartGame));
    }

    #[test]
    fn reveal_plan_enters_reveal_once() {
        let bank = QuestionBank::builtin();
        let question = cursor(SessionStatus::Question, 2, 1);
        let plan = plan(
            question,
            SessionEvent::Reveal(RevealReason::TimeUp),
            DeviceRole::Host,
            &bank,
        )
        .unwrap();
        assert!(plan.enters_reveal());
        assert_eq!(plan.patch().apply_to(question), plan.to);
        assert!(super::plan(plan.to, SessionEvent::Reveal(RevealReason::TimeUp), DeviceRole::Host, &bank).is_err());
    }
}
