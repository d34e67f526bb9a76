use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{PlayerEntity, SessionStatus},
    dto::format_system_time,
    services::scoring::PointsBreakdown,
};

/// Screen the rendering layer should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// No session yet: create or join form.
    Setup,
    /// Waiting for players; the host can start.
    Lobby,
    /// Round title before its first question.
    Intro,
    /// Question open for answers.
    Question,
    /// Correct answer and points of the question.
    Reveal,
    /// Standings after a question.
    Leaderboard,
}

impl From<SessionStatus> for Stage {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Lobby => Stage::Lobby,
            SessionStatus::Intro => Stage::Intro,
            SessionStatus::Question => Stage::Question,
            SessionStatus::Reveal => Stage::Reveal,
            SessionStatus::Leaderboard => Stage::Leaderboard,
        }
    }
}

/// Props handed to the rendering layer; rebuilt whenever the mirror or the clock moves.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuizView {
    /// Screen to render.
    pub stage: Stage,
    /// The shared store is unreachable; commands will fail.
    pub degraded: bool,
    /// Code other devices join with.
    pub game_code: Option<String>,
    /// Session this device is in.
    pub session_id: Option<Uuid>,
    /// Player this device acts as.
    pub player_id: Option<Uuid>,
    /// This device drives the session.
    pub is_host: bool,
    /// Players in join order.
    pub players: Vec<PlayerView>,
    /// Round being played.
    pub round: Option<RoundView>,
    /// Question being asked or revealed.
    pub question: Option<QuestionView>,
    /// Countdown while the question is open.
    pub countdown: Option<CountdownView>,
    /// Players with an answer for the current question.
    pub answered: Vec<Uuid>,
    /// Players still expected to answer.
    pub waiting: Vec<Uuid>,
    /// This device's answer to the current question.
    pub my_answer: Option<String>,
    /// Answer input is locked for the current question.
    pub has_answered: bool,
    /// Points of the current question, highest first.
    pub breakdown: Vec<PointsView>,
    /// Players by cumulative score.
    pub standings: Vec<PlayerView>,
    /// Last question of the last round.
    pub is_final: bool,
}

impl QuizView {
    /// View of a device outside any session.
    pub fn setup(degraded: bool) -> Self {
        Self {
            stage: Stage::Setup,
            degraded,
            game_code: None,
            session_id: None,
            player_id: None,
            is_host: false,
            players: Vec::new(),
            round: None,
            question: None,
            countdown: None,
            answered: Vec::new(),
            waiting: Vec::new(),
            my_answer: None,
            has_answered: false,
            breakdown: Vec::new(),
            standings: Vec::new(),
            is_final: false,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Player as shown in lists and standings.
pub struct PlayerView {
    /// Player row id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Cumulative score.
    pub score: u32,
    /// Created the session.
    pub is_host: bool,
    /// Picture taken when joining.
    pub selfie_url: Option<String>,
    /// RFC 3339 join time.
    pub joined_at: String,
}

impl From<&PlayerEntity> for PlayerView {
    fn from(player: &PlayerEntity) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            score: player.score,
            is_host: player.is_host,
            selfie_url: player.selfie_url.clone(),
            joined_at: format_system_time(player.created_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Current round header.
pub struct RoundView {
    /// 1-based round number.
    pub number: u32,
    /// Number of rounds in the game.
    pub total_rounds: u32,
    /// Round title.
    pub title: String,
    /// Shown on the intro screen.
    pub description: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Current question. Options are withheld until the options delay elapsed.
pub struct QuestionView {
    /// `"{round}-{index}"` key answers are stored under.
    pub key: String,
    /// 1-based position inside the round.
    pub number: u32,
    /// Number of questions in the round.
    pub total: u32,
    /// Question text.
    pub prompt: String,
    /// Choices, for multiple-choice questions.
    pub options: Option<Vec<String>>,
    /// Audio asset played with the question.
    pub audio: Option<String>,
    /// Picture shown with the question.
    pub image: Option<String>,
    /// Only once the question is revealed.
    pub correct: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
/// Local countdown of the current question.
pub struct CountdownView {
    /// Options delay elapsed.
    pub options_visible: bool,
    /// Whole seconds left.
    pub time_remaining: u32,
    /// Question duration in seconds.
    pub total: u32,
    /// Blur radius in pixels, picture questions only.
    pub blur_px: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
/// Points one player earned on the current question.
pub struct PointsView {
    /// Player who answered.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Submitted answer.
    pub answer: String,
    /// Answer matches the correct one.
    pub correct: bool,
    /// Points for a correct answer.
    pub base: u32,
    /// Speed bonus.
    pub bonus: u32,
    /// Base plus bonus.
    pub total: u32,
}

impl PointsView {
    /// Attach the player's display name to a breakdown line.
    pub fn new(points: PointsBreakdown, name: String) -> Self {
        Self {
            player_id: points.player_id,
            name,
            answer: points.answer,
            correct: points.correct,
            base: points.base,
            bonus: points.bonus,
            total: points.total,
        }
    }
}
