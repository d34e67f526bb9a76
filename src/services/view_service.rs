//! Projection of the live mirror, the question bank and the local clock into [`QuizView`] props.

use uuid::Uuid;

use crate::{
    config::QuizTimings,
    dao::models::SessionStatus,
    dto::view::{CountdownView, PlayerView, PointsView, QuestionView, QuizView, RoundView, Stage},
    services::scoring::question_breakdown,
    state::{
        SharedState, clock::QuestionClock, mirror::SessionMirror, question_bank::QuestionBank,
        question_bank::QuestionKind,
    },
};

/// Who is looking at the mirror.
#[derive(Debug, Clone)]
pub struct Viewer {
    /// Player owned by the viewing device.
    pub player_id: Uuid,
    /// Code shown in the lobby.
    pub game_code: String,
    /// Host controls are rendered.
    pub is_host: bool,
    /// Answer input is locked locally for the current question.
    pub answer_locked: bool,
}

/// Current props of this device.
pub async fn current_view(state: &SharedState) -> QuizView {
    let degraded = state.is_degraded();
    let Some(active) = state.active().await else {
        return QuizView::setup(degraded);
    };
    let mirror = active.mirror();
    let answer_locked = mirror
        .cursor()
        .and_then(|cursor| cursor.question_key())
        .is_some_and(|key| active.is_answer_locked(mirror.generation(), &key));
    let viewer = Viewer {
        player_id: active.player_id(),
        game_code: active.game_code().to_owned(),
        is_host: active.is_host(),
        answer_locked,
    };
    project(&mirror, &viewer, state.bank(), &state.config().timings, degraded)
}

/// Build the props for `viewer` from a mirror.
pub fn project(
    mirror: &SessionMirror,
    viewer: &Viewer,
    bank: &QuestionBank,
    timings: &QuizTimings,
    degraded: bool,
) -> QuizView {
    let mut view = QuizView::setup(degraded);
    view.session_id = Some(mirror.session_id());
    view.player_id = Some(viewer.player_id);
    view.game_code = Some(viewer.game_code.clone());
    view.is_host = viewer.is_host;

    let Some(cursor) = mirror.cursor() else {
        return view;
    };
    view.stage = Stage::from(cursor.status);
    view.players = mirror.players().map(PlayerView::from).collect();

    if let Some(round) = bank.round(cursor.current_round) {
        view.round = Some(RoundView {
            number: cursor.current_round,
            total_rounds: bank.round_count(),
            title: round.title.clone(),
            description: round.description.clone(),
        });
    }

    let shows_question = matches!(
        cursor.status,
        SessionStatus::Question | SessionStatus::Reveal | SessionStatus::Leaderboard
    );
    let (Some(key), Some(question), true) =
        (cursor.question_key(), bank.question_at(&cursor), shows_question)
    else {
        return view;
    };
    let revealed = cursor.status != SessionStatus::Question;
    let elapsed = mirror.cursor_elapsed();
    let clock = QuestionClock::new(timings, question.kind());
    let options_visible = revealed || clock.options_visible(elapsed);
    let question_total = bank
        .round(cursor.current_round)
        .map_or(0, |round| round.questions.len());

    view.question = Some(QuestionView {
        key: key.to_string(),
        number: u32::try_from(cursor.current_question_index + 1).unwrap_or_default(),
        total: u32::try_from(question_total).unwrap_or(u32::MAX),
        prompt: question.prompt.clone(),
        options: options_visible.then(|| question.options.clone()),
        audio: question.audio.clone(),
        image: question.image.clone(),
        correct: revealed.then(|| question.correct.clone()),
    });

    if cursor.status == SessionStatus::Question {
        view.countdown = Some(CountdownView {
            options_visible,
            time_remaining: clock.time_remaining(elapsed),
            total: clock.total_secs(),
            blur_px: (question.kind() == QuestionKind::Picture).then(|| clock.blur_px(elapsed)),
        });
    }

    let (answered, waiting): (Vec<Uuid>, Vec<Uuid>) = mirror
        .players()
        .map(|player| player.id)
        .partition(|id| mirror.has_answered(*id, &key));
    view.answered = answered;
    view.waiting = waiting;
    view.my_answer = mirror
        .answers_for(&key)
        .find(|answer| answer.player_id == viewer.player_id)
        .map(|answer| answer.answer.clone());
    view.has_answered = viewer.answer_locked || view.my_answer.is_some();

    if revealed {
        view.breakdown = question_breakdown(question, mirror.answers(), &key)
            .into_iter()
            .map(|points| {
                let name = mirror
                    .player(points.player_id)
                    .map(|player| player.name.clone())
                    .unwrap_or_default();
                PointsView::new(points, name)
            })
            .collect();
    }

    if cursor.status == SessionStatus::Leaderboard {
        view.standings = mirror.standings().into_iter().map(PlayerView::from).collect();
        view.is_final = bank.is_final(&cursor);
    }

    view
}
