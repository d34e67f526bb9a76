//! Device commands: everything a player or the host can do from the rendering layer.
//!
//! Every command goes through the shared store first and only then touches local state, with
//! one exception: answer input is locked before the answer is written.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    dao::models::{NewAnswer, PlayerEntity, SessionEntity, SessionStatus},
    dto::view::QuizView,
    error::ServiceError,
    services::{
        host_duties,
        session_repository::{SessionRepository, TransitionOutcome},
        sse_events,
        sync_client::SyncClient,
        view_service::current_view,
    },
    state::{
        ActiveSession, SharedState,
        clock::QuestionClock,
        state_machine::{self, DeviceRole, Plan, RevealReason, SessionEvent},
    },
};

/// What a host transition did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTransition {
    /// The plan was written by this device.
    Applied(Plan),
    /// The event is legal but changes nothing (continue on the final leaderboard).
    Unchanged,
    /// Another writer moved the session first.
    Superseded,
}

/// Create a session hosted by this device and make it the active session.
pub async fn create_session(
    state: &SharedState,
    name: &str,
    code: Option<&str>,
) -> Result<QuizView, ServiceError> {
    let repository = state.repository().await?;
    let (session, host) = repository.create_session(name, code).await?;
    activate(state, repository, &session, &host).await?;
    Ok(current_view(state).await)
}

/// Join an existing session by its game code.
pub async fn join_by_code(
    state: &SharedState,
    name: &str,
    code: &str,
) -> Result<QuizView, ServiceError> {
    let repository = state.repository().await?;
    let (session, player) = repository.join_by_code(name, code).await?;
    activate(state, repository, &session, &player).await?;
    Ok(current_view(state).await)
}

/// Re-enter the session recorded in the local identity.
///
/// A stale identity (session gone, or player not part of it) is cleared silently and `None` is
/// returned. Store failures are returned and leave the identity in place.
pub async fn resume(state: &SharedState) -> Result<Option<QuizView>, ServiceError> {
    let Some(identity) = state.identity().load() else {
        debug!("no device identity to resume");
        return Ok(None);
    };
    let repository = state.repository().await?;
    let (session, player) = tokio::try_join!(
        repository.get_session(identity.session_id),
        repository.find_player(identity.player_id),
    )?;

    match (session, player) {
        (Some(session), Some(player)) if player.game_session_id == session.id => {
            activate(state, repository, &session, &player).await?;
            info!(
                session_id = %session.id,
                player_id = %player.id,
                is_host = player.is_host,
                "resumed session"
            );
            Ok(Some(current_view(state).await))
        }
        _ => {
            info!(
                session_id = %identity.session_id,
                player_id = %identity.player_id,
                "stored identity no longer matches a session; clearing it"
            );
            if let Err(err) = state.identity().clear() {
                warn!(error = %err, "failed to clear device identity");
            }
            Ok(None)
        }
    }
}

/// Leave the active session on this device. The player row stays in the store.
pub async fn leave_session(state: &SharedState) -> Result<QuizView, ServiceError> {
    if let Some(previous) = state.replace_active(None).await {
        info!(
            session_id = %previous.session_id(),
            player_id = %previous.player_id(),
            "left session"
        );
    }
    if let Err(err) = state.identity().clear() {
        warn!(error = %err, "failed to clear device identity");
    }
    sse_events::broadcast_view(state).await;
    Ok(current_view(state).await)
}

/// Host: leave the lobby and show the first intro card.
pub async fn start_game(state: &SharedState) -> Result<QuizView, ServiceError> {
    host_command(state, SessionEvent::StartGame).await
}

/// Host: close the current question before everyone answered.
pub async fn reveal(state: &SharedState) -> Result<QuizView, ServiceError> {
    host_command(state, SessionEvent::Reveal(RevealReason::Manual)).await
}

/// Host: move on from the intro card, the reveal or the leaderboard.
pub async fn continue_game(state: &SharedState) -> Result<QuizView, ServiceError> {
    host_command(state, SessionEvent::Continue).await
}

/// Host: restart a finished game with the same players.
pub async fn play_again(state: &SharedState) -> Result<QuizView, ServiceError> {
    host_command(state, SessionEvent::PlayAgain).await
}

/// Submit this device's answer to the open question.
///
/// Input for the question key is locked before the write and stays locked if the write fails.
pub async fn submit_answer(state: &SharedState, answer: &str) -> Result<QuizView, ServiceError> {
    let active = state.require_active().await?;
    let repository = state.repository().await?;
    let mirror = active.mirror();

    let cursor = mirror
        .cursor()
        .filter(|cursor| cursor.status == SessionStatus::Question)
        .ok_or_else(|| ServiceError::InvalidState("no question is open".into()))?;
    let (Some(key), Some(question)) = (cursor.question_key(), state.bank().question_at(&cursor))
    else {
        return Err(ServiceError::InvalidState("no question is open".into()));
    };
    if !question.options.iter().any(|option| option == answer) {
        return Err(ServiceError::InvalidInput(format!(
            "`{answer}` is not one of the options"
        )));
    }

    let clock = QuestionClock::new(&state.config().timings, question.kind());
    let elapsed = mirror.cursor_elapsed();
    if !clock.options_visible(elapsed) {
        return Err(ServiceError::InvalidState("options are not shown yet".into()));
    }
    if clock.expired(elapsed) {
        return Err(ServiceError::InvalidState("time is up".into()));
    }
    if mirror.has_answered(active.player_id(), &key)
        || !active.lock_answer(mirror.generation(), &key)
    {
        return Err(ServiceError::Duplicate(format!(
            "already answered question `{key}`"
        )));
    }

    let time_remaining = clock.time_remaining(elapsed);
    repository
        .insert_answer(NewAnswer {
            game_session_id: active.session_id(),
            player_id: active.player_id(),
            question_key: key.clone(),
            answer: answer.to_owned(),
            time_remaining,
        })
        .await
        .inspect_err(|err| {
            warn!(
                session_id = %active.session_id(),
                question_key = %key,
                error = %err,
                "answer not stored; input stays locked"
            )
        })?;

    info!(
        session_id = %active.session_id(),
        player_id = %active.player_id(),
        question_key = %key,
        time_remaining,
        "answer submitted"
    );
    active.sync().refresh().await;
    Ok(current_view(state).await)
}

/// Plan and write one host transition for the active session.
///
/// Authorization comes from the player row re-read from the store. The write is conditional on
/// the cursor the plan was made from; only the device whose reveal was applied scores it.
pub async fn run_host_transition(
    state: &SharedState,
    active: &ActiveSession,
    event: SessionEvent,
) -> Result<HostTransition, ServiceError> {
    let repository = state.repository().await?;
    let _gate = state.transition_gate().await;
    let session_id = active.session_id();

    let player = repository
        .find_player(active.player_id())
        .await?
        .filter(|player| player.game_session_id == session_id)
        .ok_or_else(|| ServiceError::NotFound("player is no longer part of the session".into()))?;
    let session = repository
        .get_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;

    let plan = state_machine::plan(
        session.cursor(),
        event,
        DeviceRole::from_is_host(player.is_host),
        state.bank(),
    )?;
    if plan.is_noop() {
        debug!(%session_id, %event, "transition changes nothing");
        return Ok(HostTransition::Unchanged);
    }

    let outcome = match event {
        SessionEvent::PlayAgain => repository.reset_session(session_id, Some(plan.from)).await?,
        _ => repository.transition(session_id, &plan).await?,
    };

    let result = match outcome {
        TransitionOutcome::Applied(_) => {
            info!(
                %session_id,
                %event,
                from = %plan.from.status,
                to = %plan.to.status,
                round = plan.to.current_round,
                question_index = plan.to.current_question_index,
                "session transition applied"
            );
            if plan.enters_reveal() {
                score_reveal(state, active, &repository, &plan).await;
            }
            if event == SessionEvent::PlayAgain {
                active.scorer().lock().await.clear();
                active.clear_answer_locks();
            }
            HostTransition::Applied(plan)
        }
        TransitionOutcome::Superseded(current) => {
            info!(
                %session_id,
                %event,
                planned_from = %plan.from.status,
                current = ?current.map(|session| session.cursor()),
                "session moved concurrently; transition dropped"
            );
            HostTransition::Superseded
        }
    };

    active.sync().refresh().await;
    Ok(result)
}

async fn score_reveal(
    state: &SharedState,
    active: &ActiveSession,
    repository: &SessionRepository,
    plan: &Plan,
) {
    let mut scorer = active.scorer().lock().await;
    if let Err(err) = scorer
        .score_question(repository, active.session_id(), plan.to, state.bank())
        .await
    {
        warn!(
            session_id = %active.session_id(),
            error = %err,
            "scoring pass failed; question stays unscored"
        );
    }
}

async fn host_command(state: &SharedState, event: SessionEvent) -> Result<QuizView, ServiceError> {
    let active = state.require_active().await?;
    run_host_transition(state, &active, event).await?;
    Ok(current_view(state).await)
}

/// Start syncing `session` as `player`, persist the identity and replace the active session.
async fn activate(
    state: &SharedState,
    repository: SessionRepository,
    session: &SessionEntity,
    player: &PlayerEntity,
) -> Result<(), ServiceError> {
    let sync = SyncClient::start(repository, session.id, state.config().poll_interval).await?;
    let active = Arc::new(ActiveSession::new(
        player.id,
        session.game_code.clone(),
        player.is_host,
        sync,
    ));

    if let Err(err) = state.identity().save(active.identity()) {
        warn!(error = %err, "failed to persist device identity; resume will not work");
    }

    let weak = Arc::downgrade(&active);
    if active.is_host() {
        active.attach_task(host_duties::spawn(state.clone(), weak.clone()));
    }
    active.attach_task(spawn_reset_watcher(weak.clone()));
    active.attach_task(sse_events::spawn_view_forwarder(state.clone(), weak));

    if let Some(previous) = state.replace_active(Some(active)).await {
        info!(session_id = %previous.session_id(), "replaced previous session");
    }
    sse_events::broadcast_view(state).await;
    Ok(())
}

/// Drop answer locks and the scoring marker whenever the mirror sees the game restart.
fn spawn_reset_watcher(active: Weak<ActiveSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut updates) = active.upgrade().map(|active| active.sync().subscribe()) else {
            return;
        };
        let mut generation = updates.borrow().generation();
        while updates.changed().await.is_ok() {
            let current = updates.borrow_and_update().generation();
            if current == generation {
                continue;
            }
            generation = current;
            let Some(active) = active.upgrade() else {
                break;
            };
            active.clear_answer_locks();
            active.scorer().lock().await.clear();
            debug!(session_id = %active.session_id(), generation, "game restarted; local guards cleared");
        }
    })
}
