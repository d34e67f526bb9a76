//! Several devices sharing one in-memory store, the way phones share the real backend.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;

use party_quiz::{
    config::{AppConfig, QuizTimings},
    dao::{
        identity::{DeviceIdentity, IdentityStore, MemoryIdentityStore},
        models::{
            AnswerEntity, AnswerInsert, NewAnswer, NewPlayer, NewSession, PlayerEntity,
            SessionCursor, SessionEntity, SessionPatch, SessionStatus,
        },
        session_store::{ChangeFeed, SessionStore, memory::MemoryStore},
        storage::StorageResult,
    },
    dto::view::{QuizView, Stage},
    error::ServiceError,
    services::quiz_service::{self, HostTransition},
    state::{
        AppState, SharedState,
        question_bank::QuestionBank,
        state_machine::{RevealReason, SessionEvent},
    },
};
use tokio::{sync::Notify, time::timeout};
use uuid::Uuid;

const CONVERGE: Duration = Duration::from_secs(3);

/// Timers long enough that only explicit commands move the session.
fn manual_config() -> AppConfig {
    AppConfig {
        timings: QuizTimings {
            intro_delay: Duration::from_secs(3600),
            options_delay: Duration::ZERO,
            all_answered_delay: Duration::from_secs(3600),
            ..QuizTimings::default()
        },
        poll_interval: Duration::from_millis(50),
        ..AppConfig::default()
    }
}

async fn device_with(store: &MemoryStore, identity: Arc<MemoryIdentityStore>) -> SharedState {
    let state = AppState::new(manual_config(), QuestionBank::builtin(), identity);
    state.set_session_store(Arc::new(store.clone())).await;
    state
}

async fn device(store: &MemoryStore) -> SharedState {
    device_with(store, Arc::new(MemoryIdentityStore::default())).await
}

/// Memory store whose answer inserts wait for [`HeldAnswers::release`] once they arrive.
#[derive(Clone)]
struct HeldAnswers {
    inner: MemoryStore,
    arrived: Arc<Notify>,
    release: Arc<Notify>,
}

impl HeldAnswers {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            arrived: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

impl SessionStore for HeldAnswers {
    fn insert_session(&self, session: NewSession) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        self.inner.insert_session(session)
    }
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session(id)
    }
    fn find_session_by_code(
        &self,
        game_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.find_session_by_code(game_code)
    }
    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
        expected: Option<SessionCursor>,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.inner.update_session(id, patch, expected)
    }
    fn insert_player(&self, player: NewPlayer) -> BoxFuture<'static, StorageResult<PlayerEntity>> {
        self.inner.insert_player(player)
    }
    fn find_player(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PlayerEntity>>> {
        self.inner.find_player(id)
    }
    fn list_players(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<PlayerEntity>>> {
        self.inner.list_players(session_id)
    }
    fn increment_score(&self, player_id: Uuid, points: u32) -> BoxFuture<'static, StorageResult<bool>> {
        self.inner.increment_score(player_id, points)
    }
    fn reset_scores(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.reset_scores(session_id)
    }
    fn insert_answer(&self, answer: NewAnswer) -> BoxFuture<'static, StorageResult<AnswerInsert>> {
        let held = self.clone();
        Box::pin(async move {
            held.arrived.notify_one();
            held.release.notified().await;
            held.inner.insert_answer(answer).await
        })
    }
    fn list_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        self.inner.list_answers(session_id)
    }
    fn delete_answers(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<u64>> {
        self.inner.delete_answers(session_id)
    }
    fn subscribe(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        self.inner.subscribe(session_id)
    }
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.try_reconnect()
    }
}

/// Wait until `state`'s mirror shows `status`.
async fn converge(state: &SharedState, status: SessionStatus) {
    let active = state.require_active().await.unwrap();
    let mut updates = active.sync().subscribe();
    timeout(
        CONVERGE,
        updates.wait_for(|mirror| mirror.cursor().map(|cursor| cursor.status) == Some(status)),
    )
    .await
    .expect("device converged")
    .unwrap();
}

/// Drive the host from `view` until the final leaderboard is shown.
async fn play_to_the_end(host: &SharedState, mut view: QuizView) -> QuizView {
    while !(view.stage == Stage::Leaderboard && view.is_final) {
        view = match view.stage {
            Stage::Question => quiz_service::reveal(host).await.unwrap(),
            _ => quiz_service::continue_game(host).await.unwrap(),
        };
    }
    view
}

#[tokio::test]
async fn join_finds_the_session_by_code() {
    let store = MemoryStore::new();
    let host = device(&store).await;
    let guest = device(&store).await;

    let created = quiz_service::create_session(&host, "Host", Some("PARTY")).await.unwrap();
    let joined = quiz_service::join_by_code(&guest, "Guest", " party ").await.unwrap();

    assert_eq!(joined.session_id, created.session_id);
    assert_eq!(joined.stage, Stage::Lobby);
    assert!(!joined.is_host);
    assert_eq!(joined.players.len(), 2);
}

#[tokio::test]
async fn unknown_code_leaves_the_guest_in_setup() {
    let store = MemoryStore::new();
    let host = device(&store).await;
    let guest = device(&store).await;
    quiz_service::create_session(&host, "Host", Some("PARTY")).await.unwrap();

    let err = quiz_service::join_by_code(&guest, "Guest", "NOPE").await.unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(guest.active().await.is_none());
    let session_id = host.require_active().await.unwrap().session_id();
    assert_eq!(store.list_players(session_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn polling_alone_keeps_guests_in_step() {
    let store = MemoryStore::new();
    store.set_feed_muted(true);
    let host = device(&store).await;
    let guest = device(&store).await;
    quiz_service::create_session(&host, "Host", Some("QUIET")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "QUIET").await.unwrap();

    quiz_service::start_game(&host).await.unwrap();

    converge(&guest, SessionStatus::Intro).await;
}

#[tokio::test]
async fn concurrent_reveals_apply_and_score_once() {
    let store = MemoryStore::new();
    let host_identity = Arc::new(MemoryIdentityStore::default());
    let host = device_with(&store, host_identity.clone()).await;
    let guest = device(&store).await;
    quiz_service::create_session(&host, "Host", Some("RACE")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "RACE").await.unwrap();
    quiz_service::start_game(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    converge(&guest, SessionStatus::Question).await;
    quiz_service::submit_answer(&guest, "7").await.unwrap();

    // A second device acting as the same host, e.g. a tablet next to the phone.
    let identity: DeviceIdentity = host_identity.load().unwrap();
    let twin = device_with(&store, Arc::new(MemoryIdentityStore::with_identity(identity))).await;
    quiz_service::resume(&twin).await.unwrap().unwrap();

    let host_active = host.require_active().await.unwrap();
    let twin_active = twin.require_active().await.unwrap();
    let reveal = SessionEvent::Reveal(RevealReason::Manual);
    let (first, second) = tokio::join!(
        quiz_service::run_host_transition(&host, &host_active, reveal),
        quiz_service::run_host_transition(&twin, &twin_active, reveal),
    );

    let applied = [&first, &second]
        .into_iter()
        .filter(|outcome| matches!(outcome, Ok(HostTransition::Applied(_))))
        .count();
    assert_eq!(applied, 1);

    let session_id = host_active.session_id();
    let answers = store.list_answers(session_id).await.unwrap();
    let players = store.list_players(session_id).await.unwrap();
    let guest_player = players.iter().find(|player| !player.is_host).unwrap();
    let host_player = players.iter().find(|player| player.is_host).unwrap();
    assert_eq!(guest_player.score, 10 + answers[0].time_remaining);
    assert_eq!(host_player.score, 0);
}

#[tokio::test]
async fn answer_landing_after_the_reveal_is_refused() {
    let store = MemoryStore::new();
    let held = HeldAnswers::new(store.clone());
    let host = device(&store).await;
    let guest = AppState::new(
        manual_config(),
        QuestionBank::builtin(),
        Arc::new(MemoryIdentityStore::default()),
    );
    guest.set_session_store(Arc::new(held.clone())).await;
    quiz_service::create_session(&host, "Host", Some("LATE")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "LATE").await.unwrap();
    quiz_service::start_game(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    converge(&guest, SessionStatus::Question).await;

    let submitting = guest.clone();
    let submission =
        tokio::spawn(async move { quiz_service::submit_answer(&submitting, "7").await });
    timeout(CONVERGE, held.arrived.notified())
        .await
        .expect("answer reached the store");

    // The host reveals and scores while the answer is still in flight.
    let revealed = quiz_service::reveal(&host).await.unwrap();
    held.release.notify_one();
    let late = submission.await.unwrap();

    assert!(matches!(late, Err(ServiceError::InvalidState(_))));
    let session_id = host.require_active().await.unwrap().session_id();
    assert!(store.list_answers(session_id).await.unwrap().is_empty());
    let players = store.list_players(session_id).await.unwrap();
    assert!(players.iter().all(|player| player.score == 0));
    assert_eq!(revealed.stage, Stage::Reveal);
    let shown: u32 = quiz_service::continue_game(&host)
        .await
        .unwrap()
        .breakdown
        .iter()
        .map(|points| points.total)
        .sum();
    assert_eq!(shown, 0);
}

#[tokio::test]
async fn duplicate_answer_keeps_the_first() {
    let store = MemoryStore::new();
    let host = device(&store).await;
    let guest_identity = Arc::new(MemoryIdentityStore::default());
    let guest = device_with(&store, guest_identity.clone()).await;
    quiz_service::create_session(&host, "Host", Some("TWICE")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "TWICE").await.unwrap();
    quiz_service::start_game(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    converge(&guest, SessionStatus::Question).await;

    // Two devices signed in as the same guest answer differently.
    let twin = device_with(
        &store,
        Arc::new(MemoryIdentityStore::with_identity(guest_identity.load().unwrap())),
    )
    .await;
    quiz_service::resume(&twin).await.unwrap().unwrap();

    quiz_service::submit_answer(&guest, "7").await.unwrap();
    let err = quiz_service::submit_answer(&twin, "5").await.unwrap_err();

    assert!(matches!(err, ServiceError::Duplicate(_)));
    let session_id = host.require_active().await.unwrap().session_id();
    let answers = store.list_answers(session_id).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].answer, "7");
}

#[tokio::test]
async fn play_again_resets_everything() {
    let store = MemoryStore::new();
    let host = device(&store).await;
    let guest = device(&store).await;
    quiz_service::create_session(&host, "Host", Some("AGAIN")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "AGAIN").await.unwrap();

    quiz_service::start_game(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    converge(&guest, SessionStatus::Question).await;
    quiz_service::submit_answer(&guest, "7").await.unwrap();
    quiz_service::reveal(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    let second_question = quiz_service::continue_game(&host).await.unwrap();
    assert_eq!(second_question.stage, Stage::Question);

    let err = quiz_service::play_again(&host).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));

    let last = play_to_the_end(&host, second_question).await;
    let guest_row = last.standings.iter().find(|player| !player.is_host).unwrap();
    assert!(guest_row.score > 0);

    let reset = quiz_service::play_again(&host).await.unwrap();
    assert_eq!(reset.stage, Stage::Lobby);

    let session_id = host.require_active().await.unwrap().session_id();
    let session = store.find_session(session_id).await.unwrap().unwrap();
    assert_eq!(
        (session.status, session.current_round, session.current_question_index),
        (SessionStatus::Lobby, 0, -1)
    );
    assert!(store.list_answers(session_id).await.unwrap().is_empty());
    assert!(
        store
            .list_players(session_id)
            .await
            .unwrap()
            .iter()
            .all(|player| player.score == 0)
    );

    // The guest can answer the first question again in the new game.
    converge(&guest, SessionStatus::Lobby).await;
    quiz_service::start_game(&host).await.unwrap();
    quiz_service::continue_game(&host).await.unwrap();
    converge(&guest, SessionStatus::Question).await;
    let view = quiz_service::submit_answer(&guest, "7").await.unwrap();
    assert_eq!(view.my_answer.as_deref(), Some("7"));
}

#[tokio::test]
async fn leaving_returns_to_setup() {
    let store = MemoryStore::new();
    let identity = Arc::new(MemoryIdentityStore::default());
    let guest = device_with(&store, identity.clone()).await;
    let host = device(&store).await;
    quiz_service::create_session(&host, "Host", Some("BYEBYE")).await.unwrap();
    quiz_service::join_by_code(&guest, "Guest", "BYEBYE").await.unwrap();
    assert!(identity.load().is_some());

    let view = quiz_service::leave_session(&guest).await.unwrap();

    assert_eq!(view.stage, Stage::Setup);
    assert!(view.session_id.is_none());
    assert!(guest.active().await.is_none());
    assert!(identity.load().is_none());
    let session_id = host.require_active().await.unwrap().session_id();
    assert_eq!(store.list_players(session_id).await.unwrap().len(), 2);
}
