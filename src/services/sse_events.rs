use std::{sync::Weak, time::Duration};

use serde::Serialize;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

use crate::{
    dto::sse::{Handshake, ServerEvent, SystemStatus},
    services::view_service::current_view,
    state::{ActiveSession, SharedState},
};

const EVENT_VIEW: &str = "view";
const EVENT_SYSTEM_STATUS: &str = "system.status";
const EVENT_HANDSHAKE: &str = "handshake";
/// Countdown granularity of the view.
const VIEW_TICK: Duration = Duration::from_secs(1);

/// Broadcast the current view of this device.
pub async fn broadcast_view(state: &SharedState) {
    let view = current_view(state).await;
    send_view_event(state, EVENT_VIEW, &view);
}

/// Broadcast a degraded mode change.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_view_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

/// Events a new view subscriber receives before any broadcast.
pub async fn handshake_events(state: &SharedState) -> Vec<ServerEvent> {
    let handshake = Handshake {
        stream: "view".into(),
        message: "view stream connected".into(),
        degraded: state.is_degraded(),
    };
    let view = current_view(state).await;
    [
        ServerEvent::json(Some(EVENT_HANDSHAKE.to_string()), &handshake),
        ServerEvent::json(Some(EVENT_VIEW.to_string()), &view),
    ]
    .into_iter()
    .filter_map(|event| {
        event
            .inspect_err(|err| warn!(error = %err, "failed to serialize SSE handshake"))
            .ok()
    })
    .collect()
}

/// Push the view whenever the mirror changes or the countdown ticks, skipping identical views.
pub fn spawn_view_forwarder(state: SharedState, active: Weak<ActiveSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut updates) = active.upgrade().map(|active| active.sync().subscribe()) else {
            return;
        };
        let mut ticker = interval(VIEW_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = String::new();

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    updates.borrow_and_update();
                }
                _ = ticker.tick() => {}
            }
            if active.strong_count() == 0 {
                break;
            }

            let view = current_view(&state).await;
            match ServerEvent::json(Some(EVENT_VIEW.to_string()), &view) {
                Ok(event) if event.data != last => {
                    last.clone_from(&event.data);
                    state.view_sse().broadcast(event);
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to serialize view"),
            }
        }
        debug!("view forwarder stopped");
    })
}

/// Broadcast status and view whenever degraded mode flips.
pub fn spawn_status_forwarder(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut degraded = state.degraded_watcher();
        while degraded.changed().await.is_ok() {
            let value = *degraded.borrow_and_update();
            broadcast_system_status(&state, value);
            broadcast_view(&state).await;
        }
    })
}

fn send_view_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.view_sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize view SSE payload"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use tokio::{sync::broadcast, time::timeout};

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{identity::MemoryIdentityStore, session_store::memory::MemoryStore},
        services::quiz_service,
        state::{AppState, question_bank::QuestionBank},
    };

    const WAIT: Duration = Duration::from_secs(3);

    fn device() -> SharedState {
        AppState::new(
            AppConfig::default(),
            QuestionBank::builtin(),
            Arc::new(MemoryIdentityStore::default()),
        )
    }

    /// Next event named `name` whose payload satisfies `accept`.
    async fn next_event(
        events: &mut broadcast::Receiver<ServerEvent>,
        name: &str,
        accept: impl Fn(&Value) -> bool,
    ) -> Value {
        timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("view hub open");
                if event.event.as_deref() != Some(name) {
                    continue;
                }
                let payload: Value = serde_json::from_str(&event.data).expect("json payload");
                if accept(&payload) {
                    return payload;
                }
            }
        })
        .await
        .expect("event arrived")
    }

    fn player_count(view: &Value) -> usize {
        view["players"].as_array().map_or(0, Vec::len)
    }

    #[tokio::test]
    async fn view_follows_players_joining_on_other_devices() {
        let state = device();
        let store = MemoryStore::new();
        state.set_session_store(Arc::new(store.clone())).await;
        quiz_service::create_session(&state, "Host", Some("SSEV"))
            .await
            .unwrap();
        let mut events = state.view_sse().subscribe();

        let guest = device();
        guest.set_session_store(Arc::new(store)).await;
        quiz_service::join_by_code(&guest, "Guest", "ssev")
            .await
            .unwrap();

        let view = next_event(&mut events, EVENT_VIEW, |view| player_count(view) == 2).await;
        assert_eq!(view["stage"], "lobby");
        assert_eq!(view["game_code"], "SSEV");
    }

    #[tokio::test]
    async fn unchanged_view_is_not_sent_twice() {
        let state = device();
        state.set_session_store(Arc::new(MemoryStore::new())).await;
        quiz_service::create_session(&state, "Host", Some("SAME"))
            .await
            .unwrap();
        let mut events = state.view_sse().subscribe();

        // The forwarder's first tick may land after subscribing.
        let _ = timeout(Duration::from_millis(200), events.recv()).await;
        tokio::time::sleep(VIEW_TICK * 2).await;

        let mut repeated = 0;
        while let Ok(event) = events.try_recv() {
            if event.event.as_deref() == Some(EVENT_VIEW) {
                repeated += 1;
            }
        }
        assert_eq!(repeated, 0);
    }

    #[tokio::test]
    async fn degraded_flips_are_forwarded() {
        let state = device();
        let mut events = state.view_sse().subscribe();
        let forwarder = spawn_status_forwarder(state.clone());
        tokio::task::yield_now().await;

        state.set_session_store(Arc::new(MemoryStore::new())).await;
        let status = next_event(&mut events, EVENT_SYSTEM_STATUS, |_| true).await;
        assert_eq!(status["degraded"], false);
        let view = next_event(&mut events, EVENT_VIEW, |_| true).await;
        assert_eq!(view["degraded"], false);
        assert_eq!(view["stage"], "setup");

        state.clear_session_store().await;
        let status = next_event(&mut events, EVENT_SYSTEM_STATUS, |_| true).await;
        assert_eq!(status["degraded"], true);

        forwarder.abort();
    }
}
