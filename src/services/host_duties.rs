//! Host-only automation: the intro timer, the all-answered reveal and the countdown-expiry reveal.
//!
//! Runs only on the host device. Every firing goes through the same conditional transition as a
//! manual command, so a late or duplicated firing is dropped by the store.

use std::{
    sync::Weak,
    time::{Duration, Instant},
};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

use crate::{
    config::QuizTimings,
    dao::models::{QuestionKey, SessionCursor, SessionStatus},
    services::quiz_service::{self, HostTransition},
    state::{
        ActiveSession, SharedState,
        clock::QuestionClock,
        mirror::SessionMirror,
        question_bank::QuestionBank,
        state_machine::{RevealReason, SessionEvent},
    },
};

const TICK: Duration = Duration::from_millis(100);
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Timer bookkeeping of the host automation.
#[derive(Debug, Default)]
pub struct HostDuties {
    generation: u64,
    all_answered_since: Option<(QuestionKey, Instant)>,
    attempted: Option<(SessionCursor, SessionEvent)>,
    retry_at: Option<Instant>,
}

impl HostDuties {
    /// Event the host should fire now, if any.
    ///
    /// The same event is offered at most once per cursor unless [`HostDuties::failed`] was called.
    pub fn due(
        &mut self,
        mirror: &SessionMirror,
        timings: &QuizTimings,
        bank: &QuestionBank,
        now: Instant,
    ) -> Option<SessionEvent> {
        // A restarted game revisits the same cursors; nothing from the previous game applies.
        if mirror.generation() != self.generation {
            *self = Self {
                generation: mirror.generation(),
                ..Self::default()
            };
        }
        if self.retry_at.is_some_and(|at| now < at) {
            return None;
        }
        let cursor = mirror.cursor()?;
        let event = self.pending_event(cursor, mirror, timings, bank, now)?;
        if self.attempted == Some((cursor, event)) {
            return None;
        }
        self.attempted = Some((cursor, event));
        self.retry_at = None;
        Some(event)
    }

    /// The last offered event failed; offer it again after a short delay.
    pub fn failed(&mut self, now: Instant) {
        self.attempted = None;
        self.retry_at = Some(now + RETRY_DELAY);
    }

    fn pending_event(
        &mut self,
        cursor: SessionCursor,
        mirror: &SessionMirror,
        timings: &QuizTimings,
        bank: &QuestionBank,
        now: Instant,
    ) -> Option<SessionEvent> {
        let elapsed = mirror.cursor_elapsed();
        match cursor.status {
            SessionStatus::Intro if elapsed >= timings.intro_delay => Some(SessionEvent::IntroElapsed),
            SessionStatus::Question => {
                let key = cursor.question_key()?;
                let question = bank.question_at(&cursor)?;

                if mirror.all_answered(&key) {
                    let since = match &self.all_answered_since {
                        Some((seen, since)) if *seen == key => *since,
                        _ => {
                            self.all_answered_since = Some((key.clone(), now));
                            now
                        }
                    };
                    if now.duration_since(since) >= timings.all_answered_delay {
                        return Some(SessionEvent::Reveal(RevealReason::AllAnswered));
                    }
                } else {
                    self.all_answered_since = None;
                }

                let clock = QuestionClock::new(timings, question.kind());
                clock
                    .until_expiry(elapsed.saturating_sub(timings.expiry_grace))
                    .is_zero()
                    .then_some(SessionEvent::Reveal(RevealReason::TimeUp))
            }
            _ => None,
        }
    }
}

/// Run the host automation for `active` until it is released.
pub fn spawn(state: SharedState, active: Weak<ActiveSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let Some(mut updates) = active.upgrade().map(|active| active.sync().subscribe()) else {
            return;
        };
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut duties = HostDuties::default();

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
            }

            let due = {
                let mirror = updates.borrow_and_update();
                duties.due(&mirror, &state.config().timings, state.bank(), Instant::now())
            };
            let Some(event) = due else {
                continue;
            };
            let Some(active) = active.upgrade() else {
                break;
            };

            match quiz_service::run_host_transition(&state, &active, event).await {
                Ok(HostTransition::Applied(plan)) => {
                    debug!(session_id = %active.session_id(), %event, to = %plan.to.status, "host automation fired")
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(session_id = %active.session_id(), %event, error = %err, "host automation failed");
                    duties.failed(Instant::now());
                }
            }
        }
    })
}
