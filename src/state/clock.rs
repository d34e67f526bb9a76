//! Per-device question countdown, computed from the time elapsed since the device saw the
//! session enter `question`. No ticks are exchanged between devices.

use std::time::Duration;

use crate::{config::QuizTimings, state::question_bank::QuestionKind};

/// Blur radius of a picture question when its countdown starts.
pub const MAX_BLUR_PX: f32 = 7.0;

/// Countdown of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionClock {
    options_delay: Duration,
    duration: Duration,
}

impl QuestionClock {
    /// Clock for a question of `kind`; audio questions get the longer countdown.
    pub fn new(timings: &QuizTimings, kind: QuestionKind) -> Self {
        let duration = match kind {
            QuestionKind::Audio => timings.audio_question_duration,
            QuestionKind::Text | QuestionKind::Picture => timings.question_duration,
        };
        Self {
            options_delay: timings.options_delay,
            duration,
        }
    }

    /// Full countdown in whole seconds.
    pub fn total_secs(&self) -> u32 {
        u32::try_from(self.duration.as_secs()).unwrap_or(u32::MAX)
    }

    /// Options (and the countdown) appear after the fixed options delay.
    pub fn options_visible(&self, elapsed: Duration) -> bool {
        elapsed >= self.options_delay
    }

    /// Whole seconds left; the full countdown until options are shown, then one less per second.
    pub fn time_remaining(&self, elapsed: Duration) -> u32 {
        let running = elapsed.saturating_sub(self.options_delay);
        let spent = u32::try_from(running.as_secs()).unwrap_or(u32::MAX);
        self.total_secs().saturating_sub(spent)
    }

    /// The countdown reached zero.
    pub fn expired(&self, elapsed: Duration) -> bool {
        self.options_visible(elapsed) && self.time_remaining(elapsed) == 0
    }

    /// Time from `elapsed` until the countdown reaches zero.
    pub fn until_expiry(&self, elapsed: Duration) -> Duration {
        (self.options_delay + self.duration).saturating_sub(elapsed)
    }

    /// Blur radius of a picture question, shrinking linearly to zero with the countdown.
    pub fn blur_px(&self, elapsed: Duration) -> f32 {
        let total = self.total_secs().max(1) as f32;
        (self.time_remaining(elapsed) as f32 / total * MAX_BLUR_PX).max(0.0)
    }
}
