use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Gameplay command payloads.
pub mod game;
/// Health check payloads.
pub mod health;
/// Session creation and join payloads.
pub mod session;
/// Server-Sent Events payloads.
pub mod sse;
pub mod validation;
/// Props rendered by a device.
pub mod view;

fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
