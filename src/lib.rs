//! Library crate for party-quiz, exposing modules for binaries and integration tests.

pub mod config;
/// Persistence: device identity and the shared session store.
pub mod dao;
/// Request and response payloads.
pub mod dto;
/// HTTP-facing error type.
pub mod error;
/// HTTP routes of the device API.
pub mod routes;
/// Operations behind the routes and background tasks.
pub mod services;
/// Per-device state and the session mirror.
pub mod state;
