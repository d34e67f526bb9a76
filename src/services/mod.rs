/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Host-only timers that advance the session.
pub mod host_duties;
/// Device commands issued by the rendering layer.
pub mod quiz_service;
/// Scoring of revealed questions.
pub mod scoring;
/// Typed session operations over the shared store.
pub mod session_repository;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Session store connection supervisor and degraded mode.
pub mod storage_supervisor;
/// Change feed and polling loops keeping the local mirror current.
pub mod sync_client;
/// Projection of the mirror into view props.
pub mod view_service;
