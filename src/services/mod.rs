/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Per-session driver task: snapshots in, host writes out.
pub mod session_driver;
/// Host operations on sessions.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events subscription service.
pub mod sse_service;
/// Session store connection supervisor.
pub mod storage_supervisor;
