//! Daemon surface: shared state and the observability router.
//!
//! The HTTP CRUD API for pairs/conflicts/history lives in an external
//! collaborator; this process only exposes health and status.

pub mod routes;
pub mod state;
