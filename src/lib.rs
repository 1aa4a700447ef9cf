//! SystemX router core (spec §1-§9): address registry, call state machine,
//! wake-on-ring, heartbeat sweep, presence queries, and the federation relay.
//!
//! The binary in `main.rs` is the thin, out-of-scope collaborator layer (spec
//! §1): it wires an axum WebSocket upgrade as the concrete [`transport::Transport`]
//! and spawns the periodic tasks this library exposes hooks for. Everything
//! that actually enforces the router's invariants lives here and is exercised
//! directly by the integration tests in `tests/`.

pub mod config;
pub mod error;
pub mod federation;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;
pub mod wake_executor;
