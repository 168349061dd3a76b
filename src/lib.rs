//! # avatar-relay
//!
//! Real-time WebSocket relay. Each client sends JSON state updates (avatar
//! expression, head rotation, …) and the server forwards every update,
//! unchanged, to all other connected clients.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket, HTTP)
//!     │
//!     ├── WS Handler + origin check (ws/)
//!     ├── Health / OpenAPI (api/)
//!     │
//!     ├── per-connection read loop ──► ConnectionRegistry::broadcast
//!     └── per-connection writer task ◄── outbound queue
//! ```
//!
//! There is no persistence: the registry lives in memory and starts empty.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod server;
pub mod ws;
