//! The server's internal services.
//!
//! Everything below the HTTP/WebSocket surface lives here: connection
//! bookkeeping, reply correlation, credential checks and kiosk metadata.
//! The API layer composes these; none of them know about routes or
//! handlers.
//!
//! # Services overview
//!
//! - [`connection_manager`] – table of live kiosk sockets, duplicate policy
//!   and send-and-wait.
//! - [`correlation`] – single-shot completion slots keyed by request id.
//! - [`registry`] – persistent kiosk metadata and counters.
//! - [`status_sweeper`] – background reconciliation of registry status.
//! - [`token_verifier`] – bearer-credential verification.

pub mod connection_manager;
pub(crate) mod correlation;
pub mod registry;
pub(crate) mod status_sweeper;
pub mod token_verifier;
