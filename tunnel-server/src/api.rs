//! API module for the tunnel server.
//!
//! One submodule per surface the server exposes:
//!
//! - [`errors`] – close-frame and HTTP error conversions.
//! - [`health`] – health and Prometheus endpoints (`/health`, `/metrics`).
//! - [`kiosks`] – read-only registry introspection (`/api/*`).
//! - [`send`] – the HTTP entry point for tunnelled calls (`/send`).
//! - [`ws`] – the kiosk WebSocket upgrade endpoint (`/ws`).

pub(crate) mod errors;
pub(crate) mod health;
pub(crate) mod kiosks;
pub(crate) mod send;
pub(crate) mod ws;
