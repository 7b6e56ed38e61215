//! The legacy operator API.
//!
//! Two TCP servers work in tandem: the command server (port 8001) speaks a
//! line-oriented request/response protocol with challenge-response
//! authentication, and the notify server (port 8002) pushes one-line event
//! change messages to clients that have tied their sessions together with
//! the NTIE command.

pub mod auth;
pub mod legacy;
pub mod notify;
pub mod server;

pub use server::{ApiShared, ZinoServer, API_PORT, NOTIFY_PORT};
