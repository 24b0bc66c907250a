//! # ssehub
//!
//! `ssehub` is an in-memory Server-Sent-Events transport: a broadcast hub that
//! fans records out to long-lived subscriber streams grouped by channel, and a
//! client that keeps a subscription alive across connection losses.
//!
//! ## Core Modules
//!
//! - `broker`: The broadcast hub. Stamps records with increasing ids, keeps a
//!   bounded replay history and delivers to subscribers without ever blocking
//!   on a slow one.
//! - `client`: The reconnection engine. Retries with capped exponential backoff
//!   and resumes from the last delivered id.
//! - `config`: Loads settings from files and `SSEHUB__*` environment variables.
//! - `transport`: Event-stream wire encoding, the incremental parser and the
//!   `axum` HTTP server.
//! - `utils`: Error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;
