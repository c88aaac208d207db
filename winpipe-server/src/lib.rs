//! # winpipe-server: window streaming server
//!
//! Captures windows from the configured sources, encodes their damage
//! and streams `draw` packets to every connected client, pacing each
//! window by the client's acks.
//!
//! ## Modules
//!
//! - **config**: TOML configuration and its conversion into core stream settings
//! - **service**: TCP accept loop, `hello` negotiation and per-client sessions

pub mod config;
pub mod service;
