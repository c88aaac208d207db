//! # winpipe-client: window streaming client
//!
//! Connects to a `winpipe-server`, announces what it can decode, then
//! resequences, decodes and paints every `draw` it receives and
//! acknowledges each one so the server can pace its windows.
//!
//! Windows are kept headless. Their final contents can be written out
//! as PNG files when they close.

pub mod config;
pub mod connection;
pub mod display;
pub mod session;
