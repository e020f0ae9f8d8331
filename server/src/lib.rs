//! Parla Server
//!
//! Backend for a consumer voice-chat product: persistent topic rooms plus
//! an ephemeral random-call feature that pairs strangers for one-on-one
//! voice calls. This crate contains the random-call matching and session
//! coordination engine and the thin real-time transport around it.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod history;
pub mod housekeeping;
pub mod matchmaking;
pub mod signaling;
pub mod store;
pub mod ws;
