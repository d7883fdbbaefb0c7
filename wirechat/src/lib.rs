//! `WireChat` — real-time chat client library.

pub mod client;
pub mod config;
pub mod persist;
pub mod presence;
pub mod rest;
pub mod session;
pub mod socket;
pub mod store;
pub mod transport;
