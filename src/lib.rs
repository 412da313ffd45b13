//! Real-time room broadcast hub with simulated AI token streaming.

pub mod ai;
pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod store;
