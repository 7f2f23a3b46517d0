//! Shared types for the enclave radio daemon and its clients.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
