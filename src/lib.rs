// ABOUTME: Library root for jailwarden - exposes public types for testing.
// ABOUTME: The main binary is in main.rs.

pub mod accessories;
pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod jail;
pub mod output;
pub mod pipeline;
pub mod proxy;
pub mod release;
pub mod secrets;
pub mod ssh;
pub mod types;
