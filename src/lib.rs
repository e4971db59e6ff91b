//! Client library for the Twigga platform: browser-based login,
//! project and bucket management, and static-site deploys.
//!
//! The binary in `main.rs` is a thin wrapper around [`cli::run`].

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod id;
pub mod release;
