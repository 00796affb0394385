//! Paperjet - ephemeral document transformation service.
//!
//! Each request gets an isolated workspace directory, uploads are written
//! into it under sanitized names, a named external tool transforms them,
//! and the result stays downloadable until a background reaper deletes the
//! whole workspace after the retention window. Nothing is stored durably.

pub mod bundle;
pub mod config;
pub mod error;
pub mod http_server;
pub mod ingress;
pub mod reaper;
pub mod runner;
pub mod state;
pub mod workspace;
