//! biblio: sync core of an e-book reading hub.
//!
//! This crate embeds a small WebDAV server so reading apps can push their
//! progress files to local storage, polls storage for books and progress
//! files, and reconciles reading progress into a SQLite catalog.
//!
//! # Features
//!
//! - WebDAV subset: GET, PUT, DELETE, MKCOL, PROPFIND
//! - Request paths confined to the served root
//! - Change signal published after every request
//! - Storage walks that skip hidden, system and `.nomedia` directories
//! - Adaptive polling: long sleep after success, short retry after failure
//! - Moon+ Reader progress reconciliation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration and CLI.
pub mod config;
/// Database operations.
pub mod db;
/// Error types.
pub mod error;
/// Book catalog updates.
pub mod library;
/// WebDAV multistatus generation.
pub mod multistatus;
/// Reading-progress reconciliation.
pub mod progress;
/// Publication metadata.
pub mod publication;
/// Storage walks and polling.
pub mod scanner;
/// WebDAV server.
pub mod server;
/// Latest-value channels.
pub mod signal;

#[cfg(test)]
mod tests;

pub use config::{Cli, Command, Config};
pub use db::Database;
pub use error::{AppError, Result};
pub use server::DavState;
