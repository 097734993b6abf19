//! Permissions service library crate.
//!
//! # Purpose
//! Grants, revokes, lists and checks module/action permissions per API key,
//! served as request/reply subjects on a message bus. A relational store is the
//! source of truth; a per-identity cache answers reads.
//!
//! # Notes
//! The binary only loads configuration and calls [`app::run_with_shutdown`];
//! everything else lives here so integration tests can assemble the stack.
pub mod app;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod selftest;
pub mod store;
