//! Feedmark - a multi-user feed aggregation service
//!
//! This crate polls pre-registered RSS/Atom feeds, persists new items
//! exactly once, and tracks a per-user unread/read marker for every
//! item of every followed feed.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod parser;
pub mod routes;
