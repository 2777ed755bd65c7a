//! Signal Engine Library
//!
//! Turns free-text trading signals into validated trade intents and
//! execution plans, and keeps the trade ledger in step with the venue
//! through periodic reconciliation.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod telemetry;
