//! reportd library crate.
//!
//! Scheduled report generation: cron events are expanded into reports,
//! their cards fetched and checked against a predicate, rendered in the
//! configured formats and delivered to Telegram, SMB shares and email.

pub mod collector;
pub mod config;
pub mod database;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod evaluator;
pub mod event_creator;
pub mod export;
pub mod fetcher;
pub mod generator;
pub mod logging;
pub mod orchestrator;
pub mod panic_hook;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
