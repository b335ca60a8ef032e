//! Core domain + application logic for the team-application relay bot.
//!
//! This crate is intentionally framework-agnostic. The chat platform and the
//! data files live behind ports (traits); Telegram is implemented in the
//! `relay-telegram` adapter crate.

pub mod applications;
pub mod audit;
pub mod bot;
pub mod callbacks;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod locks;
pub mod logging;
pub mod messaging;
pub mod persistence;
pub mod relay;
pub mod store;
pub mod teams;
pub mod texts;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
