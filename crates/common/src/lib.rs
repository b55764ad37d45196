//! Shared types, error definitions, and utilities used across all herald crates.
//!
//! The recipient partition ([`chats::ChatSet`]), pacing policy
//! ([`settings::IntervalPolicy`]) and per-broadcast settings live here so the
//! storage layer and the delivery engine agree on one persisted shape.

pub mod chats;
pub mod error;
pub mod settings;
pub mod types;

pub use {
    chats::{ChatSet, ChatState},
    error::{Error, FromMessage, Result},
    settings::{IntervalPolicy, MailerSettings},
    types::{Context, MailerId, RecipientId},
};
