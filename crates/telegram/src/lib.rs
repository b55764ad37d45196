//! Telegram Bot API transport for herald mailers.
//!
//! [`TelegramTransport`] turns each [`herald_mailer::OutboundCall`] into the
//! matching Bot API request through `teloxide` and reports flood-control
//! responses as [`herald_mailer::TransportError::RateLimited`].

pub mod error;
pub mod transport;

pub use {
    error::{Error, Result},
    transport::TelegramTransport,
};
