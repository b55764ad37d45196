//! Broadcast delivery engine.
//!
//! A [`Mailer`] sends one piece of content to a set of recipients through a
//! [`Transport`], pacing sends per its interval policy, recording every
//! recipient's outcome and persisting progress so a broadcast survives a
//! restart. A [`MailerPool`] owns the shared collaborators and the registry of
//! live mailers.

pub mod content;
pub mod error;
pub mod events;
pub mod mailer;
pub mod placeholder;
pub mod pool;
pub mod task;
pub mod transport;

pub use {
    content::{Content, ContentResolver, OutboundCall, ParseMode},
    error::{Error, Result},
    events::{EventHandler, EventHub, HookAction, MailerEvent},
    mailer::{Mailer, MailerStatistics, MailerStatus, RunOutcome},
    placeholder::{PlaceholderProvider, PlaceholderRegistry, PlaceholderRenderer},
    pool::{MailerPool, MailerPoolBuilder},
    task::TaskHandle,
    transport::{Transport, TransportError},
};

#[cfg(test)]
mod testing;
