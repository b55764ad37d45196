//! Persistence for mailers.
//!
//! One [`record::StorageRecord`] per mailer, keyed by its id. Backends:
//! in-memory (tests), one JSON file per mailer, and SQLite.

pub mod error;
pub mod record;
pub mod store;
pub mod store_file;
pub mod store_memory;
pub mod store_sqlite;

pub use {
    error::{Error, Result},
    record::StorageRecord,
    store::{MailerStore, update_record},
};

/// Run database migrations for the storage crate.
///
/// This creates the `mailers` table. Should be called at application startup
/// when using [`store_sqlite::SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
