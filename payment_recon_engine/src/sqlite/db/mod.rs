//! # SQLite database methods
//!
//! "Low-level" SQLite interactions for the ledger. All of these are simple functions
//! (rather than stateful structs) that accept a `&mut SqliteConnection` argument, so
//! callers can obtain a connection from a pool or compose several calls inside one
//! atomic transaction by passing `&mut *tx`.

use std::env;

use log::info;
use sqlx::{sqlite::SqlitePoolOptions, Error as SqlxError, SqlitePool};

pub mod payments;
pub mod transactions;

const SQLITE_DB_URL: &str = "sqlite://data/recon_ledger.db";

pub fn db_url() -> String {
    let result = env::var("PRG_DATABASE_URL").unwrap_or_else(|_| {
        info!("PRG_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?;
    Ok(pool)
}
