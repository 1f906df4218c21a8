//! SQLite-backed storage implementation.

mod config;
mod dependencies;
mod digests;
mod events;
mod instances;
pub mod schema;
mod steps;
mod store;
mod transaction;

pub use store::SqliteStore;
