//! # hype-store
//!
//! SQLite persistence for the Hype relay.
//!
//! [`Database`] is a synchronous wrapper around a [`rusqlite::Connection`]
//! with typed helpers per table. [`SqliteStore`] shares one `Database`
//! between tasks and implements [`hype_core::Store`] on top of it, running
//! each call on the blocking thread pool.
//!
//! ```rust,no_run
//! use hype_store::SqliteStore;
//!
//! # fn main() -> Result<(), hype_core::StoreError> {
//! let store = SqliteStore::open("hype.db")?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod friends;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;
mod store;

pub use database::Database;
pub use error::DbError;
pub use store::SqliteStore;
