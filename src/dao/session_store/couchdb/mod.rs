//! CouchDB backend. Session documents live under `session::<pin>` and are
//! observed through the database `_changes` feed.

mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::{CouchDaoError, CouchResult};
pub use store::CouchSessionStore;
