//! Local persistence: the string key/value store and the TTL cache on top of it.

mod store;
mod ttl;

pub use store::{LocalStore, SqliteLocalStore};
#[cfg(test)]
pub use store::StorageError;
pub use ttl::{StoreUsage, TtlCache};
