// Market infrastructure - in-memory and SQLite store implementations

mod in_memory;
pub mod seed;
mod sqlite_store;

pub use in_memory::InMemoryMarketStore;
pub use seed::{seed_if_empty, SeedData, SeedStore};
pub use sqlite_store::{SqliteMarketStore, DEFAULT_WRITE_RETRIES};
