pub mod memory_store;
pub mod postgres_store;

pub use memory_store::InMemoryChatStore;
pub use postgres_store::PostgresChatStore;
