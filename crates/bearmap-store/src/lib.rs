//! Storage layer: key-value byte stores and the durable local replica.

mod error;
pub use error::StoreError;

pub mod kv;
pub use kv::{FileStore, KvStore, MemoryStore};

pub mod replica;
pub use replica::{LocalReplica, REPLICA_KEY};
