//! Local key-value persistence for the palette cache.
//!
//! This module provides the process-local store the cache mirrors into:
//! - String keys, whole JSON values
//! - Synchronous get/set, surviving restarts when backed by SQLite
//! - Prefix scans so one store can host several namespaces

mod storage;

pub use storage::{KvStore, MemoryKvStore, SqliteKvStore};
