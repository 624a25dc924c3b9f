// src/cache/mod.rs

//! Read-through cache for query results.
//!
//! A cache entry is an opaque snapshot of one query's table, stored under a
//! caller-chosen key (e.g. `listsize_ccg.csv`). There is no staleness check:
//! once an entry exists the query is never re-issued for that key.

use arrow::record_batch::RecordBatch;
use tracing::{info, instrument};

use crate::bq::QueryBackend;
use crate::error::Result;

pub mod codec;
pub mod fs;
pub mod memory;

pub use codec::TableCodec;
pub use fs::FsStore;
pub use memory::MemoryStore;

/// Key → bytes storage behind the cache.
pub trait CacheStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Create or overwrite the entry for `key`.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

/// Return the table cached under `key`, or run `sql` on `backend`, store the
/// result under `key` and return it.
#[instrument(level = "info", skip(backend, store, sql))]
pub fn cached_read(
    backend: &dyn QueryBackend,
    store: &dyn CacheStore,
    sql: &str,
    key: &str,
) -> Result<RecordBatch> {
    let codec = TableCodec::for_key(key)?;

    if let Some(bytes) = store.get(key)? {
        let batch = codec.decode(bytes)?;
        info!(rows = batch.num_rows(), "cache hit");
        return Ok(batch);
    }

    info!("cache miss; querying");
    let batch = backend.query(sql)?;
    let bytes = codec.encode(&batch)?;
    store.put(key, &bytes)?;
    info!(rows = batch.num_rows(), bytes = bytes.len(), "cached");

    // Return what a later hit would return, so the first and second runs agree.
    codec.decode(bytes)
}
