//! # RocksDB Storage
//!
//! Persistent [`KeyValueStore`] with one RocksDB column family per
//! [`ColumnFamily`]. All operations are synchronous blocking I/O, matching the
//! single-threaded processing model of the state store.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};

use crate::store::{DbIter, KeyValueStore, WriteBatch, WriteOp};
use crate::{ColumnFamily, DbError, Result};

/// RocksDB-backed store for one partition.
pub struct RocksDbStore {
    db: DB,
}

impl RocksDbStore {
    /// Open or create a database at `path` with default tuning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, &RocksDbConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: &RocksDbConfig) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        opts.set_max_background_jobs(config.max_background_jobs);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(config.compression.to_rocksdb());

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        if let Some(cache_size) = config.block_cache_size {
            let cache = rocksdb::Cache::new_lru_cache(cache_size);
            block_opts.set_block_cache(&cache);
        }
        if config.bloom_filter_bits > 0.0 {
            block_opts.set_bloom_filter(config.bloom_filter_bits, false);
        }
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<_> = ColumnFamily::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.as_str(), Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, path.as_ref(), cf_descriptors)
            .map_err(|e| DbError::Backend(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened rocksdb state store");
        Ok(Self { db })
    }

    fn handle(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(cf.as_str())
            .ok_or_else(|| DbError::Backend(format!("Column family {cf} not found")))
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db
            .get_cf(self.handle(cf)?, key)
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()> {
        self.db
            .put_cf(self.handle(cf)?, key, value)
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    fn delete(&mut self, cf: ColumnFamily, key: &[u8]) -> Result<()> {
        self.db
            .delete_cf(self.handle(cf)?, key)
            .map_err(|e| DbError::Backend(e.to_string()))
    }

    fn prefix_iter<'a>(&'a self, cf: ColumnFamily, prefix: &[u8]) -> DbIter<'a> {
        let handle = match self.handle(cf) {
            Ok(handle) => handle,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let owned_prefix = prefix.to_vec();
        let iter = self
            .db
            .iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward));

        Box::new(
            iter.map(|item| {
                item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                    .map_err(|e| DbError::Backend(e.to_string()))
            })
            .take_while(move |item| match item {
                Ok((key, _)) => key.starts_with(&owned_prefix),
                Err(_) => true,
            }),
        )
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<()> {
        let mut rocks_batch = rocksdb::WriteBatch::default();
        for op in batch {
            match op {
                WriteOp::Put { cf, key, value } => rocks_batch.put_cf(self.handle(cf)?, key, value),
                WriteOp::Delete { cf, key } => rocks_batch.delete_cf(self.handle(cf)?, key),
            }
        }
        self.db
            .write(rocks_batch)
            .map_err(|e| DbError::Backend(e.to_string()))
    }
}

/// Compression algorithm for SST files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Snappy,
    #[default]
    Lz4,
    Zstd,
}

impl CompressionType {
    fn to_rocksdb(self) -> rocksdb::DBCompressionType {
        match self {
            CompressionType::None => rocksdb::DBCompressionType::None,
            CompressionType::Snappy => rocksdb::DBCompressionType::Snappy,
            CompressionType::Lz4 => rocksdb::DBCompressionType::Lz4,
            CompressionType::Zstd => rocksdb::DBCompressionType::Zstd,
        }
    }
}

/// Tuning for the RocksDB store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDbConfig {
    /// Maximum number of background jobs
    pub max_background_jobs: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Maximum number of write buffers
    pub max_write_buffer_number: i32,
    /// Block cache size in bytes (None to disable)
    pub block_cache_size: Option<usize>,
    pub compression: CompressionType,
    /// Bloom filter bits per key (0 to disable)
    pub bloom_filter_bits: f64,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            max_background_jobs: 2,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            block_cache_size: Some(128 * 1024 * 1024),
            compression: CompressionType::Lz4,
            bloom_filter_bits: 10.0,
        }
    }
}
