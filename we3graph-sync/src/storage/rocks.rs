//! RocksDB-backed command log.
//!
//! Column families:
//! - `commands` — bincode [`LogRow`]s keyed by `graph_id:8 BE | sequence:8 BE`
//! - `graphs`   — last assigned sequence per graph, keyed by `graph_id:8 BE`
//! - `clients`  — bincode [`ClientRecord`]s keyed by `client_id:8 BE`
//!
//! Big-endian keys make a forward iterator walk one graph's rows in
//! sequence order. An append, its client watermark and every `is_effective`
//! flip it causes go through a single `WriteBatch`.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::{Append, ClientRecord, LogRow, LogStore, StoreError};

const CF_COMMANDS: &str = "commands";
const CF_GRAPHS: &str = "graphs";
const CF_CLIENTS: &str = "clients";

const COLUMN_FAMILIES: &[&str] = &[CF_COMMANDS, CF_GRAPHS, CF_CLIENTS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every append (default: true, an acknowledged command must survive a crash)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("we3graph_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// RocksDB-backed [`LogStore`].
pub struct RocksLogStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksLogStore {
    /// Opens (or creates) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened command log at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_COMMANDS => {
                // Range-scanned per graph
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(8));
            }
            CF_GRAPHS | CF_CLIENTS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    /// `graph_id:8 BE | sequence:8 BE`
    fn command_key(graph_id: u64, sequence: u64) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&graph_id.to_be_bytes());
        key[8..].copy_from_slice(&sequence.to_be_bytes());
        key
    }

    fn load_row(&self, graph_id: u64, sequence: u64) -> Result<LogRow, StoreError> {
        let cf = self.cf(CF_COMMANDS)?;
        match self.db.get_cf(&cf, Self::command_key(graph_id, sequence))? {
            Some(bytes) => LogRow::decode(&bytes),
            None => Err(StoreError::NotFound { graph_id, sequence }),
        }
    }
}

impl LogStore for RocksLogStore {
    fn append(&self, append: Append<'_>) -> Result<(), StoreError> {
        let cf_commands = self.cf(CF_COMMANDS)?;
        let cf_graphs = self.cf(CF_GRAPHS)?;
        let cf_clients = self.cf(CF_CLIENTS)?;
        let row = append.row;

        let mut batch = WriteBatch::default();
        for &sequence in append.superseded {
            let mut earlier = self.load_row(row.graph_id, sequence)?;
            earlier.is_effective = false;
            batch.put_cf(
                &cf_commands,
                Self::command_key(row.graph_id, sequence),
                earlier.encode()?,
            );
        }
        batch.put_cf(
            &cf_commands,
            Self::command_key(row.graph_id, row.sequence),
            row.encode()?,
        );
        batch.put_cf(
            &cf_graphs,
            row.graph_id.to_be_bytes(),
            row.sequence.to_be_bytes(),
        );
        batch.put_cf(
            &cf_clients,
            append.client.client_id.to_be_bytes(),
            append.client.encode()?,
        );

        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }

    fn read(
        &self,
        graph_id: u64,
        after: u64,
        limit: usize,
        include_ineffective: bool,
    ) -> Result<Vec<LogRow>, StoreError> {
        let Some(first) = after.checked_add(1) else {
            return Ok(Vec::new());
        };
        let cf = self.cf(CF_COMMANDS)?;
        let start_key = Self::command_key(graph_id, first);
        let prefix = graph_id.to_be_bytes();

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&start_key, Direction::Forward));
        for item in iter {
            if rows.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if key.len() != 16 || key[..8] != prefix {
                break;
            }
            let row = LogRow::decode(&value)?;
            if include_ineffective || row.is_effective {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn last_sequence(&self, graph_id: u64) -> Result<u64, StoreError> {
        let cf = self.cf(CF_GRAPHS)?;
        match self.db.get_cf(&cf, graph_id.to_be_bytes())? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::DeserializationError(format!(
                        "Invalid sequence value for graph {graph_id}"
                    ))
                })?;
                Ok(u64::from_be_bytes(buf))
            }
            None => Ok(0),
        }
    }

    fn save_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_CLIENTS)?;
        self.db.put_cf_opt(
            &cf,
            client.client_id.to_be_bytes(),
            client.encode()?,
            &self.write_options(),
        )?;
        Ok(())
    }

    fn load_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let cf = self.cf(CF_CLIENTS)?;
        let mut clients = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            clients.push(ClientRecord::decode(&value)?);
        }
        Ok(clients)
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(graph_id: u64, sequence: u64, vertex: &str) -> LogRow {
        LogRow {
            graph_id,
            sequence,
            name: "MoveVertex".into(),
            client_id: 3,
            params: [vertex, "1", "2", "3", ""].map(String::from),
            is_effective: true,
        }
    }

    fn client(last: u64) -> ClientRecord {
        ClientRecord {
            client_id: 3,
            user_id: 1,
            graph_id: 7,
            name: "desk".into(),
            last_client_sequence: Some(last),
            last_accepted_sequence: Some(last),
        }
    }

    fn append(store: &RocksLogStore, r: &LogRow, superseded: &[u64]) {
        store
            .append(Append {
                row: r,
                client: &client(r.sequence),
                superseded,
            })
            .unwrap();
    }

    #[test]
    fn test_open_creates_empty_store() {
        let dir = tempdir().unwrap();
        let store = RocksLogStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        assert_eq!(store.last_sequence(1).unwrap(), 0);
        assert!(store.read(1, 0, 100, true).unwrap().is_empty());
        assert!(store.load_clients().unwrap().is_empty());
    }

    #[test]
    fn test_append_read_in_order() {
        let dir = tempdir().unwrap();
        let store = RocksLogStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        for seq in 1..=250 {
            append(&store, &row(7, seq, "3-1"), &[]);
        }
        // Another graph must not leak into graph 7's range
        append(&store, &row(8, 1, "3-1"), &[]);

        assert_eq!(store.last_sequence(7).unwrap(), 250);
        let page = store.read(7, 0, 100, false).unwrap();
        assert_eq!(page.len(), 100);
        assert_eq!(page[0].sequence, 1);
        assert_eq!(page[99].sequence, 100);

        let tail = store.read(7, 200, 100, false).unwrap();
        assert_eq!(tail.len(), 50);
        assert!(tail.iter().all(|r| r.graph_id == 7));
        assert!(store.read(7, u64::MAX, 10, true).unwrap().is_empty());
    }

    #[test]
    fn test_superseded_flag_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = RocksLogStore::open(StoreConfig::for_testing(&path)).unwrap();
            append(&store, &row(7, 1, "3-1"), &[]);
            append(&store, &row(7, 2, "3-1"), &[1]);
            store.sync().unwrap();
        }

        let store = RocksLogStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(store.last_sequence(7).unwrap(), 2);
        let effective = store.read(7, 0, 100, false).unwrap();
        assert_eq!(effective.len(), 1);
        assert_eq!(effective[0].sequence, 2);
        let all = store.read(7, 0, 100, true).unwrap();
        assert_eq!(all.len(), 2);
        assert!(!all[0].is_effective);

        let clients = store.load_clients().unwrap();
        assert_eq!(clients, vec![client(2)]);
    }

    #[test]
    fn test_superseding_missing_row_fails_whole_batch() {
        let dir = tempdir().unwrap();
        let store = RocksLogStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        let result = store.append(Append {
            row: &row(7, 1, "3-1"),
            client: &client(1),
            superseded: &[42],
        });
        assert!(matches!(result, Err(StoreError::NotFound { sequence: 42, .. })));
        assert_eq!(store.last_sequence(7).unwrap(), 0);
    }
}
