/// Storage-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("rocksdb error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("column family '{0}' not found")]
    MissingColumnFamily(&'static str),

    #[error("{table} {key} already exists")]
    AlreadyExists { table: &'static str, key: String },

    #[error("{table} {key} not found")]
    NotFound { table: &'static str, key: String },

    #[error("version conflict on {table} {key}: expected {expected}, found {found}")]
    VersionConflict {
        table: &'static str,
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("corrupt key in {0}")]
    CorruptKey(&'static str),
}
