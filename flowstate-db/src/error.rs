use crate::ColumnFamily;

/// Error type for substrate operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Key {key} already exists in column family {cf}")]
    KeyExists { cf: ColumnFamily, key: String },

    #[error("Key {key} does not exist in column family {cf}")]
    KeyNotFound { cf: ColumnFamily, key: String },

    #[error("Malformed key in column family {cf}: {reason}")]
    MalformedKey { cf: ColumnFamily, reason: String },

    #[error("Value codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl DbError {
    pub(crate) fn key_exists(cf: ColumnFamily, key: &[u8]) -> Self {
        Self::KeyExists {
            cf,
            key: hex::encode(key),
        }
    }

    pub(crate) fn key_not_found(cf: ColumnFamily, key: &[u8]) -> Self {
        Self::KeyNotFound {
            cf,
            key: hex::encode(key),
        }
    }
}
