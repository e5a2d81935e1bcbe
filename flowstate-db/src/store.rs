use crate::{ColumnFamily, Result};

/// Lazy, ordered iterator over `(key, value)` rows of one column family.
pub type DbIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>;

/// A single buffered write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

/// A group of writes applied as one unit by [`KeyValueStore::write_batch`].
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: ColumnFamily, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(WriteOp::Put { cf, key, value });
    }

    pub fn delete(&mut self, cf: ColumnFamily, key: Vec<u8>) {
        self.ops.push(WriteOp::Delete { cf, key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl IntoIterator for WriteBatch {
    type Item = WriteOp;
    type IntoIter = std::vec::IntoIter<WriteOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Ordered, prefix-scannable key-value store split into column families.
///
/// Keys compare byte-wise within a column family. Implementations are used
/// from a single processing thread; no method blocks on another caller.
pub trait KeyValueStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a row. Deleting an absent key is not an error.
    fn delete(&mut self, cf: ColumnFamily, key: &[u8]) -> Result<()>;

    /// Rows whose key starts with `prefix`, in ascending key order.
    /// An empty prefix iterates the whole column family.
    fn prefix_iter<'a>(&'a self, cf: ColumnFamily, prefix: &[u8]) -> DbIter<'a>;

    /// Apply every write of `batch`. Backends with native batches apply it
    /// atomically.
    fn write_batch(&mut self, batch: WriteBatch) -> Result<()> {
        for op in batch {
            match op {
                WriteOp::Put { cf, key, value } => self.put(cf, &key, &value)?,
                WriteOp::Delete { cf, key } => self.delete(cf, &key)?,
            }
        }
        Ok(())
    }

    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> Result<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    fn is_empty(&self, cf: ColumnFamily) -> Result<bool> {
        match self.prefix_iter(cf, &[]).next() {
            None => Ok(true),
            Some(row) => row.map(|_| false),
        }
    }
}
