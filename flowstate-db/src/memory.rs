use std::collections::BTreeMap;

use crate::store::{DbIter, KeyValueStore};
use crate::{ColumnFamily, Result};

/// In-memory store backed by one `BTreeMap` per column family.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    families: BTreeMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored in `cf`.
    pub fn len(&self, cf: ColumnFamily) -> usize {
        self.families.get(&cf).map_or(0, BTreeMap::len)
    }

    /// Column families that currently hold at least one row.
    pub fn non_empty_families(&self) -> Vec<ColumnFamily> {
        self.families
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(cf, _)| *cf)
            .collect()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.families.get(&cf).and_then(|rows| rows.get(key)).cloned())
    }

    fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()> {
        self.families
            .entry(cf)
            .or_default()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, cf: ColumnFamily, key: &[u8]) -> Result<()> {
        if let Some(rows) = self.families.get_mut(&cf) {
            rows.remove(key);
        }
        Ok(())
    }

    fn prefix_iter<'a>(&'a self, cf: ColumnFamily, prefix: &[u8]) -> DbIter<'a> {
        let Some(rows) = self.families.get(&cf) else {
            return Box::new(std::iter::empty());
        };
        let prefix = prefix.to_vec();
        Box::new(
            rows.range(prefix.clone()..)
                .take_while(move |(key, _)| key.starts_with(&prefix))
                .map(|(key, value)| Ok((key.clone(), value.clone()))),
        )
    }
}
