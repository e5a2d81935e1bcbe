use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::key::DbKey;
use crate::store::KeyValueStore;
use crate::{ColumnFamily, DbError, Result};

/// Runtime consistency checks applied by [`TypedColumn`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyChecks {
    /// When on, `insert` fails if the key exists and `update`/`delete_existing`
    /// fail if it does not.
    pub enable_preconditions: bool,
}

impl Default for ConsistencyChecks {
    fn default() -> Self {
        Self {
            enable_preconditions: true,
        }
    }
}

/// A typed view of one column family: keys encoded with [`DbKey`], values
/// with `bincode`.
///
/// The column holds no data itself; every method takes the store it reads
/// from or writes to.
pub struct TypedColumn<K, V> {
    cf: ColumnFamily,
    checks: ConsistencyChecks,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for TypedColumn<K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for TypedColumn<K, V> {}

impl<K, V> TypedColumn<K, V>
where
    K: DbKey,
    V: Serialize + DeserializeOwned,
{
    pub fn new(cf: ColumnFamily, checks: ConsistencyChecks) -> Self {
        Self {
            cf,
            checks,
            _marker: PhantomData,
        }
    }

    pub fn column_family(&self) -> ColumnFamily {
        self.cf
    }

    pub fn get<S: KeyValueStore + ?Sized>(&self, db: &S, key: &K) -> Result<Option<V>> {
        db.get(self.cf, &key.to_key_bytes())?
            .map(|bytes| bincode::deserialize(&bytes).map_err(DbError::from))
            .transpose()
    }

    pub fn exists<S: KeyValueStore + ?Sized>(&self, db: &S, key: &K) -> Result<bool> {
        db.contains(self.cf, &key.to_key_bytes())
    }

    /// Write a new row. With preconditions on, the key must not exist.
    pub fn insert<S: KeyValueStore + ?Sized>(&self, db: &mut S, key: &K, value: &V) -> Result<()> {
        let key = key.to_key_bytes();
        if self.checks.enable_preconditions && db.contains(self.cf, &key)? {
            return Err(DbError::key_exists(self.cf, &key));
        }
        db.put(self.cf, &key, &bincode::serialize(value)?)
    }

    /// Overwrite a row. With preconditions on, the key must exist.
    pub fn update<S: KeyValueStore + ?Sized>(&self, db: &mut S, key: &K, value: &V) -> Result<()> {
        let key = key.to_key_bytes();
        if self.checks.enable_preconditions && !db.contains(self.cf, &key)? {
            return Err(DbError::key_not_found(self.cf, &key));
        }
        db.put(self.cf, &key, &bincode::serialize(value)?)
    }

    pub fn upsert<S: KeyValueStore + ?Sized>(&self, db: &mut S, key: &K, value: &V) -> Result<()> {
        db.put(self.cf, &key.to_key_bytes(), &bincode::serialize(value)?)
    }

    /// Delete a row. With preconditions on, the key must exist.
    pub fn delete_existing<S: KeyValueStore + ?Sized>(&self, db: &mut S, key: &K) -> Result<()> {
        let key = key.to_key_bytes();
        if self.checks.enable_preconditions && !db.contains(self.cf, &key)? {
            return Err(DbError::key_not_found(self.cf, &key));
        }
        db.delete(self.cf, &key)
    }

    pub fn delete_if_exists<S: KeyValueStore + ?Sized>(&self, db: &mut S, key: &K) -> Result<()> {
        db.delete(self.cf, &key.to_key_bytes())
    }

    pub fn is_empty<S: KeyValueStore + ?Sized>(&self, db: &S) -> Result<bool> {
        db.is_empty(self.cf)
    }

    /// Every row in key order.
    pub fn iter<'a, S: KeyValueStore + ?Sized>(
        &self,
        db: &'a S,
    ) -> impl Iterator<Item = Result<(K, V)>> + 'a
    where
        K: 'a,
        V: 'a,
    {
        self.iter_raw_prefix(db, Vec::new())
    }

    /// Rows whose key starts with the encoding of `prefix`, in key order.
    /// `prefix` is typically the leading part of a composite key.
    pub fn iter_prefix<'a, P: DbKey, S: KeyValueStore + ?Sized>(
        &self,
        db: &'a S,
        prefix: &P,
    ) -> impl Iterator<Item = Result<(K, V)>> + 'a
    where
        K: 'a,
        V: 'a,
    {
        self.iter_raw_prefix(db, prefix.to_key_bytes())
    }

    fn iter_raw_prefix<'a, S: KeyValueStore + ?Sized>(
        &self,
        db: &'a S,
        prefix: Vec<u8>,
    ) -> impl Iterator<Item = Result<(K, V)>> + 'a
    where
        K: 'a,
        V: 'a,
    {
        let cf = self.cf;
        db.prefix_iter(cf, &prefix).map(move |row| {
            let (key, value) = row?;
            let key = K::from_key_bytes(&key).map_err(|e| DbError::MalformedKey {
                cf,
                reason: e.to_string(),
            })?;
            Ok((key, bincode::deserialize(&value)?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn column(checks: bool) -> TypedColumn<(i64, i64), String> {
        TypedColumn::new(
            ColumnFamily::ElementInstanceParentChild,
            ConsistencyChecks {
                enable_preconditions: checks,
            },
        )
    }

    #[test]
    fn test_insert_twice_fails_with_preconditions() {
        let mut db = MemoryStore::new();
        let col = column(true);
        col.insert(&mut db, &(1, 2), &"a".to_string()).unwrap();
        let err = col.insert(&mut db, &(1, 2), &"b".to_string()).unwrap_err();
        assert!(matches!(err, DbError::KeyExists { .. }));
        assert_eq!(col.get(&db, &(1, 2)).unwrap(), Some("a".to_string()));
    }

    #[test]
    fn test_preconditions_off_allows_blind_writes() {
        let mut db = MemoryStore::new();
        let col = column(false);
        col.update(&mut db, &(1, 2), &"a".to_string()).unwrap();
        col.insert(&mut db, &(1, 2), &"b".to_string()).unwrap();
        col.delete_existing(&mut db, &(9, 9)).unwrap();
        assert_eq!(col.get(&db, &(1, 2)).unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_delete_existing_reports_missing_key() {
        let mut db = MemoryStore::new();
        let err = column(true).delete_existing(&mut db, &(4, 4)).unwrap_err();
        match err {
            DbError::KeyNotFound { cf, key } => {
                assert_eq!(cf, ColumnFamily::ElementInstanceParentChild);
                assert_eq!(key.len(), 32);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_iter_prefix_decodes_in_order() {
        let mut db = MemoryStore::new();
        let col = column(true);
        for (parent, child) in [(2, 30), (1, 20), (1, 10), (-1, 5)] {
            col.insert(&mut db, &(parent, child), &format!("{parent}/{child}"))
                .unwrap();
        }

        let children: Vec<_> = col
            .iter_prefix(&db, &1i64)
            .map(|row| row.unwrap().0 .1)
            .collect();
        assert_eq!(children, vec![10, 20]);

        let all: Vec<_> = col.iter(&db).map(|row| row.unwrap().0).collect();
        assert_eq!(all, vec![(-1, 5), (1, 10), (1, 20), (2, 30)]);
    }
}
