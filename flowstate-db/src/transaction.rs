//! Buffered write overlay over another store.
//!
//! All writes of one record's application land in the overlay; the base store
//! only changes when [`Transaction::commit`] hands the overlay over as a single
//! [`WriteBatch`]. Dropping an uncommitted transaction discards its writes.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;

use crate::store::{DbIter, KeyValueStore, WriteBatch};
use crate::{ColumnFamily, Result};

type OverlayKey = (ColumnFamily, Vec<u8>);

/// `None` marks a deleted row (tombstone).
type Overlay = BTreeMap<OverlayKey, Option<Vec<u8>>>;

pub struct Transaction<'a, S: KeyValueStore> {
    base: &'a mut S,
    overlay: Overlay,
}

impl<'a, S: KeyValueStore> Transaction<'a, S> {
    pub fn new(base: &'a mut S) -> Self {
        Self {
            base,
            overlay: BTreeMap::new(),
        }
    }

    /// Number of buffered writes (puts and deletes).
    pub fn pending_writes(&self) -> usize {
        self.overlay.len()
    }

    /// Apply every buffered write to the base store as one batch.
    pub fn commit(self) -> Result<()> {
        let Transaction { base, overlay } = self;
        let mut batch = WriteBatch::new();
        for ((cf, key), value) in overlay {
            match value {
                Some(value) => batch.put(cf, key, value),
                None => batch.delete(cf, key),
            }
        }
        tracing::trace!(writes = batch.len(), "committing transaction");
        base.write_batch(batch)
    }

    /// Discard every buffered write. Equivalent to dropping the transaction.
    pub fn rollback(self) {
        tracing::trace!(writes = self.overlay.len(), "rolling back transaction");
    }
}

impl<S: KeyValueStore> KeyValueStore for Transaction<'_, S> {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.overlay.get(&(cf, key.to_vec())) {
            Some(buffered) => Ok(buffered.clone()),
            None => self.base.get(cf, key),
        }
    }

    fn put(&mut self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<()> {
        self.overlay.insert((cf, key.to_vec()), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, cf: ColumnFamily, key: &[u8]) -> Result<()> {
        self.overlay.insert((cf, key.to_vec()), None);
        Ok(())
    }

    fn prefix_iter<'b>(&'b self, cf: ColumnFamily, prefix: &[u8]) -> DbIter<'b> {
        let owned_prefix = prefix.to_vec();
        let overlay = self
            .overlay
            .range((cf, prefix.to_vec())..)
            .take_while(move |((row_cf, key), _)| *row_cf == cf && key.starts_with(&owned_prefix))
            .map(|((_, key), value)| (key.as_slice(), value.as_deref()));

        Box::new(MergeIter {
            base: self.base.prefix_iter(cf, prefix).peekable(),
            overlay: overlay.peekable(),
        })
    }
}

/// Merges the base rows with the overlay rows in key order; on equal keys the
/// overlay wins and tombstones suppress the row.
struct MergeIter<'b, O>
where
    O: Iterator<Item = (&'b [u8], Option<&'b [u8]>)>,
{
    base: Peekable<DbIter<'b>>,
    overlay: Peekable<O>,
}

impl<'b, O> Iterator for MergeIter<'b, O>
where
    O: Iterator<Item = (&'b [u8], Option<&'b [u8]>)>,
{
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let order = match (self.base.peek(), self.overlay.peek()) {
                (None, None) => return None,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(Err(_)), Some(_)) => Ordering::Less,
                (Some(Ok((base_key, _))), Some((overlay_key, _))) => {
                    base_key.as_slice().cmp(overlay_key)
                }
            };

            match order {
                Ordering::Less => return self.base.next(),
                Ordering::Equal => {
                    self.base.next();
                }
                Ordering::Greater => {}
            }

            if let Some((key, value)) = self.overlay.next() {
                if let Some(value) = value {
                    return Some(Ok((key.to_vec(), value.to_vec())));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    fn keys(store: &impl KeyValueStore, cf: ColumnFamily) -> Vec<Vec<u8>> {
        store
            .prefix_iter(cf, &[])
            .map(|row| row.unwrap().0)
            .collect()
    }

    #[test]
    fn test_reads_see_buffered_writes() {
        let cf = ColumnFamily::Jobs;
        let mut base = MemoryStore::new();
        base.put(cf, b"a", b"1").unwrap();
        base.put(cf, b"c", b"3").unwrap();

        let mut txn = Transaction::new(&mut base);
        txn.put(cf, b"b", b"2").unwrap();
        txn.delete(cf, b"c").unwrap();
        txn.put(cf, b"a", b"10").unwrap();

        assert_eq!(txn.get(cf, b"a").unwrap(), Some(b"10".to_vec()));
        assert_eq!(txn.get(cf, b"c").unwrap(), None);
        assert_eq!(keys(&txn, cf), vec![b"a".to_vec(), b"b".to_vec()]);
        let values: Vec<_> = txn
            .prefix_iter(cf, &[])
            .map(|row| row.unwrap().1)
            .collect();
        assert_eq!(values, vec![b"10".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_commit_applies_and_drop_discards() {
        let cf = ColumnFamily::Incidents;
        let mut base = MemoryStore::new();

        {
            let mut txn = Transaction::new(&mut base);
            txn.put(cf, b"x", b"1").unwrap();
        }
        assert!(base.is_empty(cf).unwrap());

        let mut txn = Transaction::new(&mut base);
        txn.put(cf, b"x", b"1").unwrap();
        assert_eq!(txn.pending_writes(), 1);
        txn.commit().unwrap();
        assert_eq!(base.get(cf, b"x").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_overlay_scan_is_scoped_to_family_and_prefix() {
        let mut base = MemoryStore::new();
        let mut txn = Transaction::new(&mut base);
        txn.put(ColumnFamily::Jobs, &[1, 1], b"job").unwrap();
        txn.put(ColumnFamily::JobStates, &[1, 1], b"state").unwrap();
        txn.put(ColumnFamily::Jobs, &[2, 1], b"other").unwrap();

        let rows: Vec<_> = txn
            .prefix_iter(ColumnFamily::Jobs, &[1])
            .map(|row| row.unwrap())
            .collect();
        assert_eq!(rows, vec![(vec![1, 1], b"job".to_vec())]);
    }

    #[test]
    fn test_nested_transaction_commits_into_outer() {
        let cf = ColumnFamily::EventTrigger;
        let mut base = MemoryStore::new();
        let mut outer = Transaction::new(&mut base);
        {
            let mut inner = Transaction::new(&mut outer);
            inner.put(cf, b"k", b"v").unwrap();
            inner.commit().unwrap();
        }
        assert_eq!(outer.get(cf, b"k").unwrap(), Some(b"v".to_vec()));
        outer.rollback();
        assert!(base.is_empty(cf).unwrap());
    }
}
