//! Timers ordered by due date.
//!
//! Rows:
//! - `TimerKeys`: (element instance key, timer key) → [`TimerInstance`]
//! - `TimerDueDates`: (due date, timer key, element instance key) → ()
//!
//! Equal due dates order by timer key, i.e. by creation.

use flowstate_db::{ConsistencyChecks, KeyValueStore, TypedColumn};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Result, StateError};
use crate::types::{Key, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerInstance {
    pub key: Key,
    pub element_instance_key: Key,
    pub process_instance_key: Key,
    pub due_date: Timestamp,
    /// Element the timer fires on, e.g. a boundary or start event.
    pub handler_node_id: String,
    /// Remaining repetitions of a cycle timer; `-1` repeats forever.
    pub repetitions: i32,
    pub process_definition_key: Key,
    pub tenant_id: String,
}

impl TimerInstance {
    pub fn new(key: Key, element_instance_key: Key, due_date: Timestamp) -> Self {
        Self {
            key,
            element_instance_key,
            process_instance_key: -1,
            due_date,
            handler_node_id: String::new(),
            repetitions: 1,
            process_definition_key: -1,
            tenant_id: String::new(),
        }
    }

    pub fn with_process_instance_key(mut self, key: Key) -> Self {
        self.process_instance_key = key;
        self
    }

    pub fn with_handler_node_id(mut self, element_id: impl Into<String>) -> Self {
        self.handler_node_id = element_id.into();
        self
    }

    pub fn with_repetitions(mut self, repetitions: i32) -> Self {
        self.repetitions = repetitions;
        self
    }
}

pub struct TimerInstanceState<'a, S: KeyValueStore> {
    db: &'a mut S,
    timers: TypedColumn<(Key, Key), TimerInstance>,
    due_dates: TypedColumn<(Timestamp, Key, Key), ()>,
}

impl<'a, S: KeyValueStore> TimerInstanceState<'a, S> {
    pub fn new(db: &'a mut S, checks: ConsistencyChecks) -> Self {
        use flowstate_db::ColumnFamily as Cf;
        Self {
            db,
            timers: TypedColumn::new(Cf::TimerKeys, checks),
            due_dates: TypedColumn::new(Cf::TimerDueDates, checks),
        }
    }

    pub fn store(&mut self, timer: &TimerInstance) -> Result<()> {
        self.timers
            .insert(self.db, &(timer.element_instance_key, timer.key), timer)?;
        self.due_dates.insert(
            self.db,
            &(timer.due_date, timer.key, timer.element_instance_key),
            &(),
        )?;
        debug!(
            key = timer.key,
            element_instance_key = timer.element_instance_key,
            due_date = timer.due_date,
            "stored timer"
        );
        Ok(())
    }

    /// Remove the timer. The due-date row is located through the stored copy.
    pub fn remove(&mut self, timer: &TimerInstance) -> Result<()> {
        let primary = (timer.element_instance_key, timer.key);
        let Some(stored) = self.timers.get(&*self.db, &primary)? else {
            return Ok(());
        };
        self.due_dates.delete_existing(
            self.db,
            &(stored.due_date, stored.key, stored.element_instance_key),
        )?;
        self.timers.delete_existing(self.db, &primary)?;
        debug!(key = timer.key, "removed timer");
        Ok(())
    }

    pub fn get(&self, element_instance_key: Key, timer_key: Key) -> Result<Option<TimerInstance>> {
        Ok(self
            .timers
            .get(&*self.db, &(element_instance_key, timer_key))?)
    }

    /// Timers due strictly before `threshold`, by ascending due date.
    pub fn timers_due_before<'s>(
        &'s self,
        threshold: Timestamp,
    ) -> impl Iterator<Item = Result<TimerInstance>> + 's {
        let db: &'s S = &*self.db;
        let timers = self.timers;
        self.due_dates
            .iter(db)
            .take_while(move |row| match row {
                Ok(((due_date, _, _), ())) => *due_date < threshold,
                Err(_) => true,
            })
            .filter_map(move |row| {
                let lookup = row.and_then(|((_, key, element_instance_key), ())| {
                    timers.get(db, &(element_instance_key, key))
                });
                lookup.map_err(StateError::from).transpose()
            })
    }

    /// Visit timers due before `threshold` until the visitor returns `false`.
    ///
    /// Returns the due date of the first timer that was not consumed: either
    /// the first one at or after `threshold` or the one the visitor declined.
    /// `None` when every timer was consumed.
    pub fn find_timers_with_due_date_before<F>(
        &self,
        threshold: Timestamp,
        mut visitor: F,
    ) -> Result<Option<Timestamp>>
    where
        F: FnMut(&TimerInstance) -> bool,
    {
        for row in self.due_dates.iter(&*self.db) {
            let ((due_date, key, element_instance_key), ()) = row?;
            if due_date < threshold {
                let consumed = match self.get(element_instance_key, key)? {
                    Some(timer) => visitor(&timer),
                    None => true,
                };
                if consumed {
                    continue;
                }
            }
            trace!(due_date, threshold, "next timer due date");
            return Ok(Some(due_date));
        }
        Ok(None)
    }

    /// Timers of one element instance, by ascending timer key.
    pub fn timers_for_element_instance<'s>(
        &'s self,
        element_instance_key: Key,
    ) -> impl Iterator<Item = Result<TimerInstance>> + 's {
        self.timers
            .iter_prefix(&*self.db, &element_instance_key)
            .map(|row| row.map(|(_, timer)| timer).map_err(StateError::from))
    }

    pub fn for_each_timer_for_element_instance<F>(
        &self,
        element_instance_key: Key,
        mut visitor: F,
    ) -> Result<()>
    where
        F: FnMut(&TimerInstance) -> bool,
    {
        for timer in self.timers_for_element_instance(element_instance_key) {
            if !visitor(&timer?) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_db::MemoryStore;

    fn state(db: &mut MemoryStore) -> TimerInstanceState<'_, MemoryStore> {
        TimerInstanceState::new(db, ConsistencyChecks::default())
    }

    #[test]
    fn test_find_timers_visits_strictly_before_threshold() {
        let mut db = MemoryStore::new();
        let mut timers = state(&mut db);
        for (key, due_date) in [(1, 3000), (2, 1000), (3, 2000)] {
            timers.store(&TimerInstance::new(key, 100, due_date)).unwrap();
        }

        let mut visited = Vec::new();
        let next = timers
            .find_timers_with_due_date_before(2000, |timer| {
                visited.push(timer.due_date);
                true
            })
            .unwrap();

        assert_eq!(visited, vec![1000]);
        assert_eq!(next, Some(2000));
    }

    #[test]
    fn test_find_timers_stops_when_visitor_declines() {
        let mut db = MemoryStore::new();
        let mut timers = state(&mut db);
        for (key, due_date) in [(1, 100), (2, 200)] {
            timers.store(&TimerInstance::new(key, 100, due_date)).unwrap();
        }

        let mut visited = 0;
        let next = timers
            .find_timers_with_due_date_before(i64::MAX, |_| {
                visited += 1;
                false
            })
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(next, Some(100));

        let next = timers
            .find_timers_with_due_date_before(i64::MAX, |_| true)
            .unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn test_equal_due_dates_order_by_timer_key() {
        let mut db = MemoryStore::new();
        let mut timers = state(&mut db);
        for (key, element_instance_key) in [(3, 10), (1, 30), (2, 20)] {
            timers
                .store(&TimerInstance::new(key, element_instance_key, 500))
                .unwrap();
        }

        let keys: Vec<Key> = timers
            .timers_due_before(501)
            .map(|timer| timer.unwrap().key)
            .collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(timers.timers_due_before(500).count(), 0);
    }

    #[test]
    fn test_timers_for_element_instance() {
        let mut db = MemoryStore::new();
        let mut timers = state(&mut db);
        timers.store(&TimerInstance::new(2, 100, 50)).unwrap();
        timers.store(&TimerInstance::new(1, 100, 90)).unwrap();
        timers.store(&TimerInstance::new(3, 200, 10)).unwrap();

        let mut keys = Vec::new();
        timers
            .for_each_timer_for_element_instance(100, |timer| {
                keys.push(timer.key);
                true
            })
            .unwrap();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn test_remove_clears_both_rows() {
        let mut db = MemoryStore::new();
        let mut timers = state(&mut db);
        let timer = TimerInstance::new(1, 100, 1000)
            .with_handler_node_id("timer-boundary")
            .with_repetitions(3);
        timers.store(&timer).unwrap();
        assert_eq!(timers.get(100, 1).unwrap(), Some(timer.clone()));

        let mut stale = timer.clone();
        stale.due_date = 0;
        timers.remove(&stale).unwrap();
        timers.remove(&stale).unwrap();

        assert_eq!(timers.get(100, 1).unwrap(), None);
        drop(timers);
        assert!(db.non_empty_families().is_empty());
    }
}
