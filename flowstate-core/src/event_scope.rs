//! Event scopes and their trigger queues.
//!
//! A scope accepts triggers until an interrupting one fires or it is shut
//! down. Non-interrupting triggers are queued for as long as the scope
//! exists. Start-event triggers need no scope instance at all.
//!
//! Triggers are keyed `(scope_key, event_key)`; event keys grow with the log,
//! so key order is trigger order.

use std::collections::BTreeSet;

use flowstate_db::{ConsistencyChecks, KeyValueStore, TypedColumn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::types::Key;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventScopeInstance {
    accepting: bool,
    interrupting: BTreeSet<String>,
}

impl EventScopeInstance {
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn is_interrupting(&self, element_id: &str) -> bool {
        self.interrupting.contains(element_id)
    }
}

/// A buffered event occurrence awaiting consumption.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub element_id: String,
    pub event_key: Key,
    pub variables: Vec<u8>,
}

pub struct EventScopeInstanceState<'a, S: KeyValueStore> {
    db: &'a mut S,
    instances: TypedColumn<Key, EventScopeInstance>,
    triggers: TypedColumn<(Key, Key), EventTrigger>,
}

impl<'a, S: KeyValueStore> EventScopeInstanceState<'a, S> {
    pub fn new(db: &'a mut S, checks: ConsistencyChecks) -> Self {
        use flowstate_db::ColumnFamily as Cf;
        Self {
            db,
            instances: TypedColumn::new(Cf::EventScope, checks),
            triggers: TypedColumn::new(Cf::EventTrigger, checks),
        }
    }

    /// Create an accepting scope unless one exists already.
    pub fn create_if_not_exists<I, T>(
        &mut self,
        scope_key: Key,
        interrupting_element_ids: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        if self.instances.exists(&*self.db, &scope_key)? {
            return Ok(());
        }
        let instance = EventScopeInstance {
            accepting: true,
            interrupting: interrupting_element_ids.into_iter().map(Into::into).collect(),
        };
        self.instances.insert(self.db, &scope_key, &instance)?;
        debug!(scope_key, "created event scope");
        Ok(())
    }

    pub fn get_instance(&self, scope_key: Key) -> Result<Option<EventScopeInstance>> {
        Ok(self.instances.get(&*self.db, &scope_key)?)
    }

    /// Whether `trigger_event` would queue a trigger for `element_id`.
    pub fn can_trigger_event(&self, scope_key: Key, element_id: &str) -> Result<bool> {
        Ok(self
            .get_instance(scope_key)?
            .is_some_and(|instance| instance.accepting || !instance.is_interrupting(element_id)))
    }

    /// Queue a trigger on an existing scope. An interrupting trigger closes
    /// the scope and is rejected once it is closed. Returns whether the
    /// trigger was queued.
    pub fn trigger_event(
        &mut self,
        scope_key: Key,
        event_key: Key,
        element_id: &str,
        variables: &[u8],
    ) -> Result<bool> {
        let Some(mut instance) = self.get_instance(scope_key)? else {
            return Ok(false);
        };
        if instance.is_interrupting(element_id) {
            if !instance.accepting {
                debug!(scope_key, element_id, "scope no longer accepts interrupting triggers");
                return Ok(false);
            }
            instance.accepting = false;
            self.instances.update(self.db, &scope_key, &instance)?;
        }
        self.queue(scope_key, event_key, element_id, variables)?;
        Ok(true)
    }

    /// Queue a trigger for a process-level start event. The scope may not
    /// exist.
    pub fn trigger_start_event(
        &mut self,
        scope_key: Key,
        event_key: Key,
        element_id: &str,
        variables: &[u8],
    ) -> Result<()> {
        self.queue(scope_key, event_key, element_id, variables)
    }

    /// Remove and return the oldest trigger of the scope.
    pub fn poll_event_trigger(&mut self, scope_key: Key) -> Result<Option<EventTrigger>> {
        let Some(trigger) = self.peek_event_trigger(scope_key)? else {
            return Ok(None);
        };
        self.triggers
            .delete_existing(self.db, &(scope_key, trigger.event_key))?;
        Ok(Some(trigger))
    }

    pub fn peek_event_trigger(&self, scope_key: Key) -> Result<Option<EventTrigger>> {
        match self.triggers(scope_key).next() {
            Some(trigger) => Ok(Some(trigger?)),
            None => Ok(None),
        }
    }

    /// Queued triggers of the scope, oldest first.
    pub fn triggers<'s>(
        &'s self,
        scope_key: Key,
    ) -> impl Iterator<Item = Result<EventTrigger>> + 's {
        self.triggers
            .iter_prefix(&*self.db, &scope_key)
            .map(|row| row.map(|(_, trigger)| trigger).map_err(StateError::from))
    }

    pub fn delete_trigger(&mut self, scope_key: Key, event_key: Key) -> Result<()> {
        self.triggers.delete_if_exists(self.db, &(scope_key, event_key))?;
        Ok(())
    }

    /// Stop accepting triggers. Queued triggers stay.
    pub fn shutdown_instance(&mut self, scope_key: Key) -> Result<()> {
        let Some(mut instance) = self.get_instance(scope_key)? else {
            return Ok(());
        };
        if instance.accepting {
            instance.accepting = false;
            self.instances.update(self.db, &scope_key, &instance)?;
            debug!(scope_key, "shut down event scope");
        }
        Ok(())
    }

    /// Remove the scope and every trigger queued on it.
    pub fn delete_instance(&mut self, scope_key: Key) -> Result<()> {
        let event_keys: Vec<Key> = self
            .triggers
            .iter_prefix(&*self.db, &scope_key)
            .map(|row| row.map(|((_, event_key), _)| event_key))
            .collect::<flowstate_db::Result<_>>()?;
        for event_key in &event_keys {
            self.triggers.delete_existing(self.db, &(scope_key, *event_key))?;
        }
        self.instances.delete_if_exists(self.db, &scope_key)?;
        debug!(scope_key, triggers = event_keys.len(), "deleted event scope");
        Ok(())
    }

    fn queue(
        &mut self,
        scope_key: Key,
        event_key: Key,
        element_id: &str,
        variables: &[u8],
    ) -> Result<()> {
        let trigger = EventTrigger {
            element_id: element_id.to_string(),
            event_key,
            variables: variables.to_vec(),
        };
        self.triggers.upsert(self.db, &(scope_key, event_key), &trigger)?;
        debug!(scope_key, event_key, element_id, "queued event trigger");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_db::MemoryStore;

    fn state(db: &mut MemoryStore) -> EventScopeInstanceState<'_, MemoryStore> {
        EventScopeInstanceState::new(db, ConsistencyChecks::default())
    }

    #[test]
    fn test_interrupting_trigger_closes_scope() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);
        scopes.create_if_not_exists(1, ["foo"]).unwrap();

        assert!(scopes.trigger_event(1, 10, "foo", b"a").unwrap());
        assert!(!scopes.get_instance(1).unwrap().unwrap().is_accepting());
        assert!(!scopes.can_trigger_event(1, "foo").unwrap());
        assert!(!scopes.trigger_event(1, 11, "foo", b"b").unwrap());

        assert!(scopes.can_trigger_event(1, "bar").unwrap());
        assert!(scopes.trigger_event(1, 12, "bar", b"c").unwrap());

        let first = scopes.poll_event_trigger(1).unwrap().unwrap();
        assert_eq!((first.element_id.as_str(), first.event_key), ("foo", 10));
        let second = scopes.poll_event_trigger(1).unwrap().unwrap();
        assert_eq!((second.element_id.as_str(), second.variables.as_slice()), ("bar", &b"c"[..]));
        assert_eq!(scopes.poll_event_trigger(1).unwrap(), None);
    }

    #[test]
    fn test_non_interrupting_triggers_keep_scope_accepting() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);
        scopes.create_if_not_exists(1, ["foo"]).unwrap();

        for event_key in 20..25 {
            assert!(scopes.trigger_event(1, event_key, "timer", &[]).unwrap());
        }
        assert!(scopes.get_instance(1).unwrap().unwrap().is_accepting());
        assert_eq!(scopes.triggers(1).count(), 5);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);
        scopes.create_if_not_exists(1, Vec::<String>::new()).unwrap();
        scopes.trigger_event(1, 3, "msg", &[]).unwrap();

        assert_eq!(scopes.peek_event_trigger(1).unwrap().unwrap().event_key, 3);
        assert_eq!(scopes.peek_event_trigger(1).unwrap().unwrap().event_key, 3);
        scopes.delete_trigger(1, 3).unwrap();
        assert_eq!(scopes.peek_event_trigger(1).unwrap(), None);
    }

    #[test]
    fn test_trigger_without_scope() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);

        assert!(!scopes.trigger_event(5, 1, "foo", &[]).unwrap());
        assert_eq!(scopes.peek_event_trigger(5).unwrap(), None);

        scopes.trigger_start_event(5, 2, "start", b"v").unwrap();
        let trigger = scopes.poll_event_trigger(5).unwrap().unwrap();
        assert_eq!(trigger.element_id, "start");
        assert_eq!(trigger.variables, b"v".to_vec());
        assert!(scopes.get_instance(5).unwrap().is_none());
    }

    #[test]
    fn test_shutdown_keeps_queue_and_ignores_missing_scope() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);

        scopes.shutdown_instance(9).unwrap();
        assert!(scopes.get_instance(9).unwrap().is_none());

        scopes.create_if_not_exists(1, ["foo"]).unwrap();
        scopes.trigger_event(1, 1, "bar", &[]).unwrap();
        scopes.shutdown_instance(1).unwrap();

        assert!(!scopes.get_instance(1).unwrap().unwrap().is_accepting());
        assert!(!scopes.trigger_event(1, 2, "foo", &[]).unwrap());
        assert_eq!(scopes.triggers(1).count(), 1);
    }

    #[test]
    fn test_create_if_not_exists_keeps_existing_scope() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);
        scopes.create_if_not_exists(1, ["foo"]).unwrap();
        scopes.trigger_event(1, 1, "foo", &[]).unwrap();
        scopes.create_if_not_exists(1, ["bar"]).unwrap();

        let instance = scopes.get_instance(1).unwrap().unwrap();
        assert!(!instance.is_accepting());
        assert!(instance.is_interrupting("foo"));
        assert!(!instance.is_interrupting("bar"));
    }

    #[test]
    fn test_delete_instance_drops_all_triggers() {
        let mut db = MemoryStore::new();
        let mut scopes = state(&mut db);
        scopes.create_if_not_exists(1, ["foo"]).unwrap();
        scopes.create_if_not_exists(2, ["foo"]).unwrap();
        scopes.trigger_event(1, 1, "foo", &[]).unwrap();
        scopes.trigger_event(1, 2, "bar", &[]).unwrap();
        scopes.trigger_event(2, 3, "bar", &[]).unwrap();

        scopes.delete_instance(1).unwrap();

        assert!(scopes.get_instance(1).unwrap().is_none());
        assert_eq!(scopes.triggers(1).count(), 0);
        assert_eq!(scopes.triggers(2).count(), 1);

        scopes.delete_instance(2).unwrap();
        drop(scopes);
        assert!(db.non_empty_families().is_empty());
    }
}
