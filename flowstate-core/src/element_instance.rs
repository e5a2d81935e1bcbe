//! Element instance tree.
//!
//! Rows:
//! - `ElementInstanceKey`: key → [`ElementInstance`]
//! - `ElementInstanceParentChild`: (parent key, child key) → ()
//! - `NumberOfTakenSequenceFlows`: (flow scope key, gateway id, sequence flow id) → count
//!
//! A parent's `child_count` always equals the number of parent/child rows
//! under it. Instances are only written on explicit calls; mutating an
//! [`ElementInstance`] value does nothing until [`ElementInstanceState::update_instance`].

use flowstate_db::{ConsistencyChecks, KeyValueStore, TypedColumn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StateError};
use crate::types::{Key, ProcessInstanceIntent, ProcessInstanceRecord};

/// Runtime state of one flow-node (or process) instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstance {
    key: Key,
    parent_key: Option<Key>,
    child_count: u32,
    pub state: ProcessInstanceIntent,
    pub value: ProcessInstanceRecord,
    /// Job created for this element, `0` if none.
    pub job_key: Key,
    pub active_sequence_flows: u32,
    pub multi_instance_loop_counter: u32,
    pub interrupting_element_id: Option<String>,
    pub called_child_instance_key: Option<Key>,
    pub active_subprocess_incidents: u32,
}

impl ElementInstance {
    fn new(
        key: Key,
        parent_key: Option<Key>,
        state: ProcessInstanceIntent,
        value: ProcessInstanceRecord,
    ) -> Self {
        Self {
            key,
            parent_key,
            child_count: 0,
            state,
            value,
            job_key: 0,
            active_sequence_flows: 0,
            multi_instance_loop_counter: 0,
            interrupting_element_id: None,
            called_child_instance_key: None,
            active_subprocess_incidents: 0,
        }
    }

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn parent_key(&self) -> Option<Key> {
        self.parent_key
    }

    /// Number of child instances currently stored under this instance.
    pub fn child_count(&self) -> u32 {
        self.child_count
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ProcessInstanceIntent::ElementActivating | ProcessInstanceIntent::ElementActivated
        )
    }

    pub fn is_terminating(&self) -> bool {
        self.state == ProcessInstanceIntent::ElementTerminating
    }

    pub fn is_in_final_state(&self) -> bool {
        self.state.is_final_state()
    }

    pub fn can_terminate(&self) -> bool {
        matches!(
            self.state,
            ProcessInstanceIntent::ElementActivating
                | ProcessInstanceIntent::ElementActivated
                | ProcessInstanceIntent::ElementCompleting
        )
    }

    pub fn spawn_token(&mut self) {
        self.active_sequence_flows += 1;
    }

    pub fn consume_token(&mut self) {
        self.active_sequence_flows = self.active_sequence_flows.saturating_sub(1);
    }

    pub fn increment_multi_instance_loop_counter(&mut self) {
        self.multi_instance_loop_counter += 1;
    }

    /// Mark the instance as interrupted by the given event element.
    pub fn set_interrupted(&mut self, element_id: impl Into<String>) {
        self.interrupting_element_id = Some(element_id.into());
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupting_element_id.is_some()
    }

    pub fn increment_active_subprocess_incidents(&mut self) {
        self.active_subprocess_incidents += 1;
    }

    pub fn decrement_active_subprocess_incidents(&mut self) {
        self.active_subprocess_incidents = self.active_subprocess_incidents.saturating_sub(1);
    }
}

/// View over the element instance rows of one store.
pub struct ElementInstanceState<'a, S: KeyValueStore> {
    db: &'a mut S,
    instances: TypedColumn<Key, ElementInstance>,
    parent_child: TypedColumn<(Key, Key), ()>,
    taken_sequence_flows: TypedColumn<(Key, String, String), u32>,
}

impl<'a, S: KeyValueStore> ElementInstanceState<'a, S> {
    pub fn new(db: &'a mut S, checks: ConsistencyChecks) -> Self {
        use flowstate_db::ColumnFamily as Cf;
        Self {
            db,
            instances: TypedColumn::new(Cf::ElementInstanceKey, checks),
            parent_child: TypedColumn::new(Cf::ElementInstanceParentChild, checks),
            taken_sequence_flows: TypedColumn::new(Cf::NumberOfTakenSequenceFlows, checks),
        }
    }

    // ── Tree ──

    /// Create a root instance (no parent, no child-index row).
    pub fn new_instance(
        &mut self,
        key: Key,
        value: ProcessInstanceRecord,
        state: ProcessInstanceIntent,
    ) -> Result<ElementInstance> {
        let instance = ElementInstance::new(key, None, state, value);
        self.instances.insert(self.db, &key, &instance)?;
        debug!(key, %state, "created root element instance");
        Ok(instance)
    }

    /// Create a child of `parent`. Increments and persists the parent's child
    /// count, so the caller's `parent` value stays in sync with the store.
    pub fn new_child_instance(
        &mut self,
        parent: &mut ElementInstance,
        key: Key,
        value: ProcessInstanceRecord,
        state: ProcessInstanceIntent,
    ) -> Result<ElementInstance> {
        if !self.instances.exists(&*self.db, &parent.key)? {
            return Err(StateError::ParentNotFound {
                key,
                parent_key: parent.key,
            });
        }
        let instance = ElementInstance::new(key, Some(parent.key), state, value);
        self.instances.insert(self.db, &key, &instance)?;
        self.parent_child.insert(self.db, &(parent.key, key), &())?;

        parent.child_count += 1;
        self.instances.update(self.db, &parent.key, parent)?;

        debug!(
            key,
            parent_key = parent.key,
            child_count = parent.child_count,
            %state,
            "created child element instance"
        );
        Ok(instance)
    }

    pub fn get_instance(&self, key: Key) -> Result<Option<ElementInstance>> {
        Ok(self.instances.get(&*self.db, &key)?)
    }

    /// Children of `parent_key` in creation order.
    pub fn get_children(&self, parent_key: Key) -> Result<Vec<ElementInstance>> {
        let mut children = Vec::new();
        for row in self.parent_child.iter_prefix(&*self.db, &parent_key) {
            let ((_, child_key), ()) = row?;
            if let Some(child) = self.instances.get(&*self.db, &child_key)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    /// Persist a modified instance. Absent instances are left absent.
    pub fn update_instance(&mut self, instance: &ElementInstance) -> Result<()> {
        if self.instances.exists(&*self.db, &instance.key)? {
            self.instances.update(self.db, &instance.key, instance)?;
        }
        Ok(())
    }

    /// Remove an instance with every row it owns, and detach it from its parent.
    ///
    /// Callers remove children before their parent; child-index rows still
    /// present under the removed instance are deleted as well.
    pub fn remove_instance(&mut self, key: Key) -> Result<()> {
        let Some(instance) = self.get_instance(key)? else {
            return Ok(());
        };

        let parent = match instance.parent_key {
            Some(parent_key) => Some(
                self.get_instance(parent_key)?
                    .ok_or(StateError::ParentNotFound { key, parent_key })?,
            ),
            None => None,
        };

        self.instances.delete_existing(self.db, &key)?;

        let orphaned_children: Vec<(Key, Key)> = self
            .parent_child
            .iter_prefix(&*self.db, &key)
            .map(|row| row.map(|(child, ())| child))
            .collect::<flowstate_db::Result<_>>()?;
        if !orphaned_children.is_empty() {
            debug!(
                key,
                children = orphaned_children.len(),
                "removing element instance that still has children"
            );
        }
        for child in orphaned_children {
            self.parent_child.delete_existing(self.db, &child)?;
        }

        self.remove_taken_sequence_flows(key)?;

        if let Some(mut parent) = parent {
            self.parent_child.delete_existing(self.db, &(parent.key, key))?;
            parent.child_count = parent.child_count.saturating_sub(1);
            self.instances.update(self.db, &parent.key, &parent)?;
        }

        debug!(key, "removed element instance");
        Ok(())
    }

    // ── Taken sequence flows ──

    /// Record that `sequence_flow_id` was taken towards the joining gateway.
    pub fn increment_number_of_taken_sequence_flows(
        &mut self,
        flow_scope_key: Key,
        gateway_id: &str,
        sequence_flow_id: &str,
    ) -> Result<()> {
        let key = (
            flow_scope_key,
            gateway_id.to_string(),
            sequence_flow_id.to_string(),
        );
        let count = self.taken_sequence_flows.get(&*self.db, &key)?.unwrap_or(0);
        self.taken_sequence_flows.upsert(self.db, &key, &(count + 1))?;
        Ok(())
    }

    /// Number of distinct incoming sequence flows taken towards the gateway.
    pub fn get_number_of_taken_sequence_flows(
        &self,
        flow_scope_key: Key,
        gateway_id: &str,
    ) -> Result<usize> {
        let prefix = (flow_scope_key, gateway_id.to_string());
        let mut count = 0;
        for row in self.taken_sequence_flows.iter_prefix(&*self.db, &prefix) {
            row?;
            count += 1;
        }
        Ok(count)
    }

    /// Consume one token per taken sequence flow once the gateway fired.
    pub fn decrement_number_of_taken_sequence_flows(
        &mut self,
        flow_scope_key: Key,
        gateway_id: &str,
    ) -> Result<()> {
        let prefix = (flow_scope_key, gateway_id.to_string());
        let rows: Vec<_> = self
            .taken_sequence_flows
            .iter_prefix(&*self.db, &prefix)
            .collect::<flowstate_db::Result<_>>()?;

        for (key, count) in rows {
            if count > 1 {
                self.taken_sequence_flows.update(self.db, &key, &(count - 1))?;
            } else {
                self.taken_sequence_flows.delete_existing(self.db, &key)?;
            }
        }
        Ok(())
    }

    fn remove_taken_sequence_flows(&mut self, flow_scope_key: Key) -> Result<()> {
        let keys: Vec<_> = self
            .taken_sequence_flows
            .iter_prefix(&*self.db, &flow_scope_key)
            .map(|row| row.map(|(key, _)| key))
            .collect::<flowstate_db::Result<_>>()?;
        for key in keys {
            self.taken_sequence_flows.delete_existing(self.db, &key)?;
        }
        Ok(())
    }
}
