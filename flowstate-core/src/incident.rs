//! Incidents and their two foreign-key indices.
//!
//! A job incident is indexed by job key, every other incident by element
//! instance key. The indices map the foreign key to the incident key.

use flowstate_db::{ConsistencyChecks, KeyValueStore, TypedColumn};
use tracing::debug;

use crate::error::Result;
use crate::types::{IncidentRecord, Key};

pub struct IncidentState<'a, S: KeyValueStore> {
    db: &'a mut S,
    incidents: TypedColumn<Key, IncidentRecord>,
    job_incidents: TypedColumn<Key, Key>,
    process_instance_incidents: TypedColumn<Key, Key>,
}

impl<'a, S: KeyValueStore> IncidentState<'a, S> {
    pub fn new(db: &'a mut S, checks: ConsistencyChecks) -> Self {
        use flowstate_db::ColumnFamily as Cf;
        Self {
            db,
            incidents: TypedColumn::new(Cf::Incidents, checks),
            job_incidents: TypedColumn::new(Cf::IncidentJobs, checks),
            process_instance_incidents: TypedColumn::new(Cf::IncidentProcessInstances, checks),
        }
    }

    /// Persist a snapshot of `record` and index it by its job key, or by its
    /// element instance key when no job is involved.
    pub fn create_incident(&mut self, key: Key, record: &IncidentRecord) -> Result<()> {
        self.incidents.insert(self.db, &key, record)?;
        match record.job_key {
            Some(job_key) => self.job_incidents.upsert(self.db, &job_key, &key)?,
            None => self.process_instance_incidents.upsert(
                self.db,
                &record.element_instance_key,
                &key,
            )?,
        }
        debug!(
            key,
            error_type = ?record.error_type,
            job_key = ?record.job_key,
            element_instance_key = record.element_instance_key,
            "created incident"
        );
        Ok(())
    }

    /// Remove the incident and the index row that was written for it.
    pub fn delete_incident(&mut self, key: Key) -> Result<()> {
        let Some(record) = self.get_incident_record(key)? else {
            return Ok(());
        };
        match record.job_key {
            Some(job_key) => self.job_incidents.delete_if_exists(self.db, &job_key)?,
            None => self
                .process_instance_incidents
                .delete_if_exists(self.db, &record.element_instance_key)?,
        }
        self.incidents.delete_existing(self.db, &key)?;
        debug!(key, "deleted incident");
        Ok(())
    }

    pub fn get_incident_record(&self, key: Key) -> Result<Option<IncidentRecord>> {
        Ok(self.incidents.get(&*self.db, &key)?)
    }

    pub fn get_job_incident_key(&self, job_key: Key) -> Result<Option<Key>> {
        Ok(self.job_incidents.get(&*self.db, &job_key)?)
    }

    pub fn get_process_instance_incident_key(
        &self,
        element_instance_key: Key,
    ) -> Result<Option<Key>> {
        Ok(self
            .process_instance_incidents
            .get(&*self.db, &element_instance_key)?)
    }

    pub fn is_job_incident(&self, record: &IncidentRecord) -> bool {
        record.is_job_incident()
    }

    /// Call `visitor` with the incident raised on `element_instance_key`, if
    /// any. Returns whether an incident was found.
    pub fn for_existing_process_incident<F>(
        &self,
        element_instance_key: Key,
        visitor: F,
    ) -> Result<bool>
    where
        F: FnOnce(Key, &IncidentRecord),
    {
        let Some(key) = self.get_process_instance_incident_key(element_instance_key)? else {
            return Ok(false);
        };
        match self.get_incident_record(key)? {
            Some(record) => {
                visitor(key, &record);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
