//! Job lifecycle and its secondary indices.
//!
//! Rows:
//! - `Jobs`: key → [`JobRecord`] (variables always stripped)
//! - `JobStates`: key → [`JobStateKind`]
//! - `JobActivatable`: (job type, key) → ()
//! - `JobDeadlines`: (deadline, key) → ()
//! - `JobBackoff`: (recurring time + retry backoff, key) → ()
//!
//! A job is in at most one of the three secondary indices. Every transition
//! first drops the index rows derived from the *stored* record, then writes
//! the new record and the single index row its target state calls for.

use std::collections::BTreeSet;

use flowstate_db::{ConsistencyChecks, KeyValueStore, TypedColumn};
use tracing::{debug, trace, warn};

use crate::error::{Result, StateError};
use crate::types::{JobRecord, JobStateKind, Key, Timestamp};

/// Which secondary index a transition leaves the job in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JobIndex {
    None,
    Activatable,
    Deadline,
    Backoff,
}

/// View over the job rows of one store.
pub struct JobState<'a, S: KeyValueStore> {
    db: &'a mut S,
    jobs: TypedColumn<Key, JobRecord>,
    states: TypedColumn<Key, JobStateKind>,
    activatable: TypedColumn<(String, Key), ()>,
    deadlines: TypedColumn<(Timestamp, Key), ()>,
    backoff: TypedColumn<(Timestamp, Key), ()>,
    checks: ConsistencyChecks,
    jobs_available: &'a mut BTreeSet<String>,
}

impl<'a, S: KeyValueStore> JobState<'a, S> {
    /// `jobs_available` collects the type of every job made activatable.
    pub fn new(
        db: &'a mut S,
        checks: ConsistencyChecks,
        jobs_available: &'a mut BTreeSet<String>,
    ) -> Self {
        use flowstate_db::ColumnFamily as Cf;
        Self {
            db,
            jobs: TypedColumn::new(Cf::Jobs, checks),
            states: TypedColumn::new(Cf::JobStates, checks),
            activatable: TypedColumn::new(Cf::JobActivatable, checks),
            deadlines: TypedColumn::new(Cf::JobDeadlines, checks),
            backoff: TypedColumn::new(Cf::JobBackoff, checks),
            checks,
            jobs_available,
        }
    }

    // ── Transitions ──

    pub fn create(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "create")?;
        // Without preconditions a re-create overwrites, so drop the old index row.
        if !self.checks.enable_preconditions {
            self.remove_from_indices(key)?;
        }
        let persisted = record.without_variables();
        self.jobs.insert(self.db, &key, &persisted)?;
        self.states
            .insert(self.db, &key, &JobStateKind::Activatable)?;
        self.add_to_index(key, &persisted, JobIndex::Activatable)?;
        debug!(key, job_type = %persisted.job_type, "created job");
        Ok(())
    }

    pub fn activate(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "activate")?;
        require_deadline(key, record, "activate")?;
        self.transition(key, record, JobStateKind::Activated, JobIndex::Deadline)
    }

    pub fn complete(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "complete")?;
        self.delete(key)
    }

    pub fn cancel(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "cancel")?;
        self.delete(key)
    }

    /// Fail an activated job.
    ///
    /// With retries left and no backoff the job goes straight back to
    /// ACTIVATABLE without passing through FAILED. With a backoff it is FAILED
    /// and indexed until `recurring_time + retry_backoff`. Without retries it
    /// is FAILED and in no index.
    pub fn fail(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "fail")?;
        if record.retries > 0 {
            if record.retry_backoff > 0 {
                self.transition(key, record, JobStateKind::Failed, JobIndex::Backoff)
            } else {
                self.transition(key, record, JobStateKind::Activatable, JobIndex::Activatable)
            }
        } else {
            self.transition(key, record, JobStateKind::Failed, JobIndex::None)
        }
    }

    pub fn timeout(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "timeout")?;
        require_deadline(key, record, "timeout")?;
        self.transition(key, record, JobStateKind::Activatable, JobIndex::Activatable)
    }

    /// Make a failed job activatable again after its incident was resolved.
    pub fn resolve(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "resolve")?;
        self.transition(key, record, JobStateKind::Activatable, JobIndex::Activatable)
    }

    /// Make a backed-off job activatable once its backoff elapsed. An empty
    /// type on `record` falls back to the stored type; unknown jobs are ignored.
    pub fn recur_after_backoff(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        let Some(stored) = self.get_job(key)? else {
            return Ok(());
        };
        let mut record = record.clone();
        if record.job_type.is_empty() {
            record.job_type = stored.job_type;
        }
        self.transition(key, &record, JobStateKind::Activatable, JobIndex::Activatable)
    }

    pub fn disable(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "disable")?;
        self.transition(key, record, JobStateKind::Failed, JobIndex::None)
    }

    pub fn throw_error(&mut self, key: Key, record: &JobRecord) -> Result<()> {
        require_type(key, record, "throw error")?;
        self.transition(key, record, JobStateKind::ErrorThrown, JobIndex::None)
    }

    /// Overwrite the retries of a stored job. Returns the updated record.
    pub fn update_job_retries(&mut self, key: Key, retries: i32) -> Result<Option<JobRecord>> {
        let Some(mut job) = self.get_job(key)? else {
            return Ok(None);
        };
        job.retries = retries;
        self.jobs.update(self.db, &key, &job)?;
        debug!(key, retries, "updated job retries");
        Ok(Some(job))
    }

    // ── Queries ──

    pub fn exists(&self, key: Key) -> Result<bool> {
        Ok(self.jobs.exists(&*self.db, &key)?)
    }

    pub fn get_state(&self, key: Key) -> Result<JobStateKind> {
        Ok(self
            .states
            .get(&*self.db, &key)?
            .unwrap_or(JobStateKind::NotFound))
    }

    pub fn is_in_state(&self, key: Key, state: JobStateKind) -> Result<bool> {
        Ok(self.get_state(key)? == state)
    }

    pub fn get_job(&self, key: Key) -> Result<Option<JobRecord>> {
        Ok(self.jobs.get(&*self.db, &key)?)
    }

    /// Activatable jobs of `job_type` in ascending key order.
    pub fn activatable_jobs<'s>(
        &'s self,
        job_type: &str,
    ) -> impl Iterator<Item = Result<(Key, JobRecord)>> + 's {
        let db: &'s S = &*self.db;
        let jobs = self.jobs;
        self.activatable
            .iter_prefix(db, &job_type.to_string())
            .filter_map(move |row| resolve_job(jobs, db, row.map(|((_, key), ())| key)))
    }

    /// Activated jobs whose deadline is before `since`, by ascending deadline.
    pub fn timed_out_jobs<'s>(
        &'s self,
        since: Timestamp,
    ) -> impl Iterator<Item = Result<(Key, JobRecord)>> + 's {
        let db: &'s S = &*self.db;
        let jobs = self.jobs;
        self.deadlines
            .iter(db)
            .take_while(move |row| match row {
                Ok(((deadline, _), ())) => *deadline < since,
                Err(_) => true,
            })
            .filter_map(move |row| resolve_job(jobs, db, row.map(|((_, key), ())| key)))
    }

    /// Backed-off jobs whose backoff elapses before `since`, by ascending
    /// backoff due date.
    pub fn backed_off_jobs<'s>(
        &'s self,
        since: Timestamp,
    ) -> impl Iterator<Item = Result<(Key, JobRecord)>> + 's {
        let db: &'s S = &*self.db;
        let jobs = self.jobs;
        self.backoff
            .iter(db)
            .take_while(move |row| match row {
                Ok(((due, _), ())) => *due < since,
                Err(_) => true,
            })
            .filter_map(move |row| resolve_job(jobs, db, row.map(|((_, key), ())| key)))
    }

    /// Visit activatable jobs of `job_type` until the visitor returns `false`.
    pub fn for_each_activatable_job<F>(&self, job_type: &str, mut visitor: F) -> Result<()>
    where
        F: FnMut(Key, &JobRecord) -> bool,
    {
        for job in self.activatable_jobs(job_type) {
            let (key, record) = job?;
            if !visitor(key, &record) {
                break;
            }
        }
        Ok(())
    }

    /// Visit activated jobs with a deadline before `since` until the visitor
    /// returns `false`. The first entry at or after `since` is not visited.
    pub fn for_each_timed_out_entry<F>(&self, since: Timestamp, mut visitor: F) -> Result<()>
    where
        F: FnMut(Key, &JobRecord) -> bool,
    {
        for job in self.timed_out_jobs(since) {
            let (key, record) = job?;
            if !visitor(key, &record) {
                break;
            }
        }
        Ok(())
    }

    /// Visit backed-off jobs due before `since` until the visitor returns
    /// `false`. Returns the due date of the first entry not consumed, i.e. the
    /// next backoff wakeup, or `None` when every entry was consumed.
    pub fn find_backed_off_jobs<F>(
        &self,
        since: Timestamp,
        mut visitor: F,
    ) -> Result<Option<Timestamp>>
    where
        F: FnMut(Key, &JobRecord) -> bool,
    {
        for row in self.backoff.iter(&*self.db) {
            let ((due, key), ()) = row?;
            if due < since {
                let consumed = match self.jobs.get(&*self.db, &key)? {
                    Some(job) => visitor(key, &job),
                    None => true,
                };
                if consumed {
                    continue;
                }
            }
            trace!(due, since, "next backoff due date");
            return Ok(Some(due));
        }
        Ok(None)
    }

    // ── Internals ──

    fn transition(
        &mut self,
        key: Key,
        record: &JobRecord,
        state: JobStateKind,
        index: JobIndex,
    ) -> Result<()> {
        let persisted = record.without_variables();
        self.remove_from_indices(key)?;
        self.jobs.upsert(self.db, &key, &persisted)?;
        self.states.upsert(self.db, &key, &state)?;
        self.add_to_index(key, &persisted, index)?;
        debug!(key, job_type = %persisted.job_type, %state, "job transition");
        Ok(())
    }

    fn delete(&mut self, key: Key) -> Result<()> {
        if !self.exists(key)? {
            return Ok(());
        }
        self.remove_from_indices(key)?;
        self.jobs.delete_existing(self.db, &key)?;
        self.states.delete_if_exists(self.db, &key)?;
        debug!(key, "deleted job");
        Ok(())
    }

    /// Drop every index row derivable from the stored record.
    fn remove_from_indices(&mut self, key: Key) -> Result<()> {
        let Some(stored) = self.get_job(key)? else {
            return Ok(());
        };
        self.activatable
            .delete_if_exists(self.db, &(stored.job_type.clone(), key))?;
        self.deadlines
            .delete_if_exists(self.db, &(stored.deadline, key))?;
        self.backoff
            .delete_if_exists(self.db, &(stored.backoff_due_date(), key))?;
        Ok(())
    }

    fn add_to_index(&mut self, key: Key, record: &JobRecord, index: JobIndex) -> Result<()> {
        match index {
            JobIndex::None => {}
            JobIndex::Activatable => {
                self.activatable
                    .upsert(self.db, &(record.job_type.clone(), key), &())?;
                self.jobs_available.insert(record.job_type.clone());
            }
            JobIndex::Deadline => {
                self.deadlines.upsert(self.db, &(record.deadline, key), &())?;
            }
            JobIndex::Backoff => {
                self.backoff
                    .upsert(self.db, &(record.backoff_due_date(), key), &())?;
            }
        }
        Ok(())
    }
}

fn resolve_job<S: KeyValueStore + ?Sized>(
    jobs: TypedColumn<Key, JobRecord>,
    db: &S,
    key: flowstate_db::Result<Key>,
) -> Option<Result<(Key, JobRecord)>> {
    let lookup = key.and_then(|key| Ok(jobs.get(db, &key)?.map(|job| (key, job))));
    match lookup {
        Ok(Some(job)) => Some(Ok(job)),
        Ok(None) => None,
        Err(e) => Some(Err(e.into())),
    }
}

fn require_type(key: Key, record: &JobRecord, operation: &'static str) -> Result<()> {
    if record.job_type.is_empty() {
        warn!(key, operation, "rejected job transition without type");
        return Err(StateError::EmptyJobType { key, operation });
    }
    Ok(())
}

fn require_deadline(key: Key, record: &JobRecord, operation: &'static str) -> Result<()> {
    if record.deadline <= 0 {
        warn!(
            key,
            operation,
            deadline = record.deadline,
            "rejected job transition without deadline"
        );
        return Err(StateError::InvalidDeadline {
            key,
            operation,
            deadline: record.deadline,
        });
    }
    Ok(())
}
