//! One partition's state store: the store itself, its configuration and the
//! container views the stream processor works through.

use std::collections::BTreeSet;

use flowstate_db::{ConsistencyChecks, KeyValueStore, Transaction};
use tracing::{debug, warn};

use crate::config::StateConfig;
use crate::element_instance::ElementInstanceState;
use crate::error::{Result, StateError};
use crate::event_scope::EventScopeInstanceState;
use crate::incident::IncidentState;
use crate::job::JobState;
use crate::timer::TimerInstanceState;

pub struct ProcessingState<S: KeyValueStore> {
    db: S,
    config: StateConfig,
    /// Job types made activatable since the last `take_jobs_available`.
    jobs_available: BTreeSet<String>,
}

impl<S: KeyValueStore> ProcessingState<S> {
    pub fn new(db: S) -> Self {
        Self::with_config(db, StateConfig::default())
    }

    pub fn with_config(db: S, config: StateConfig) -> Self {
        debug!(partition_id = config.partition_id, "opened processing state");
        Self {
            db,
            config,
            jobs_available: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn partition_id(&self) -> u32 {
        self.config.partition_id
    }

    pub fn db(&self) -> &S {
        &self.db
    }

    pub fn into_inner(self) -> S {
        self.db
    }

    fn checks(&self) -> ConsistencyChecks {
        self.config.consistency_checks
    }

    // ── Container views ──

    pub fn element_instances(&mut self) -> ElementInstanceState<'_, S> {
        let checks = self.checks();
        ElementInstanceState::new(&mut self.db, checks)
    }

    pub fn jobs(&mut self) -> JobState<'_, S> {
        let checks = self.checks();
        JobState::new(&mut self.db, checks, &mut self.jobs_available)
    }

    pub fn incidents(&mut self) -> IncidentState<'_, S> {
        let checks = self.checks();
        IncidentState::new(&mut self.db, checks)
    }

    pub fn event_scopes(&mut self) -> EventScopeInstanceState<'_, S> {
        let checks = self.checks();
        EventScopeInstanceState::new(&mut self.db, checks)
    }

    pub fn timers(&mut self) -> TimerInstanceState<'_, S> {
        let checks = self.checks();
        TimerInstanceState::new(&mut self.db, checks)
    }

    // ── Record application ──

    /// Apply one record's mutations as a unit.
    ///
    /// `apply` works on a state backed by a [`Transaction`] over this store.
    /// On `Ok` the buffered writes are committed as one batch; on `Err` they
    /// are discarded together with any jobs-available notifications.
    pub fn transaction<T, E, F>(&mut self, apply: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut ProcessingState<Transaction<'_, S>>) -> std::result::Result<T, E>,
        E: From<StateError>,
    {
        let mut inner = ProcessingState {
            db: Transaction::new(&mut self.db),
            config: self.config.clone(),
            jobs_available: BTreeSet::new(),
        };
        match apply(&mut inner) {
            Ok(value) => {
                let ProcessingState {
                    db, jobs_available, ..
                } = inner;
                debug!(writes = db.pending_writes(), "committing record application");
                db.commit().map_err(StateError::from)?;
                self.jobs_available.extend(jobs_available);
                Ok(value)
            }
            Err(e) => {
                warn!(
                    writes = inner.db.pending_writes(),
                    "record application failed, rolling back"
                );
                inner.db.rollback();
                Err(e)
            }
        }
    }

    /// Drain the job types that became activatable, in sorted order.
    pub fn take_jobs_available(&mut self) -> Vec<String> {
        std::mem::take(&mut self.jobs_available).into_iter().collect()
    }

    /// SHA-256 over every column family; equal for equal store contents.
    pub fn digest(&self) -> Result<[u8; 32]> {
        Ok(flowstate_db::digest::state_digest(&self.db)?)
    }
}

#[cfg(feature = "rocksdb")]
impl ProcessingState<flowstate_db::RocksDbStore> {
    /// Open (or create) the on-disk store at `path`.
    pub fn open(path: &std::path::Path, config: StateConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let tuning = config.rocksdb.clone().unwrap_or_default();
        let db = flowstate_db::RocksDbStore::open_with_config(path, &tuning)
            .with_context(|| format!("Opening state store at {}", path.display()))?;
        Ok(Self::with_config(db, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JobRecord, ProcessInstanceIntent, ProcessInstanceRecord};
    use flowstate_db::MemoryStore;

    #[test]
    fn test_transaction_commits_on_ok() {
        let mut state = ProcessingState::new(MemoryStore::new());
        state
            .transaction(|state| -> Result<()> {
                state.element_instances().new_instance(
                    1,
                    ProcessInstanceRecord::new("process", "process"),
                    ProcessInstanceIntent::ElementActivating,
                )?;
                state.jobs().create(2, &JobRecord::new("payment"))?;
                Ok(())
            })
            .unwrap();

        assert!(state.element_instances().get_instance(1).unwrap().is_some());
        assert!(state.jobs().exists(2).unwrap());
        assert_eq!(state.take_jobs_available(), vec!["payment".to_string()]);
        assert!(state.take_jobs_available().is_empty());
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let mut state = ProcessingState::new(MemoryStore::new());
        state.jobs().create(1, &JobRecord::new("existing")).unwrap();
        state.take_jobs_available();
        let before = state.digest().unwrap();

        let err = state
            .transaction(|state| -> Result<()> {
                state.jobs().create(2, &JobRecord::new("payment"))?;
                state.jobs().create(3, &JobRecord::new(""))?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, StateError::EmptyJobType { key: 3, .. }));
        assert_eq!(state.digest().unwrap(), before);
        assert!(!state.jobs().exists(2).unwrap());
        assert!(state.take_jobs_available().is_empty());
    }

    #[test]
    fn test_preconditions_follow_config() {
        let config = StateConfig::default().with_preconditions(false);
        let mut state = ProcessingState::with_config(MemoryStore::new(), config);
        state.jobs().create(1, &JobRecord::new("a")).unwrap();
        state.jobs().create(1, &JobRecord::new("a")).unwrap();

        let mut strict = ProcessingState::new(MemoryStore::new());
        strict.jobs().create(1, &JobRecord::new("a")).unwrap();
        assert!(matches!(
            strict.jobs().create(1, &JobRecord::new("a")),
            Err(StateError::Db(flowstate_db::DbError::KeyExists { .. }))
        ));
    }
}
