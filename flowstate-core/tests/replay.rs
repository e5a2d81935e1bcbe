//! Replaying the same records must produce byte-identical state.

mod common;

use flowstate_core::{
    ErrorType, IncidentRecord, JobRecord, Key, ProcessInstanceIntent, ProcessInstanceRecord,
    ProcessingState, StateError, TimerInstance,
};
use flowstate_db::{KeyValueStore, MemoryStore};

const NOW: i64 = 1_700_000_000_000;

/// One process instance with a service task, a boundary timer, an event
/// scope and a job that runs out of retries.
fn apply_records<S: KeyValueStore>(state: &mut ProcessingState<S>) -> Result<(), StateError> {
    state.transaction(|state| {
        let mut elements = state.element_instances();
        let mut process = elements.new_instance(
            1,
            ProcessInstanceRecord::new("order", "order").with_process_instance_key(1),
            ProcessInstanceIntent::ElementActivated,
        )?;
        elements.new_child_instance(
            &mut process,
            2,
            ProcessInstanceRecord::new("order", "charge").with_flow_scope_key(1),
            ProcessInstanceIntent::ElementActivated,
        )?;
        state.event_scopes().create_if_not_exists(2, ["timeout"])?;
        state
            .timers()
            .store(&TimerInstance::new(3, 2, NOW + 60_000).with_handler_node_id("timeout"))?;
        Ok::<_, StateError>(())
    })?;

    state.transaction(|state| {
        let job = JobRecord::new("charge-card")
            .with_retries(1)
            .with_deadline(NOW + 30_000)
            .with_variables(b"{\"card\":\"4111\"}".to_vec());
        state.jobs().create(4, &job)?;
        state.jobs().activate(4, &job.clone().with_worker("worker-1"))?;
        state.jobs().fail(4, &job.with_retries(0))?;
        state.incidents().create_incident(
            5,
            &IncidentRecord::for_job(4, 2, ErrorType::JobNoRetries).with_error_message("declined"),
        )
    })?;

    state.transaction(|state| {
        let next = state.timers().find_timers_with_due_date_before(NOW + 60_001, |timer| {
            timer.key == 3
        })?;
        assert_eq!(next, None);
        let timer = state.timers().get(2, 3)?.expect("timer stored");
        state.timers().remove(&timer)?;
        let fired = state.event_scopes().trigger_event(2, 6, "timeout", &[])?;
        assert!(fired);
        Ok(())
    })
}

#[test]
fn test_replay_yields_identical_digest() {
    let mut first = common::memory_state();
    let mut second = common::memory_state();
    apply_records(&mut first).unwrap();
    apply_records(&mut second).unwrap();

    assert_eq!(first.digest().unwrap(), second.digest().unwrap());
    assert_ne!(
        first.digest().unwrap(),
        ProcessingState::new(MemoryStore::new()).digest().unwrap()
    );
    assert_eq!(first.take_jobs_available(), vec!["charge-card".to_string()]);
}

#[test]
fn test_failed_record_leaves_state_untouched() {
    let mut state = common::memory_state();
    apply_records(&mut state).unwrap();
    let before = state.digest().unwrap();
    state.take_jobs_available();

    let err = state
        .transaction(|state| {
            state.jobs().create(10, &JobRecord::new("refund"))?;
            state.incidents().delete_incident(5)?;
            state.element_instances().remove_instance(2)?;
            state.jobs().activate(10, &JobRecord::new("refund"))
        })
        .unwrap_err();

    assert!(matches!(err, StateError::InvalidDeadline { key: 10, .. }));
    assert_eq!(state.digest().unwrap(), before);
    assert!(state.take_jobs_available().is_empty());
    assert_eq!(state.incidents().get_job_incident_key(4).unwrap(), Some(5));
}

#[test]
fn test_interrupting_trigger_then_non_interrupting() {
    let mut state = common::memory_state();
    let mut scopes = state.event_scopes();
    scopes.create_if_not_exists(7, ["foo"]).unwrap();

    assert!(scopes.trigger_event(7, 1, "foo", b"first").unwrap());
    assert!(!scopes.get_instance(7).unwrap().unwrap().is_accepting());
    assert!(scopes.trigger_event(7, 2, "bar", b"second").unwrap());

    let polled: Vec<(String, Key)> = std::iter::from_fn(|| scopes.poll_event_trigger(7).unwrap())
        .map(|trigger| (trigger.element_id, trigger.event_key))
        .collect();
    assert_eq!(polled, vec![("foo".to_string(), 1), ("bar".to_string(), 2)]);
}

#[test]
fn test_timer_scan_reports_next_wakeup() {
    let mut state = common::memory_state();
    for (key, due_date) in [(1, 1000), (2, 2000), (3, 3000)] {
        state
            .timers()
            .store(&TimerInstance::new(key, 100, due_date))
            .unwrap();
    }

    let mut fired = Vec::new();
    let next = state
        .timers()
        .find_timers_with_due_date_before(2000, |timer| {
            fired.push(timer.key);
            true
        })
        .unwrap();
    assert_eq!(fired, vec![1]);
    assert_eq!(next, Some(2000));
}
