//! Process execution state store.
//!
//! The stream processor of a partition applies one log record at a time and
//! reads and mutates five state containers while doing so:
//!
//! - [`ElementInstanceState`]: the element instance tree with child counts
//! - [`JobState`]: job lifecycle with activatable/deadline/backoff indices
//! - [`IncidentState`]: incidents indexed by job and element instance
//! - [`EventScopeInstanceState`]: accepting flags and trigger queues
//! - [`TimerInstanceState`]: timers ordered by due date
//!
//! Containers are short-lived views borrowing a [`KeyValueStore`]; they never
//! call each other. [`ProcessingState`] owns the store and hands the views out,
//! and runs one record's application inside a [`Transaction`].
//!
//! ```
//! use flowstate_core::{JobRecord, JobStateKind, ProcessingState};
//! use flowstate_db::MemoryStore;
//!
//! let mut state = ProcessingState::new(MemoryStore::new());
//! state
//!     .transaction(|state| state.jobs().create(1, &JobRecord::new("payment")))
//!     .unwrap();
//! assert_eq!(state.jobs().get_state(1).unwrap(), JobStateKind::Activatable);
//! ```
//!
//! [`KeyValueStore`]: flowstate_db::KeyValueStore
//! [`Transaction`]: flowstate_db::Transaction

pub mod config;
pub mod element_instance;
pub mod error;
pub mod event_scope;
pub mod incident;
pub mod job;
pub mod processing_state;
pub mod timer;
pub mod types;

pub use config::StateConfig;
pub use element_instance::{ElementInstance, ElementInstanceState};
pub use error::{Result, StateError};
pub use event_scope::{EventScopeInstance, EventScopeInstanceState, EventTrigger};
pub use incident::IncidentState;
pub use job::JobState;
pub use processing_state::ProcessingState;
pub use timer::{TimerInstance, TimerInstanceState};
pub use types::{
    BpmnElementType, ErrorType, IncidentRecord, JobRecord, JobStateKind, Key,
    ProcessInstanceIntent, ProcessInstanceRecord, Timestamp,
};
