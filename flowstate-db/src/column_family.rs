use serde::{Deserialize, Serialize};

/// Every namespace the state store writes to.
///
/// The order of [`ColumnFamily::ALL`] is part of the replay digest and must
/// not be reordered; append new families at the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnFamily {
    // ── Element instances ──
    ElementInstanceKey,
    ElementInstanceParentChild,
    NumberOfTakenSequenceFlows,

    // ── Jobs ──
    Jobs,
    JobStates,
    JobActivatable,
    JobDeadlines,
    JobBackoff,

    // ── Incidents ──
    Incidents,
    IncidentJobs,
    IncidentProcessInstances,

    // ── Event scopes ──
    EventScope,
    EventTrigger,

    // ── Timers ──
    TimerKeys,
    TimerDueDates,
}

impl ColumnFamily {
    pub const ALL: [ColumnFamily; 15] = [
        ColumnFamily::ElementInstanceKey,
        ColumnFamily::ElementInstanceParentChild,
        ColumnFamily::NumberOfTakenSequenceFlows,
        ColumnFamily::Jobs,
        ColumnFamily::JobStates,
        ColumnFamily::JobActivatable,
        ColumnFamily::JobDeadlines,
        ColumnFamily::JobBackoff,
        ColumnFamily::Incidents,
        ColumnFamily::IncidentJobs,
        ColumnFamily::IncidentProcessInstances,
        ColumnFamily::EventScope,
        ColumnFamily::EventTrigger,
        ColumnFamily::TimerKeys,
        ColumnFamily::TimerDueDates,
    ];

    /// Stable name, used as the RocksDB column family name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementInstanceKey => "element_instance_key",
            Self::ElementInstanceParentChild => "element_instance_parent_child",
            Self::NumberOfTakenSequenceFlows => "number_of_taken_sequence_flows",
            Self::Jobs => "jobs",
            Self::JobStates => "job_states",
            Self::JobActivatable => "job_activatable",
            Self::JobDeadlines => "job_deadlines",
            Self::JobBackoff => "job_backoff",
            Self::Incidents => "incidents",
            Self::IncidentJobs => "incident_jobs",
            Self::IncidentProcessInstances => "incident_process_instances",
            Self::EventScope => "event_scope",
            Self::EventTrigger => "event_trigger",
            Self::TimerKeys => "timer_keys",
            Self::TimerDueDates => "timer_due_dates",
        }
    }
}

impl std::fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
