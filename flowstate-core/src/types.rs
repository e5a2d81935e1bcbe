//! Record types persisted by the state containers.
//!
//! Every type here is stored as a `bincode` snapshot, so only ordered
//! collections are used and no field depends on wall-clock time at write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Scalar aliases ───────────────────────────────────────────

/// Partition-unique key assigned by the log.
pub type Key = i64;

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

// ─── Process instance records ─────────────────────────────────

/// BPMN element kinds the interpreter creates instances for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BpmnElementType {
    Process,
    SubProcess,
    EventSubProcess,
    StartEvent,
    IntermediateCatchEvent,
    IntermediateThrowEvent,
    BoundaryEvent,
    EndEvent,
    ServiceTask,
    UserTask,
    ReceiveTask,
    ExclusiveGateway,
    ParallelGateway,
    EventBasedGateway,
    InclusiveGateway,
    CallActivity,
    MultiInstanceBody,
    SequenceFlow,
}

/// Lifecycle of an element instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessInstanceIntent {
    ElementActivating,
    ElementActivated,
    ElementCompleting,
    ElementCompleted,
    ElementTerminating,
    ElementTerminated,
    SequenceFlowTaken,
}

impl ProcessInstanceIntent {
    pub fn is_final_state(&self) -> bool {
        matches!(self, Self::ElementCompleted | Self::ElementTerminated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ElementActivating => "ELEMENT_ACTIVATING",
            Self::ElementActivated => "ELEMENT_ACTIVATED",
            Self::ElementCompleting => "ELEMENT_COMPLETING",
            Self::ElementCompleted => "ELEMENT_COMPLETED",
            Self::ElementTerminating => "ELEMENT_TERMINATING",
            Self::ElementTerminated => "ELEMENT_TERMINATED",
            Self::SequenceFlowTaken => "SEQUENCE_FLOW_TAKEN",
        }
    }
}

impl std::fmt::Display for ProcessInstanceIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the BPMN execution record an element instance was created from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInstanceRecord {
    pub bpmn_process_id: String,
    pub version: i32,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub bpmn_element_type: BpmnElementType,
    /// Key of the enclosing flow scope, `-1` for the process itself.
    pub flow_scope_key: Key,
    pub tenant_id: String,
}

impl ProcessInstanceRecord {
    pub fn new(bpmn_process_id: impl Into<String>, element_id: impl Into<String>) -> Self {
        Self {
            bpmn_process_id: bpmn_process_id.into(),
            version: 1,
            process_definition_key: -1,
            process_instance_key: -1,
            element_id: element_id.into(),
            bpmn_element_type: BpmnElementType::Process,
            flow_scope_key: -1,
            tenant_id: String::new(),
        }
    }

    pub fn with_element_type(mut self, element_type: BpmnElementType) -> Self {
        self.bpmn_element_type = element_type;
        self
    }

    pub fn with_process_instance_key(mut self, key: Key) -> Self {
        self.process_instance_key = key;
        self
    }

    pub fn with_flow_scope_key(mut self, key: Key) -> Self {
        self.flow_scope_key = key;
        self
    }
}

// ─── Jobs ─────────────────────────────────────────────────────

/// A unit of work handed to an external worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_type: String,
    pub worker: String,
    pub retries: i32,
    /// Delay before a failed job becomes activatable again, `0` = immediately.
    pub retry_backoff: i64,
    /// Time the job failed; the backoff is measured from here.
    pub recurring_time: Timestamp,
    /// Activation deadline, `-1` while unset.
    pub deadline: Timestamp,
    pub custom_headers: BTreeMap<String, String>,
    /// Opaque variables document. Never persisted.
    pub variables: Vec<u8>,
    pub error_message: String,
    pub error_code: String,
    pub bpmn_process_id: String,
    pub element_id: String,
    pub process_instance_key: Key,
    pub element_instance_key: Key,
    pub tenant_id: String,
}

impl JobRecord {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            worker: String::new(),
            retries: 3,
            retry_backoff: 0,
            recurring_time: -1,
            deadline: -1,
            custom_headers: BTreeMap::new(),
            variables: Vec::new(),
            error_message: String::new(),
            error_code: String::new(),
            bpmn_process_id: String::new(),
            element_id: String::new(),
            process_instance_key: -1,
            element_instance_key: -1,
            tenant_id: String::new(),
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = worker.into();
        self
    }

    pub fn with_retries(mut self, retries: i32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff_ms: i64) -> Self {
        self.retry_backoff = backoff_ms;
        self
    }

    pub fn with_recurring_time(mut self, recurring_time: Timestamp) -> Self {
        self.recurring_time = recurring_time;
        self
    }

    pub fn with_deadline(mut self, deadline: Timestamp) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_variables(mut self, variables: impl Into<Vec<u8>>) -> Self {
        self.variables = variables.into();
        self
    }

    pub fn with_custom_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(key.into(), value.into());
        self
    }

    /// Time at which a backed-off job becomes activatable again.
    pub fn backoff_due_date(&self) -> Timestamp {
        self.recurring_time.saturating_add(self.retry_backoff)
    }

    /// Copy of the record as it is persisted: variables stripped.
    pub fn without_variables(&self) -> Self {
        Self {
            variables: Vec::new(),
            ..self.clone()
        }
    }
}

/// Persisted lifecycle state of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStateKind {
    Activatable,
    Activated,
    Failed,
    ErrorThrown,
    /// Never stored; reported for absent jobs.
    NotFound,
}

impl JobStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activatable => "ACTIVATABLE",
            Self::Activated => "ACTIVATED",
            Self::Failed => "FAILED",
            Self::ErrorThrown => "ERROR_THROWN",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl std::fmt::Display for JobStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ─── Incidents ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    Unknown,
    IoMappingError,
    JobNoRetries,
    ConditionError,
    ExtractValueError,
    CalledElementError,
    UnhandledErrorEvent,
    MessageSizeExceeded,
    CalledDecisionError,
    DecisionEvaluationError,
    FormNotFound,
    ResourceNotFound,
}

/// A failure blocking a job or an element instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub bpmn_process_id: String,
    pub process_definition_key: Key,
    pub process_instance_key: Key,
    pub element_id: String,
    pub element_instance_key: Key,
    /// Set for job incidents only.
    pub job_key: Option<Key>,
    pub variable_scope_key: Key,
    pub tenant_id: String,
}

impl IncidentRecord {
    /// Incident raised on an element instance (no job involved).
    pub fn for_element_instance(element_instance_key: Key, error_type: ErrorType) -> Self {
        Self {
            error_type,
            error_message: String::new(),
            bpmn_process_id: String::new(),
            process_definition_key: -1,
            process_instance_key: -1,
            element_id: String::new(),
            element_instance_key,
            job_key: None,
            variable_scope_key: element_instance_key,
            tenant_id: String::new(),
        }
    }

    /// Incident raised on a job, e.g. when it ran out of retries.
    pub fn for_job(job_key: Key, element_instance_key: Key, error_type: ErrorType) -> Self {
        Self {
            job_key: Some(job_key),
            ..Self::for_element_instance(element_instance_key, error_type)
        }
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    pub fn is_job_incident(&self) -> bool {
        self.job_key.is_some()
    }
}
