use thiserror::Error;

use crate::device::DeviceError;
use crate::domain::{Parameter, TaskKind};
use crate::ports::store::StoreError;

/// Crate-level error.
///
/// Variants are grouped by how the boundary reports them: bad input,
/// conflicts (dedup and resource gates), the legacy not-queued shape, and
/// internal device/store failures.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown parameter {0:?}")]
    UnknownParameter(String),

    #[error("invalid schedule for {param}: {reason}")]
    InvalidSchedule { param: Parameter, reason: String },

    #[error("task for {0} already in progress")]
    DuplicateInProgress(TaskKind),

    #[error("task for {0} already queued")]
    DuplicateQueued(TaskKind),

    #[error("no queued task for {0}")]
    NotQueued(TaskKind),

    #[error("task for {0} is running and cannot be canceled")]
    TaskRunning(TaskKind),

    #[error("not enough {0} reagent for a test")]
    ReagentDepleted(Parameter),

    #[error("waste tank would exceed its threshold")]
    WasteFull,

    #[error("analyzer is busy; the queue must be empty")]
    AnalyzerBusy,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("record codec: {0}")]
    Codec(#[from] serde_json::Error),
}
