use serde::{Deserialize, Serialize};

use super::TaskKind;

/// A single queued unit of device work.
///
/// `ts` (enqueue time, seconds since epoch) is the sole ordering key; `id` is
/// the store-assigned key and breaks ties. Tasks are created by enqueue and
/// deleted at dequeue or cancel, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "param")]
    pub kind: TaskKind,
    pub code: u8,
    pub ts: i64,
}

impl Task {
    pub fn new(kind: TaskKind, ts: i64) -> Self {
        Self {
            id: String::new(),
            kind,
            code: kind.opcode(),
            ts,
        }
    }
}
