use serde::{Deserialize, Serialize};

use super::Parameter;

/// A persisted measurement. Append-only; never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(default)]
    pub id: String,
    pub param: Parameter,
    pub ts: i64,
    pub value: f32,
}

impl Reading {
    pub fn new(param: Parameter, ts: i64, value: f32) -> Self {
        Self {
            id: String::new(),
            param,
            ts,
            value,
        }
    }
}
