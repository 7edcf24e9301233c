use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the five measurable analytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parameter {
    Ca,
    Alk,
    Mg,
    No3,
    Po4,
}

impl Parameter {
    pub const ALL: [Parameter; 5] = [
        Parameter::Ca,
        Parameter::Alk,
        Parameter::Mg,
        Parameter::No3,
        Parameter::Po4,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Parameter::Ca => "ca",
            Parameter::Alk => "alk",
            Parameter::Mg => "mg",
            Parameter::No3 => "no3",
            Parameter::Po4 => "po4",
        }
    }

    /// Uppercase form used as the prefix of activity log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Parameter::Ca => "CA",
            Parameter::Alk => "ALK",
            Parameter::Mg => "MG",
            Parameter::No3 => "NO3",
            Parameter::Po4 => "PO4",
        }
    }

    pub fn parse(s: &str) -> Option<Parameter> {
        Parameter::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Position within the opcode families (ca=0 .. po4=4).
    fn index(&self) -> u8 {
        match self {
            Parameter::Ca => 0,
            Parameter::Alk => 1,
            Parameter::Mg => 2,
            Parameter::No3 => 3,
            Parameter::Po4 => 4,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of device work, identified in the queue and on the HTTP surface by
/// its `param` string form: `ca`, `pump`, `cal_ca`, `flush_ca`, ...
///
/// The opcode families are fixed by the device firmware; `opcode()` yields
/// the byte that starts the action and `factor_opcode()` the byte that reads
/// back the calibration factor, for the kinds that have one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TaskKind {
    Test(Parameter),
    PumpCalibration,
    Calibration(Parameter),
    Flush(Parameter),
}

impl TaskKind {
    /// Opcode written as the first byte of the transaction that starts this
    /// action.
    pub fn opcode(&self) -> u8 {
        match self {
            TaskKind::Test(p) => 0x11 + p.index(),
            TaskKind::PumpCalibration => 0x21,
            TaskKind::Calibration(p) => 0x22 + p.index(),
            TaskKind::Flush(p) => 0x27 + p.index(),
        }
    }

    /// Opcode that reads back the calibration factor this action affects.
    pub fn factor_opcode(&self) -> Option<u8> {
        match self {
            TaskKind::PumpCalibration => Some(0x35),
            TaskKind::Calibration(p) => Some(0x36 + p.index()),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<TaskKind> {
        if s == "pump" {
            return Some(TaskKind::PumpCalibration);
        }
        if let Some(rest) = s.strip_prefix("cal_") {
            return Parameter::parse(rest).map(TaskKind::Calibration);
        }
        if let Some(rest) = s.strip_prefix("flush_") {
            return Parameter::parse(rest).map(TaskKind::Flush);
        }
        Parameter::parse(s).map(TaskKind::Test)
    }

    /// Uppercase form used as the prefix of activity log lines.
    pub fn label(&self) -> String {
        self.to_string().to_uppercase()
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Test(p) => f.write_str(p.as_str()),
            TaskKind::PumpCalibration => f.write_str("pump"),
            TaskKind::Calibration(p) => write!(f, "cal_{p}"),
            TaskKind::Flush(p) => write!(f, "flush_{p}"),
        }
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for TaskKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        TaskKind::parse(&s).ok_or_else(|| format!("unknown task param {s:?}"))
    }
}
