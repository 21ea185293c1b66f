use crate::classifier::CrashSignature;
use crate::state::TargetState;
use crate::types::SessionKey;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Result of one command invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    /// Transcript with the echoed command and trailing prompt removed.
    pub output: String,
    /// The idle marker never appeared; `output` is partial.
    pub timed_out: bool,
    pub state: TargetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash: Option<CrashSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Unsolicited output collected without sending a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOutput {
    pub output: String,
    pub state: TargetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash: Option<CrashSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread: Option<u32>,
    pub index: u32,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    pub selected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackResponse {
    pub frames: Vec<StackFrame>,
    pub raw: String,
    pub state: TargetState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    pub value: String,
    /// Nested members printed under the variable, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesResponse {
    pub variables: Vec<Variable>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub id: u32,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locations: Option<u32>,
    pub pending: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRead {
    pub address: String,
    pub count: usize,
    pub data_base64: String,
    pub hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyCrash {
    pub signature: CrashSignature,
    pub transcript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backtrace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchReport {
    pub pid: u32,
    pub state: TargetState,
    pub attach_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_crash: Option<EarlyCrash>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub state: TargetState,
    pub idle_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crash: Option<CrashSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashReport {
    pub path: PathBuf,
    pub modified_unix_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<CrashSignature>,
    pub excerpt: String,
}

/// What is known about a session's crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CrashEvidence {
    /// Signature observed in the session transcript.
    Live { signature: CrashSignature },
    /// Newest OS crash report written since the session started.
    Report { report: CrashReport },
    NotFound,
}
