use crate::classifier::{Observation, TargetEvent};
use crate::config::DebuggerDialect;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of the debugged target as inferred from the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TargetState {
    Unknown,
    Running,
    Stopped { reason: String },
    Crashed { kind: String, detail: String },
    Exited { status: i32 },
}

impl TargetState {
    pub fn stopped(reason: impl Into<String>) -> Self {
        Self::Stopped {
            reason: reason.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TargetState::Running)
    }

    /// Stopped, crashed or exited: the target is not executing.
    pub fn is_halted(&self) -> bool {
        matches!(
            self,
            TargetState::Stopped { .. } | TargetState::Crashed { .. } | TargetState::Exited { .. }
        )
    }

    /// No further transitions are expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetState::Crashed { .. } | TargetState::Exited { .. })
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Unknown => write!(f, "unknown"),
            TargetState::Running => write!(f, "running"),
            TargetState::Stopped { reason } => write!(f, "stopped ({reason})"),
            TargetState::Crashed { kind, .. } => write!(f, "crashed ({kind})"),
            TargetState::Exited { status } => write!(f, "exited ({status})"),
        }
    }
}

/// Semantic category of a command, deciding guards and optimistic transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Plain,
    /// Resumes the target: state becomes `Running` as soon as it is sent.
    Resume,
    /// Asynchronous stop request; confirmation arrives out of band.
    Interrupt,
    /// Only meaningful while the target is stopped.
    StoppedOnly,
}

impl CommandKind {
    pub fn infer(command: &str, dialect: &DebuggerDialect) -> Self {
        let normalized = command.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized == dialect.interrupt_command {
            CommandKind::Interrupt
        } else if starts_with_any(&normalized, &dialect.resume_commands) {
            CommandKind::Resume
        } else if starts_with_any(&normalized, &dialect.stopped_only_commands) {
            CommandKind::StoppedOnly
        } else {
            CommandKind::Plain
        }
    }
}

/// Whole-word prefix match: `v` matches `v count` but not `version`.
fn starts_with_any(command: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|prefix| {
        command == prefix
            || command
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with(' '))
    })
}

/// State right after a command of `kind` has been written.
pub fn on_send(current: &TargetState, kind: CommandKind) -> TargetState {
    match kind {
        CommandKind::Resume if !current.is_terminal() => TargetState::Running,
        _ => current.clone(),
    }
}

/// Folds transcript events into the state, in the order they were printed.
pub fn apply(current: &TargetState, observation: &Observation) -> TargetState {
    let mut state = current.clone();
    for event in &observation.events {
        if state.is_terminal() {
            break;
        }
        state = match event {
            TargetEvent::Resumed => TargetState::Running,
            TargetEvent::Stopped(reason) => TargetState::stopped(reason.clone()),
            TargetEvent::Exited(status) => TargetState::Exited { status: *status },
            TargetEvent::Crashed(signature) => TargetState::Crashed {
                kind: signature.kind.label(),
                detail: signature.matched.clone(),
            },
        };
    }
    state
}
