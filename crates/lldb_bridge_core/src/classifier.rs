//! Text-pattern classification of debugger transcripts.
//!
//! The debugger offers no structured protocol, so target state is inferred
//! from free text. All of that matching lives here: the session feeds every
//! transcript through [`CrashClassifier::observe`] and the crash report
//! scanner reuses [`CrashClassifier::classify`] on report files.

use crate::config::DebuggerDialect;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

static STOP_REASON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"stop reason = (.+)$").expect("valid regex"));
static PROCESS_STOPPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Process \d+ stopped\b").expect("valid regex"));
static PROCESS_RESUMING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Process \d+ resuming\b").expect("valid regex"));
static PROCESS_EXITED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Process \d+ exited with status = (-?\d+)").expect("valid regex")
});
static EXIT_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:due to signal|signal) (\d+|SIG[A-Z0-9]+)").expect("valid regex")
});
static SIGNAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(SIG[A-Z0-9]+)\b").expect("valid regex"));
static EXCEPTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(EXC_[A-Z_]+)\b").expect("valid regex"));
static DYLD_FAILURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"dyld(?:\[\d+\])?: (?:Symbol not found|Library not loaded)").expect("valid regex")
});
static REPORT_EXCEPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:Exception Type:\s+|"type"\s*:\s*")(EXC_[A-Z_]+)"#).expect("valid regex")
});
static REPORT_TERMINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Termination Reason:\s+(?:Namespace )?SIGNAL,? Code (\d+)").expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum CrashKind {
    Signal(String),
    Exception(String),
    Exited(i32),
    Dyld,
}

impl CrashKind {
    pub fn label(&self) -> String {
        match self {
            CrashKind::Signal(name) | CrashKind::Exception(name) => name.clone(),
            CrashKind::Exited(_) => "process exited".to_string(),
            CrashKind::Dyld => "dyld".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSignature {
    pub kind: CrashKind,
    /// The transcript line the signature was extracted from.
    pub matched: String,
}

/// A state-relevant event found in a transcript, in textual order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Resumed,
    Stopped(String),
    Exited(i32),
    Crashed(CrashSignature),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub events: Vec<TargetEvent>,
}

impl Observation {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn crash(&self) -> Option<&CrashSignature> {
        self.events.iter().find_map(|event| match event {
            TargetEvent::Crashed(signature) => Some(signature),
            _ => None,
        })
    }

    /// True if the transcript says the target is no longer running.
    pub fn has_stop_indicator(&self) -> bool {
        self.events
            .iter()
            .any(|event| !matches!(event, TargetEvent::Resumed))
    }
}

#[derive(Debug, Clone)]
pub struct CrashClassifier {
    fatal_signals: HashSet<String>,
    exception_types: HashSet<String>,
}

impl CrashClassifier {
    pub fn new(dialect: &DebuggerDialect) -> Self {
        Self {
            fatal_signals: dialect.fatal_signals.iter().cloned().collect(),
            exception_types: dialect.exception_types.iter().cloned().collect(),
        }
    }

    pub fn observe(&self, text: &str) -> Observation {
        let mut events = Vec::new();
        for line in text.lines() {
            if let Some(event) = self.observe_line(line) {
                events.push(event);
            }
        }
        Observation { events }
    }

    /// Returns the first genuine crash in `text`, ignoring benign chatter.
    pub fn classify(&self, text: &str) -> Option<CrashSignature> {
        self.observe(text).crash().cloned()
    }

    fn observe_line(&self, line: &str) -> Option<TargetEvent> {
        let trimmed = line.trim();

        if let Some(caps) = PROCESS_EXITED.captures(trimmed) {
            let status = caps[1].parse::<i32>().unwrap_or(-1);
            if let Some(signal) = EXIT_SIGNAL.captures(trimmed) {
                return Some(self.crash(CrashKind::Signal(signal_name(&signal[1])), trimmed));
            }
            if status != 0 {
                return Some(self.crash(CrashKind::Exited(status), trimmed));
            }
            return Some(TargetEvent::Exited(0));
        }

        if let Some(caps) = STOP_REASON.captures(trimmed) {
            let reason = caps[1].trim().to_string();
            if let Some(kind) = self.fatal_kind(&reason) {
                return Some(self.crash(kind, trimmed));
            }
            return Some(TargetEvent::Stopped(reason));
        }

        if DYLD_FAILURE.is_match(trimmed) {
            return Some(self.crash(CrashKind::Dyld, trimmed));
        }

        if let Some(caps) = REPORT_EXCEPTION.captures(trimmed) {
            if self.exception_types.contains(&caps[1]) {
                return Some(self.crash(CrashKind::Exception(caps[1].to_string()), trimmed));
            }
        }

        if let Some(caps) = REPORT_TERMINATION.captures(trimmed) {
            return Some(self.crash(CrashKind::Signal(signal_name(&caps[1])), trimmed));
        }

        if PROCESS_STOPPED.is_match(trimmed) {
            return Some(TargetEvent::Stopped("stopped".to_string()));
        }

        if PROCESS_RESUMING.is_match(trimmed) {
            return Some(TargetEvent::Resumed);
        }

        None
    }

    fn fatal_kind(&self, reason: &str) -> Option<CrashKind> {
        if let Some(caps) = EXCEPTION_NAME.captures(reason) {
            if self.exception_types.contains(&caps[1]) {
                return Some(CrashKind::Exception(caps[1].to_string()));
            }
        }
        if reason.starts_with("signal") {
            if let Some(caps) = SIGNAL_NAME.captures(reason) {
                if self.fatal_signals.contains(&caps[1]) {
                    return Some(CrashKind::Signal(caps[1].to_string()));
                }
            }
        }
        None
    }

    fn crash(&self, kind: CrashKind, matched: &str) -> TargetEvent {
        TargetEvent::Crashed(CrashSignature {
            kind,
            matched: matched.to_string(),
        })
    }
}

impl Default for CrashClassifier {
    fn default() -> Self {
        Self::new(&DebuggerDialect::lldb())
    }
}

/// Maps a numeric signal to its platform name; names pass through.
fn signal_name(raw: &str) -> String {
    match raw.parse::<i32>() {
        Ok(number) => nix::sys::signal::Signal::try_from(number)
            .map(|signal| signal.as_str().to_string())
            .unwrap_or_else(|_| format!("signal {number}")),
        Err(_) => raw.to_string(),
    }
}
