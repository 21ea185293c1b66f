use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier a debugger session is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    Pid(u32),
    Bundle(String),
}

impl SessionKey {
    /// Numeric input is a process id, anything else a bundle identifier.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        Some(match raw.parse::<u32>() {
            Ok(pid) => Self::Pid(pid),
            Err(_) => Self::Bundle(raw.to_string()),
        })
    }

    pub fn from_parts(pid: Option<u32>, bundle_id: Option<&str>) -> Option<Self> {
        match (pid, bundle_id.map(str::trim).filter(|b| !b.is_empty())) {
            (Some(pid), _) => Some(Self::Pid(pid)),
            (None, Some(bundle)) => Some(Self::Bundle(bundle.to_string())),
            (None, None) => None,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Pid(pid) => write!(f, "pid:{pid}"),
            SessionKey::Bundle(bundle) => write!(f, "bundle:{bundle}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointSpec {
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Over,
    Into,
    Out,
}

impl StepKind {
    pub fn command(self) -> &'static str {
        match self {
            StepKind::Over => "thread step-over",
            StepKind::Into => "thread step-in",
            StepKind::Out => "thread step-out",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    /// Leave the target stopped right after attach instead of continuing.
    #[serde(default)]
    pub stop_at_entry: bool,
    /// Run early-crash detection after the initial continue.
    #[serde(default = "default_true")]
    pub detect_early_crash: bool,
}

fn default_true() -> bool {
    true
}
