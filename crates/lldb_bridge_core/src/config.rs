use std::path::PathBuf;
use std::time::Duration;

/// Vocabulary of the controlled debugger.
///
/// Everything the engine matches against or types into the debugger lives
/// here so a different debugger (or a differently configured one) can be
/// driven without touching the IO code.
#[derive(Debug, Clone)]
pub struct DebuggerDialect {
    /// Prompt printed when the debugger is ready for the next command.
    pub idle_marker: String,
    /// Commands sent once after the first prompt appears.
    pub init_commands: Vec<String>,
    /// Signal names that mean the target crashed.
    pub fatal_signals: Vec<String>,
    /// Hardware exception types that mean the target crashed.
    pub exception_types: Vec<String>,
    /// Commands that resume the target (including single steps).
    pub resume_commands: Vec<String>,
    /// Commands that inspect a halted target and are refused while it runs.
    pub stopped_only_commands: Vec<String>,
    pub interrupt_command: String,
    pub continue_command: String,
    pub detach_command: String,
    pub quit_command: String,
}

impl DebuggerDialect {
    pub fn lldb() -> Self {
        Self {
            idle_marker: "(lldb)".to_string(),
            init_commands: vec![
                "settings set use-color false".to_string(),
                "settings set auto-confirm true".to_string(),
            ],
            fatal_signals: strings(&[
                "SIGABRT", "SIGSEGV", "SIGBUS", "SIGILL", "SIGFPE", "SIGKILL", "SIGSYS",
            ]),
            exception_types: strings(&[
                "EXC_BAD_ACCESS",
                "EXC_BAD_INSTRUCTION",
                "EXC_ARITHMETIC",
                "EXC_CRASH",
                "EXC_BREAKPOINT",
                "EXC_GUARD",
                "EXC_RESOURCE",
            ]),
            resume_commands: strings(&[
                "continue",
                "c",
                "process continue",
                "thread continue",
                "next",
                "n",
                "step",
                "s",
                "finish",
                "thread step-over",
                "thread step-in",
                "thread step-out",
                "thread step-inst",
                "thread step-inst-over",
                "ni",
                "si",
            ]),
            stopped_only_commands: strings(&[
                "bt",
                "thread backtrace",
                "thread list",
                "frame variable",
                "fr v",
                "v",
                "frame select",
                "frame info",
                "up",
                "down",
                "register read",
                "memory read",
                "x",
                "expression",
                "expr",
                "p",
                "po",
            ]),
            interrupt_command: "process interrupt".to_string(),
            continue_command: "process continue".to_string(),
            detach_command: "process detach".to_string(),
            quit_command: "quit".to_string(),
        }
    }
}

impl Default for DebuggerDialect {
    fn default() -> Self {
        Self::lldb()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub debugger_path: String,
    pub debugger_args: Vec<String>,
    pub dialect: DebuggerDialect,
    /// Default per-command timeout.
    pub command_timeout: Duration,
    /// Bound on the first prompt and on `process attach`.
    pub startup_timeout: Duration,
    /// Transcript reader poll interval.
    pub poll_interval: Duration,
    pub interrupt_retries: u32,
    pub interrupt_poll_interval: Duration,
    /// Delay between `continue` and the early-crash check.
    pub early_crash_delay: Duration,
    /// How long the early-crash check waits for pending output.
    pub early_crash_window: Duration,
    pub backtrace_on_crash: bool,
    /// Sessions idle for longer than this are replaced or pruned.
    pub idle_ttl: Option<Duration>,
    pub crash_report_dir: PathBuf,
    /// Simulator udid (or `booted`) used by the launch collaborators.
    pub simulator: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debugger_path: "lldb".to_string(),
            debugger_args: Vec::new(),
            dialect: DebuggerDialect::lldb(),
            command_timeout: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(25),
            interrupt_retries: 20,
            interrupt_poll_interval: Duration::from_millis(150),
            early_crash_delay: Duration::from_millis(1500),
            early_crash_window: Duration::from_millis(200),
            backtrace_on_crash: true,
            idle_ttl: Some(Duration::from_secs(30 * 60)),
            crash_report_dir: default_crash_report_dir(),
            simulator: "booted".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let debugger_path = std::env::var("LLDB_PATH").unwrap_or(defaults.debugger_path);
        let debugger_args = std::env::var("LLDB_ARGS")
            .map(|v| v.split_whitespace().map(str::to_string).collect())
            .unwrap_or(defaults.debugger_args);

        let backtrace_on_crash = std::env::var("LLDB_BACKTRACE_ON_CRASH")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(defaults.backtrace_on_crash);

        let idle_ttl = match env_u64("LLDB_SESSION_IDLE_TTL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_ttl,
        };

        Self {
            debugger_path,
            debugger_args,
            dialect: defaults.dialect,
            command_timeout: env_millis("LLDB_COMMAND_TIMEOUT_MS").unwrap_or(defaults.command_timeout),
            startup_timeout: env_millis("LLDB_STARTUP_TIMEOUT_MS").unwrap_or(defaults.startup_timeout),
            poll_interval: env_millis("LLDB_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            interrupt_retries: env_u64("LLDB_INTERRUPT_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.interrupt_retries),
            interrupt_poll_interval: env_millis("LLDB_INTERRUPT_POLL_MS")
                .unwrap_or(defaults.interrupt_poll_interval),
            early_crash_delay: env_millis("LLDB_EARLY_CRASH_DELAY_MS")
                .unwrap_or(defaults.early_crash_delay),
            early_crash_window: defaults.early_crash_window,
            backtrace_on_crash,
            idle_ttl,
            crash_report_dir: std::env::var("CRASH_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.crash_report_dir),
            simulator: std::env::var("SIMULATOR_UDID").unwrap_or(defaults.simulator),
        }
    }
}

fn default_crash_report_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/"))
        .join("Library/Logs/DiagnosticReports")
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_u64(name).map(Duration::from_millis)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
