//! LLDB Bridge Core
//!
//! An async library for driving an interactive, text-only debugger (LLDB) over
//! a pseudo-terminal. Provides sessions with a tracked target state, crash
//! classification of transcripts, a keyed session registry, and high-level
//! operations for inspecting a debugged app.

pub mod channel;
pub mod classifier;
pub mod config;
pub mod crash_report;
pub mod error;
pub mod launch;
pub mod ops;
pub mod registry;
pub mod resolve;
pub mod session;
pub mod state;
pub mod transcript;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use classifier::{CrashClassifier, CrashKind, CrashSignature};
pub use config::{DebuggerDialect, SessionConfig};
pub use crash_report::CrashReportScanner;
pub use error::SessionError;
pub use registry::{SessionHandle, SessionRegistry};
pub use resolve::{AppLauncher, ProcessResolver, SimulatorTools};
pub use session::DebuggerSession;
pub use state::{CommandKind, TargetState};

/// Result type alias using SessionError
pub type Result<T> = std::result::Result<T, SessionError>;
