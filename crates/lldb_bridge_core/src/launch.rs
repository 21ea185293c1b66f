//! Attach-by-bundle and launch-under-debugger flows.

use crate::resolve::{AppLauncher, ProcessResolver};
use crate::session::DebuggerSession;
use crate::types::{LaunchOptions, LaunchReport};
use crate::Result;

/// Resolves a running app by bundle identifier and attaches to it.
pub async fn attach_bundle(
    session: &mut DebuggerSession,
    resolver: &dyn ProcessResolver,
    bundle_id: &str,
) -> Result<LaunchReport> {
    let pid = resolver.resolve(bundle_id).await?;
    let output = session.attach(pid).await?;
    Ok(LaunchReport {
        pid,
        state: output.state,
        attach_output: output.output,
        early_crash: None,
    })
}

/// Launches the app held before `main`, attaches, and lets it run.
///
/// Unless `stop_at_entry` is set the target is continued and, if enabled,
/// checked for a crash right after start. A detected crash is reported in
/// the result, not as an error.
pub async fn launch_and_attach(
    session: &mut DebuggerSession,
    launcher: &dyn AppLauncher,
    bundle_id: &str,
    options: &LaunchOptions,
) -> Result<LaunchReport> {
    let pid = launcher.launch(bundle_id, true).await?;
    let attached = session.attach(pid).await?;

    if options.stop_at_entry {
        session.mark_stopped("launch");
        tracing::info!(bundle_id, pid, "Launched app held at entry");
        return Ok(LaunchReport {
            pid,
            state: session.state().clone(),
            attach_output: attached.output,
            early_crash: None,
        });
    }

    session.continue_execution().await?;
    let early_crash = if options.detect_early_crash {
        session.detect_early_crash().await?
    } else {
        None
    };

    tracing::info!(bundle_id, pid, state = %session.state(), crashed = early_crash.is_some(), "Launched app under debugger");
    Ok(LaunchReport {
        pid,
        state: session.state().clone(),
        attach_output: attached.output,
        early_crash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CrashKind;
    use crate::config::SessionConfig;
    use crate::error::SessionError;
    use crate::state::TargetState;
    use crate::testing::FakeDebugger;
    use crate::types::SessionKey;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct FixedPid(u32);

    #[async_trait]
    impl ProcessResolver for FixedPid {
        async fn resolve(&self, _bundle_id: &str) -> Result<u32> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct RecordingLauncher {
        calls: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl AppLauncher for RecordingLauncher {
        async fn launch(&self, bundle_id: &str, wait_for_debugger: bool) -> Result<u32> {
            self.calls
                .lock()
                .expect("calls lock")
                .push((bundle_id.to_string(), wait_for_debugger));
            Ok(1001)
        }
    }

    struct NotRunning;

    #[async_trait]
    impl ProcessResolver for NotRunning {
        async fn resolve(&self, bundle_id: &str) -> Result<u32> {
            Err(SessionError::Resolve {
                bundle_id: bundle_id.to_string(),
                message: "no running process for bundle".to_string(),
            })
        }
    }

    async fn session(fake: (crate::channel::Channel, FakeDebugger)) -> (DebuggerSession, FakeDebugger) {
        let (channel, fake) = fake;
        let config = Arc::new(SessionConfig {
            command_timeout: Duration::from_secs(2),
            startup_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            early_crash_delay: Duration::from_millis(100),
            early_crash_window: Duration::from_millis(100),
            ..SessionConfig::default()
        });
        let key = SessionKey::Bundle("com.example.App".into());
        let session = DebuggerSession::connect(key, channel, config)
            .await
            .expect("handshake should succeed");
        (session, fake)
    }

    #[tokio::test]
    async fn attach_bundle_uses_resolved_pid() {
        let (mut session, fake) = session(FakeDebugger::lldb_like(1001)).await;
        let report = attach_bundle(&mut session, &FixedPid(1001), "com.example.App")
            .await
            .expect("attach should succeed");

        assert_eq!(report.pid, 1001);
        assert_eq!(report.state, TargetState::stopped("attach"));
        assert!(fake.commands().contains(&"process attach --pid 1001".to_string()));
    }

    #[tokio::test]
    async fn attach_bundle_propagates_resolve_failure() {
        let (mut session, fake) = session(FakeDebugger::lldb_like(1001)).await;
        let err = attach_bundle(&mut session, &NotRunning, "com.example.App")
            .await
            .expect_err("resolve must fail");
        assert!(matches!(err, SessionError::Resolve { .. }));
        assert!(!fake.commands().iter().any(|c| c.starts_with("process attach")));
    }

    #[tokio::test]
    async fn launch_stop_at_entry_leaves_target_stopped() {
        let (mut session, fake) = session(FakeDebugger::lldb_like(1001)).await;
        let launcher = RecordingLauncher::default();
        let options = LaunchOptions {
            stop_at_entry: true,
            detect_early_crash: true,
        };

        let report = launch_and_attach(&mut session, &launcher, "com.example.App", &options)
            .await
            .expect("launch should succeed");

        assert_eq!(report.state, TargetState::stopped("launch"));
        assert!(report.early_crash.is_none());
        assert_eq!(
            launcher.calls.lock().expect("calls lock").as_slice(),
            &[("com.example.App".to_string(), true)]
        );
        assert!(!fake.commands().contains(&"process continue".to_string()));
    }

    #[tokio::test]
    async fn launch_reports_early_crash() {
        let (mut session, fake) = session(FakeDebugger::lldb_like(1001)).await;
        let launcher = RecordingLauncher::default();

        let notify = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            while !fake.commands().contains(&"process continue".to_string()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            fake.emit("Process 1001 stopped\n* thread #1, stop reason = signal SIGABRT\n(lldb) ");
        };
        let (report, ()) = tokio::join!(
            launch_and_attach(&mut session, &launcher, "com.example.App", &LaunchOptions {
                stop_at_entry: false,
                detect_early_crash: true,
            }),
            notify
        );
        let report = report.expect("a crash is reported, not an error");

        let crash = report.early_crash.expect("crash should be detected");
        assert_eq!(crash.signature.kind, CrashKind::Signal("SIGABRT".into()));
        assert!(matches!(report.state, TargetState::Crashed { .. }));
    }

    #[tokio::test]
    async fn launch_without_crash_is_running() {
        let (mut session, _fake) = session(FakeDebugger::lldb_like(1001)).await;
        let report = launch_and_attach(
            &mut session,
            &RecordingLauncher::default(),
            "com.example.App",
            &LaunchOptions {
                stop_at_entry: false,
                detect_early_crash: true,
            },
        )
        .await
        .expect("launch should succeed");

        assert_eq!(report.state, TargetState::Running);
        assert!(report.early_crash.is_none());
    }
}
