//! Lookup of system crash reports written for a process.

use crate::classifier::{CrashClassifier, CrashSignature};
use crate::config::DebuggerDialect;
use crate::error::SessionError;
use crate::session::DebuggerSession;
use crate::types::{CrashEvidence, CrashReport};
use crate::Result;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const EXCERPT_BYTES: usize = 4096;
const MATCHED_CHARS: usize = 200;
const REPORT_EXTENSIONS: [&str; 2] = ["ips", "crash"];

pub struct CrashReportScanner {
    dir: PathBuf,
    classifier: CrashClassifier,
}

impl CrashReportScanner {
    pub fn new(dir: impl Into<PathBuf>, dialect: &DebuggerDialect) -> Self {
        Self {
            dir: dir.into(),
            classifier: CrashClassifier::new(dialect),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Newest report for `process_name` modified at or after `since`.
    ///
    /// A missing report directory yields `None`.
    pub async fn latest_for(
        &self,
        process_name: &str,
        since: SystemTime,
    ) -> Result<Option<CrashReport>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %self.dir.display(), "Crash report directory does not exist");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<(SystemTime, PathBuf, String)> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_report_file(&path) {
                continue;
            }
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if modified < since || newest.as_ref().is_some_and(|(t, _, _)| *t >= modified) {
                continue;
            }
            let content = match tokio::fs::read(&path).await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read crash report");
                    continue;
                }
            };
            if report_matches(&path, &content, process_name) {
                newest = Some((modified, path, content));
            }
        }

        Ok(newest.map(|(modified, path, content)| {
            tracing::info!(path = %path.display(), process_name, "Found crash report");
            CrashReport {
                signature: self.classify(&content),
                modified_unix_ms: modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or(0),
                excerpt: excerpt(&content),
                path,
            }
        }))
    }

    /// Crash evidence for `session`.
    ///
    /// A signature seen live wins. Otherwise the report directory is scanned
    /// for reports written since the session started, looking for
    /// `process_name` or, when absent, the executable reported on attach.
    pub async fn for_session(
        &self,
        session: &DebuggerSession,
        process_name: Option<&str>,
    ) -> Result<CrashEvidence> {
        if let Some(signature) = session.last_crash() {
            return Ok(CrashEvidence::Live {
                signature: signature.clone(),
            });
        }
        let Some(name) = process_name.or_else(|| session.process_name()) else {
            return Err(SessionError::invalid_params(format!(
                "process_name is required: session {} has no known executable",
                session.key()
            )));
        };
        Ok(match self.latest_for(name, session.started_at()).await? {
            Some(report) => CrashEvidence::Report { report },
            None => CrashEvidence::NotFound,
        })
    }

    fn classify(&self, content: &str) -> Option<CrashSignature> {
        self.classifier.classify(content).map(|mut signature| {
            if signature.matched.chars().count() > MATCHED_CHARS {
                signature.matched = signature.matched.chars().take(MATCHED_CHARS).collect();
            }
            signature
        })
    }
}

fn is_report_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| REPORT_EXTENSIONS.contains(&ext))
}

fn report_matches(path: &Path, content: &str, process_name: &str) -> bool {
    let file_matches = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| {
            name.strip_prefix(process_name)
                .is_some_and(|rest| rest.starts_with(['-', '_', '.']))
        });
    if file_matches {
        return true;
    }

    let ips_name = format!("\"procName\" : \"{process_name}\"");
    let ips_compact = format!("\"procName\":\"{process_name}\"");
    content.contains(&ips_name)
        || content.contains(&ips_compact)
        || content.lines().any(|line| {
            line.strip_prefix("Process:")
                .and_then(|rest| rest.split_whitespace().next())
                .is_some_and(|name| name == process_name)
        })
}

fn excerpt(content: &str) -> String {
    if content.len() <= EXCERPT_BYTES {
        return content.to_string();
    }
    let mut end = EXCERPT_BYTES;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::CrashKind;
    use crate::testing::{attached_session, fast_config, FakeDebugger, TEST_PID};
    use crate::types::SessionKey;
    use std::time::Duration;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lldb-bridge-{name}-{}-{}",
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0)
        ));
        std::fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[tokio::test]
    async fn finds_matching_ips_report() {
        let dir = scratch_dir("ips");
        std::fs::write(
            dir.join("App-2026-10-19-101500.ips"),
            "{\"app_name\":\"App\",\"name\":\"App\"}\n{\n  \"procName\" : \"App\",\n  \"exception\" : {\"codes\":\"0x1\",\"type\":\"EXC_BAD_ACCESS\",\"signal\":\"SIGSEGV\"}\n}\n",
        )
        .expect("write report");
        std::fs::write(dir.join("Other-2026-10-19-101500.ips"), "{\"procName\" : \"Other\"}")
            .expect("write report");
        std::fs::write(dir.join("notes.txt"), "App").expect("write noise");

        let scanner = CrashReportScanner::new(&dir, &DebuggerDialect::lldb());
        let report = scanner
            .latest_for("App", SystemTime::now() - Duration::from_secs(60))
            .await
            .expect("scan succeeds")
            .expect("report found");

        assert!(report.path.ends_with("App-2026-10-19-101500.ips"));
        assert_eq!(
            report.signature.map(|s| s.kind),
            Some(CrashKind::Exception("EXC_BAD_ACCESS".into()))
        );
        assert!(report.excerpt.contains("procName"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn matches_legacy_report_by_content() {
        let dir = scratch_dir("legacy");
        std::fs::write(
            dir.join("report_1.crash"),
            "Process:               App [8812]\nException Type:  EXC_CRASH (SIGABRT)\n",
        )
        .expect("write report");

        let scanner = CrashReportScanner::new(&dir, &DebuggerDialect::lldb());
        let report = scanner
            .latest_for("App", UNIX_EPOCH)
            .await
            .expect("scan succeeds")
            .expect("report found");
        assert_eq!(
            report.signature.map(|s| s.kind),
            Some(CrashKind::Exception("EXC_CRASH".into()))
        );
        assert!(scanner
            .latest_for("Application", UNIX_EPOCH)
            .await
            .expect("scan succeeds")
            .is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn ignores_reports_older_than_since() {
        let dir = scratch_dir("old");
        std::fs::write(dir.join("App-old.ips"), "{\"procName\" : \"App\"}").expect("write report");

        let scanner = CrashReportScanner::new(&dir, &DebuggerDialect::lldb());
        let found = scanner
            .latest_for("App", SystemTime::now() + Duration::from_secs(3600))
            .await
            .expect("scan succeeds");
        assert!(found.is_none());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let scanner = CrashReportScanner::new("/nonexistent/reports", &DebuggerDialect::lldb());
        let found = scanner
            .latest_for("App", UNIX_EPOCH)
            .await
            .expect("missing dir is not an error");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn live_signature_wins_over_reports() {
        let (mut session, fake) = attached_session(FakeDebugger::lldb_like(TEST_PID)).await;
        session.continue_execution().await.expect("continue should succeed");
        fake.emit("Process 1001 stopped\n* thread #1, stop reason = signal SIGABRT\n(lldb) ");
        session
            .poll(Duration::from_millis(300))
            .await
            .expect("poll should succeed");

        let scanner = CrashReportScanner::new("/nonexistent/reports", &DebuggerDialect::lldb());
        let evidence = scanner
            .for_session(&session, None)
            .await
            .expect("live evidence");
        match evidence {
            CrashEvidence::Live { signature } => {
                assert_eq!(signature.kind, CrashKind::Signal("SIGABRT".into()))
            }
            other => panic!("expected live signature, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_reports_are_limited_to_its_lifetime() {
        let dir = scratch_dir("session");
        std::fs::write(dir.join("App-before.ips"), "{\"procName\" : \"App\"}")
            .expect("write report");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let (session, _fake) = attached_session(FakeDebugger::lldb_like(TEST_PID)).await;
        let scanner = CrashReportScanner::new(&dir, &DebuggerDialect::lldb());
        assert!(matches!(
            scanner.for_session(&session, None).await.expect("scan succeeds"),
            CrashEvidence::NotFound
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(
            dir.join("App-after.ips"),
            "{\"procName\" : \"App\", \"exception\" : {\"type\":\"EXC_BAD_ACCESS\"}}",
        )
        .expect("write report");
        match scanner.for_session(&session, None).await.expect("scan succeeds") {
            CrashEvidence::Report { report } => {
                assert!(report.path.ends_with("App-after.ips"));
            }
            other => panic!("expected report, got {other:?}"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn unknown_executable_requires_process_name() {
        let (channel, _fake) = FakeDebugger::lldb_like(TEST_PID);
        let session = DebuggerSession::connect(SessionKey::Pid(TEST_PID), channel, fast_config())
            .await
            .expect("handshake should succeed");

        let scanner = CrashReportScanner::new("/nonexistent/reports", &DebuggerDialect::lldb());
        let err = scanner
            .for_session(&session, None)
            .await
            .expect_err("nothing to look for");
        assert!(matches!(err, SessionError::InvalidParams(_)));
        assert!(matches!(
            scanner.for_session(&session, Some("App")).await.expect("named scan"),
            CrashEvidence::NotFound
        ));
    }

    #[test]
    fn excerpt_respects_char_boundaries() {
        let content = "é".repeat(EXCERPT_BYTES);
        let cut = excerpt(&content);
        assert!(cut.len() <= EXCERPT_BYTES);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
