//! Scripted stand-in for the debugger, driven over an in-memory stream.

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::session::DebuggerSession;
use crate::types::SessionKey;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) const PROMPT: &str = "(lldb) ";
pub(crate) const TEST_PID: u32 = 1001;

pub(crate) fn fast_config() -> Arc<SessionConfig> {
    Arc::new(SessionConfig {
        command_timeout: Duration::from_secs(2),
        startup_timeout: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
        ..SessionConfig::default()
    })
}

/// Connects to the fake and attaches to [`TEST_PID`].
pub(crate) async fn attached_session(
    (channel, fake): (Channel, FakeDebugger),
) -> (DebuggerSession, FakeDebugger) {
    let mut session = DebuggerSession::connect(SessionKey::Pid(TEST_PID), channel, fast_config())
        .await
        .expect("handshake should succeed");
    session.attach(TEST_PID).await.expect("attach should succeed");
    (session, fake)
}

pub(crate) struct Reply {
    pub output: String,
    pub prompt: bool,
}

impl Reply {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            prompt: true,
        }
    }

    /// Never prints the prompt, so the caller's read times out.
    pub fn hang(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            prompt: false,
        }
    }
}

pub(crate) struct FakeDebugger {
    commands: Arc<Mutex<Vec<String>>>,
    notifications: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl FakeDebugger {
    pub fn spawn<F>(mut respond: F) -> (Channel, Self)
    where
        F: FnMut(&str) -> Reply + Send + 'static,
    {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read_half, mut write_half) = tokio::io::split(server);
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let seen = commands.clone();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            if write_half.write_all(PROMPT.as_bytes()).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        seen.lock().expect("commands lock").push(line.clone());
                        let reply = respond(&line);
                        // Imperfect echo suppression, as seen from a real terminal.
                        let mut out = format!("{line}\r\n");
                        if !reply.output.is_empty() {
                            out.push_str(&reply.output.replace('\n', "\r\n"));
                            out.push_str("\r\n");
                        }
                        if reply.prompt {
                            out.push_str(PROMPT);
                        }
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    Some(text) = rx.recv() => {
                        let out = text.replace('\n', "\r\n");
                        if write_half.write_all(out.as_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        (
            Channel::from_stream(client),
            Self {
                commands,
                notifications: tx,
                task,
            },
        )
    }

    /// Debugger that understands the handful of commands sessions send.
    pub fn lldb_like(pid: u32) -> (Channel, Self) {
        Self::spawn(move |line| standard_reply(pid, line))
    }

    /// Pushes an asynchronous notification onto the stream.
    pub fn emit(&self, text: &str) {
        let _ = self.notifications.send(text.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    /// False once the engine side of the stream has been dropped.
    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }

    /// Simulates the debugger process dying.
    pub fn kill(&self) {
        self.task.abort();
    }
}

impl Drop for FakeDebugger {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) fn standard_reply(pid: u32, line: &str) -> Reply {
    let line = line.trim();
    if line.starts_with("settings set") || line.starts_with("quit") {
        Reply::text("")
    } else if line.starts_with("process attach") {
        Reply::text(format!(
            "Process {pid} stopped\n* thread #1, queue = 'com.apple.main-thread', stop reason = signal SIGSTOP\n    frame #0: 0x00000001a2b3c4d4 libsystem_kernel.dylib`mach_msg2_trap + 8\nExecutable module set to \"/tmp/App.app/App\".\nArchitecture set to: arm64-apple-ios-simulator."
        ))
    } else if line == "process continue" || line == "continue" {
        Reply::text(format!("Process {pid} resuming"))
    } else if line.starts_with("process detach") {
        Reply::text(format!("Process {pid} detached"))
    } else if line.starts_with("thread backtrace") || line == "bt" {
        Reply::text(
            "* thread #1, queue = 'com.apple.main-thread', stop reason = breakpoint 1.1\n  * frame #0: 0x0000000100003f2c App`main at main.swift:5:9\n    frame #1: 0x00000001a2b3c4d4 dyld`start + 2240",
        )
    } else if line.starts_with("frame variable") {
        Reply::text("(Int) count = 5\n(String) name = \"hello\"")
    } else if line.starts_with("frame select") {
        Reply::text("frame #1: 0x00000001a2b3c4d4 dyld`start + 2240")
    } else {
        Reply::text("")
    }
}
