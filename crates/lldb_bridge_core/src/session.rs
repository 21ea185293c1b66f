//! One spawned debugger process driven over a pseudo-terminal.

use crate::channel::{Channel, ChannelError};
use crate::classifier::{CrashClassifier, CrashKind, CrashSignature};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::state::{self, CommandKind, TargetState};
use crate::transcript::TranscriptReader;
use crate::types::{CommandOutput, EarlyCrash, PollOutput, SessionKey, SessionSummary, StepKind};
use crate::Result;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant, SystemTime};
use tokio::process::Child;
use tokio::time::{sleep, timeout};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

static EXECUTABLE_MODULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Executable module set to "([^"]+)""#).expect("valid regex"));

pub struct DebuggerSession {
    key: SessionKey,
    pid: Option<u32>,
    executable: Option<String>,
    channel: Channel,
    reader: TranscriptReader,
    classifier: CrashClassifier,
    // Killed in `Drop` unless `shutdown` already reaped it.
    child: Option<Child>,
    state: TargetState,
    last_activity: Instant,
    started_at: SystemTime,
    last_crash: Option<CrashSignature>,
    poisoned: bool,
    config: Arc<SessionConfig>,
}

impl std::fmt::Debug for DebuggerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebuggerSession")
            .field("key", &self.key)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

impl DebuggerSession {
    /// Spawns the configured debugger on a fresh pty and waits for its prompt.
    pub async fn spawn(key: SessionKey, config: Arc<SessionConfig>) -> Result<Self> {
        let (channel, pts) = Channel::open().map_err(|source| SessionError::Channel {
            key: key.clone(),
            state: TargetState::Unknown,
            source,
        })?;

        let child = pty_process::Command::new(&config.debugger_path)
            .args(&config.debugger_args)
            .spawn(pts)
            .map_err(|source| SessionError::Spawn {
                path: config.debugger_path.clone(),
                source: std::io::Error::other(source.to_string()),
            })?;

        tracing::info!(
            key = %key,
            debugger = %config.debugger_path,
            child_pid = child.id(),
            "Spawned debugger process"
        );

        let mut session = Self::new(key, channel, config);
        session.child = Some(child);
        session.handshake().await?;
        Ok(session)
    }

    /// Starts a session over an already connected channel.
    pub async fn connect(
        key: SessionKey,
        channel: Channel,
        config: Arc<SessionConfig>,
    ) -> Result<Self> {
        let mut session = Self::new(key, channel, config);
        session.handshake().await?;
        Ok(session)
    }

    fn new(key: SessionKey, channel: Channel, config: Arc<SessionConfig>) -> Self {
        Self {
            key,
            pid: None,
            executable: None,
            channel,
            reader: TranscriptReader::new(config.dialect.idle_marker.clone(), config.poll_interval),
            classifier: CrashClassifier::new(&config.dialect),
            child: None,
            state: TargetState::Unknown,
            last_activity: Instant::now(),
            started_at: SystemTime::now(),
            last_crash: None,
            poisoned: false,
            config,
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let limit = self.config.startup_timeout;
        let banner = match self.reader.read_until_idle(&mut self.channel, limit).await {
            Ok(transcript) => transcript,
            Err(e) => return Err(self.fail(e)),
        };
        if banner.timed_out {
            return Err(self.timeout_error("<startup>", limit, &banner.text));
        }
        self.last_activity = Instant::now();

        let init_commands = self.config.dialect.init_commands.clone();
        for command in &init_commands {
            let output = self.execute_as(command, CommandKind::Plain, Some(limit)).await?;
            if output.timed_out {
                return Err(self.timeout_error(command, limit, &output.output));
            }
        }
        tracing::debug!(key = %self.key, "Debugger ready");
        Ok(())
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// File name of the target executable, as reported on attach.
    pub fn process_name(&self) -> Option<&str> {
        self.executable
            .as_deref()
            .and_then(|path| Path::new(path).file_name())
            .and_then(|name| name.to_str())
    }

    pub fn state(&self) -> &TargetState {
        &self.state
    }

    pub fn last_crash(&self) -> Option<&CrashSignature> {
        self.last_crash.as_ref()
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Channel open, no fatal error seen, and the debugger process not reaped.
    pub fn is_alive(&mut self) -> bool {
        if self.poisoned || self.channel.is_closed() {
            return false;
        }
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => true,
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            pid: self.pid,
            state: self.state.clone(),
            idle_secs: self.idle_for().as_secs(),
            last_crash: self.last_crash.clone(),
        }
    }

    /// Sends a raw command, inferring its category from the text.
    pub async fn execute(&mut self, command: &str, limit: Option<Duration>) -> Result<CommandOutput> {
        let kind = CommandKind::infer(command, &self.config.dialect);
        self.execute_as(command, kind, limit).await
    }

    pub async fn execute_as(
        &mut self,
        command: &str,
        kind: CommandKind,
        limit: Option<Duration>,
    ) -> Result<CommandOutput> {
        if self.poisoned || self.channel.is_closed() {
            return Err(self.channel_error(ChannelError::Closed));
        }

        self.absorb_pending(Duration::ZERO).await?;

        if kind == CommandKind::StoppedOnly {
            self.require_stopped(command)?;
        }

        let limit = limit.unwrap_or(self.config.command_timeout);
        self.state = state::on_send(&self.state, kind);

        tracing::debug!(key = %self.key, command, ?kind, "Sending debugger command");
        let line = format!("{}\n", command.trim_end());
        if let Err(e) = self.channel.write(line.as_bytes()).await {
            return Err(self.fail(e));
        }

        let transcript = match self.reader.read_until_idle(&mut self.channel, limit).await {
            Ok(transcript) => transcript,
            Err(e) => return Err(self.fail(e)),
        };
        if !transcript.text.is_empty() {
            self.last_activity = Instant::now();
        }
        if transcript.timed_out {
            tracing::warn!(
                key = %self.key,
                command,
                elapsed_ms = transcript.elapsed.as_millis() as u64,
                "Debugger command timed out; returning partial output"
            );
        }

        let output = self.reader.payload(&transcript.text, command);
        let crash = self.observe(&output);
        tracing::debug!(key = %self.key, command, state = %self.state, bytes = output.len(), "Debugger command finished");

        Ok(CommandOutput {
            command: command.to_string(),
            output,
            timed_out: transcript.timed_out,
            state: self.state.clone(),
            crash,
            warning: None,
        })
    }

    /// Fails fast without touching the channel if the target is running.
    pub fn require_stopped(&self, operation: &str) -> Result<()> {
        if self.state.is_running() {
            return Err(SessionError::ProcessRunning {
                key: self.key.clone(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Turns a timed-out or rejected output into an error for structured operations.
    pub fn ensure_complete(&self, output: &CommandOutput) -> Result<()> {
        if output.timed_out {
            return Err(self.timeout_error(
                &output.command,
                self.config.command_timeout,
                &output.output,
            ));
        }
        if let Some(message) = debugger_error(&output.output) {
            return Err(SessionError::Debugger {
                key: self.key.clone(),
                state: self.state.clone(),
                command: output.command.clone(),
                message,
            });
        }
        Ok(())
    }

    pub async fn attach(&mut self, pid: u32) -> Result<CommandOutput> {
        let command = format!("process attach --pid {pid}");
        let limit = self.config.startup_timeout;
        let mut output = self.execute_as(&command, CommandKind::Plain, Some(limit)).await?;
        if output.timed_out {
            return Err(self.timeout_error(&command, limit, &output.output));
        }
        self.ensure_complete(&output)?;

        self.pid = Some(pid);
        if let Some(caps) = EXECUTABLE_MODULE.captures(&output.output) {
            self.executable = Some(caps[1].to_string());
        }
        if !self.state.is_terminal() {
            self.state = TargetState::stopped("attach");
        }
        output.state = self.state.clone();
        tracing::info!(key = %self.key, pid, state = %self.state, "Attached to target");
        Ok(output)
    }

    pub(crate) fn mark_stopped(&mut self, reason: &str) {
        if !self.state.is_terminal() {
            self.state = TargetState::stopped(reason);
        }
    }

    pub async fn continue_execution(&mut self) -> Result<CommandOutput> {
        let command = self.config.dialect.continue_command.clone();
        self.execute_as(&command, CommandKind::Resume, None).await
    }

    pub async fn step(&mut self, kind: StepKind) -> Result<CommandOutput> {
        let command = kind.command();
        self.require_stopped(command)?;
        let output = self.execute_as(command, CommandKind::Resume, None).await?;
        self.ensure_complete(&output)?;
        Ok(output)
    }

    /// Requests an asynchronous stop and waits for out-of-band confirmation.
    ///
    /// If no stop notification arrives within the configured bound the state
    /// is left untouched and the output carries a warning.
    pub async fn interrupt(&mut self) -> Result<CommandOutput> {
        let command = self.config.dialect.interrupt_command.clone();
        let mut output = self.execute_as(&command, CommandKind::Interrupt, None).await?;
        if self.state.is_halted() {
            return Ok(output);
        }

        let retries = self.config.interrupt_retries;
        for attempt in 1..=retries {
            sleep(self.config.interrupt_poll_interval).await;
            let late = self.absorb_pending(Duration::ZERO).await?;
            if !late.is_empty() {
                if !output.output.is_empty() {
                    output.output.push('\n');
                }
                output.output.push_str(&late);
            }
            if self.state.is_halted() {
                tracing::debug!(key = %self.key, attempt, state = %self.state, "Interrupt confirmed");
                output.state = self.state.clone();
                output.crash = self.last_crash.clone().filter(|_| {
                    matches!(self.state, TargetState::Crashed { .. })
                });
                return Ok(output);
            }
        }

        tracing::warn!(key = %self.key, retries, state = %self.state, "Could not confirm interrupt");
        output.state = self.state.clone();
        output.warning = Some(format!(
            "Could not confirm the target stopped after {retries} polls; state remains {}",
            self.state
        ));
        Ok(output)
    }

    /// Collects unsolicited output (async stop/crash notices) and applies it.
    pub async fn poll(&mut self, wait: Duration) -> Result<PollOutput> {
        if self.poisoned || self.channel.is_closed() {
            return Err(self.channel_error(ChannelError::Closed));
        }
        let before = self.last_crash.clone();
        let output = self.absorb_pending(wait).await?;
        let crash = self.last_crash.clone().filter(|c| before.as_ref() != Some(c));
        Ok(PollOutput {
            output,
            state: self.state.clone(),
            crash,
        })
    }

    /// Checks, shortly after a continue, whether the target died immediately.
    ///
    /// No pending output means the target is presumed healthy. Pending output
    /// only counts as a crash if the classifier finds a genuine signature.
    pub async fn detect_early_crash(&mut self) -> Result<Option<EarlyCrash>> {
        sleep(self.config.early_crash_delay).await;

        let window = self.config.early_crash_window;
        let pending = self.absorb_pending(window).await?;

        let signature = match (&self.state, &self.last_crash) {
            (TargetState::Crashed { .. }, Some(signature)) => signature.clone(),
            _ => {
                if pending.is_empty() {
                    tracing::debug!(key = %self.key, "No output after continue; target presumed healthy");
                } else {
                    tracing::debug!(key = %self.key, "Output after continue is benign");
                }
                return Ok(None);
            }
        };

        tracing::warn!(key = %self.key, kind = %signature.kind.label(), "Target crashed right after launch");

        let wants_backtrace = self.config.backtrace_on_crash
            && !matches!(signature.kind, CrashKind::Exited(_));
        let backtrace = if wants_backtrace {
            match self.execute_as("thread backtrace", CommandKind::Plain, None).await {
                Ok(output) => Some(output.output),
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Failed to capture crash backtrace");
                    None
                }
            }
        } else {
            None
        };

        Ok(Some(EarlyCrash {
            signature,
            transcript: pending,
            backtrace,
        }))
    }

    /// Detaches from the target, quits the debugger and reaps it.
    pub async fn shutdown(mut self) {
        if !self.poisoned && !self.channel.is_closed() {
            if self.pid.is_some() && !self.state.is_terminal() {
                let detach = self.config.dialect.detach_command.clone();
                if let Err(e) = self
                    .execute_as(&detach, CommandKind::Plain, Some(SHUTDOWN_GRACE))
                    .await
                {
                    tracing::warn!(key = %self.key, error = %e, "Detach failed during teardown");
                }
            }
            let quit = format!("{}\n", self.config.dialect.quit_command);
            let _ = self.channel.write(quit.as_bytes()).await;
        }
        self.channel.close();

        if let Some(mut child) = self.child.take() {
            match timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(key = %self.key, %status, "Debugger exited");
                }
                _ => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(key = %self.key, error = %e, "Failed to kill debugger process");
                    }
                }
            }
        }
        tracing::info!(key = %self.key, "Debugger session torn down");
    }

    async fn absorb_pending(&mut self, wait: Duration) -> Result<String> {
        let pending = match self.reader.drain(&mut self.channel, wait).await {
            Ok(text) => text,
            Err(e) => return Err(self.fail(e)),
        };
        if pending.is_empty() {
            return Ok(pending);
        }
        self.last_activity = Instant::now();
        let text = self.reader.strip_prompts(&pending);
        self.observe(&text);
        Ok(text)
    }

    fn observe(&mut self, text: &str) -> Option<CrashSignature> {
        let observation = self.classifier.observe(text);
        if observation.is_empty() {
            return None;
        }
        let next = state::apply(&self.state, &observation);
        if next != self.state {
            tracing::info!(key = %self.key, from = %self.state, to = %next, "Target state changed");
            self.state = next;
        }
        let crash = observation.crash().cloned();
        if let Some(signature) = &crash {
            self.last_crash = Some(signature.clone());
        }
        crash
    }

    /// Poisons the session after an unrecoverable channel failure.
    fn fail(&mut self, source: ChannelError) -> SessionError {
        tracing::error!(key = %self.key, error = %source, "Debugger channel failed; tearing session down");
        self.poisoned = true;
        self.channel.close();
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        self.channel_error(source)
    }

    fn channel_error(&self, source: ChannelError) -> SessionError {
        SessionError::Channel {
            key: self.key.clone(),
            state: self.state.clone(),
            source,
        }
    }

    fn timeout_error(&self, command: &str, limit: Duration, partial: &str) -> SessionError {
        SessionError::Timeout {
            key: self.key.clone(),
            state: self.state.clone(),
            command: command.to_string(),
            timeout: limit,
            partial: partial.to_string(),
        }
    }
}

impl Drop for DebuggerSession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                tracing::warn!(key = %self.key, "Debugger session dropped without shutdown; killing debugger");
                let _ = child.start_kill();
            }
        }
    }
}

/// First `error:` line the debugger printed, if any.
pub(crate) fn debugger_error(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("error:"))
        .map(|line| line.trim_start_matches("error:").trim().to_string())
}
