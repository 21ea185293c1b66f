//! One-response-per-command framing over an unframed byte stream.
//!
//! A response is complete when the cleaned buffer, trimmed of trailing
//! whitespace, ends with the debugger's idle marker at the start of a line.
//! A marker that merely occurs inside echoed input does not terminate a read.

use crate::channel::{Channel, ChannelError};
use regex::Regex;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-9;?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    /// Cleaned text, including the trailing marker if one was seen.
    pub text: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct TranscriptReader {
    idle_marker: String,
    poll_interval: Duration,
}

impl TranscriptReader {
    pub fn new(idle_marker: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            idle_marker: idle_marker.into(),
            poll_interval,
        }
    }

    /// Accumulates output until the idle marker or `limit` elapses.
    ///
    /// On timeout the partial transcript is returned with `timed_out` set.
    /// Channel failures are returned as errors and are fatal to the session.
    pub async fn read_until_idle(
        &self,
        channel: &mut Channel,
        limit: Duration,
    ) -> Result<Transcript, ChannelError> {
        let started = Instant::now();
        let deadline = started + limit;
        let mut raw = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(Transcript {
                    text: clean(&raw),
                    timed_out: true,
                    elapsed: started.elapsed(),
                });
            }

            let wait = self.poll_interval.min(deadline - now);
            let chunk = channel.read(wait).await?;
            if chunk.is_empty() {
                continue;
            }
            raw.extend_from_slice(&chunk);

            let text = clean(&raw);
            if self.is_idle(&text) {
                return Ok(Transcript {
                    text,
                    timed_out: false,
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    /// Collects everything already pending, waiting at most `first_wait` for
    /// the first chunk.
    pub async fn drain(
        &self,
        channel: &mut Channel,
        first_wait: Duration,
    ) -> Result<String, ChannelError> {
        let mut raw = channel.read(first_wait).await?;
        if raw.is_empty() {
            return Ok(String::new());
        }
        loop {
            let chunk = channel.read(Duration::ZERO).await?;
            if chunk.is_empty() {
                break;
            }
            raw.extend_from_slice(&chunk);
        }
        Ok(clean(&raw))
    }

    /// True only if the marker is the tail of the trimmed text and starts a line.
    pub fn is_idle(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        match trimmed.strip_suffix(self.idle_marker.as_str()) {
            Some(before) => before.is_empty() || before.ends_with('\n'),
            None => false,
        }
    }

    /// Strips the echoed command and the trailing prompt from a transcript.
    pub fn payload(&self, text: &str, command: &str) -> String {
        let mut body = text.trim_end();
        if self.is_idle(body) {
            body = &body[..body.len() - self.idle_marker.len()];
        }

        let body = body.trim_start_matches('\n');
        let command = command.trim();
        let body = match body.split_once('\n') {
            Some((first, rest)) if self.is_echo(first, command) => rest,
            None if self.is_echo(body, command) => "",
            _ => body,
        };

        body.trim_end().to_string()
    }

    /// Removes leading or trailing prompt-only lines from unsolicited output.
    pub fn strip_prompts(&self, text: &str) -> String {
        text.lines()
            .filter(|line| line.trim() != self.idle_marker)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_echo(&self, line: &str, command: &str) -> bool {
        if command.is_empty() {
            return false;
        }
        let line = line.trim();
        let line = line
            .strip_prefix(self.idle_marker.as_str())
            .map(str::trim_start)
            .unwrap_or(line);
        line == command
    }
}

/// Lossy UTF-8 decode with terminal escapes and carriage returns removed.
pub fn clean(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    ANSI_ESCAPE.replace_all(&text, "").replace('\r', "")
}
