use crate::session::DebuggerSession;
use crate::state::CommandKind;
use crate::types::{StackFrame, StackResponse};
use crate::Result;
use regex::Regex;
use std::sync::LazyLock;

static THREAD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\*?\s*thread #(\d+)").expect("valid regex"));
static FRAME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\*)?\s*frame #(\d+): (0x[0-9a-fA-F]+)\s+(.*)$").expect("valid regex")
});
static FRAME_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^`]+)`)?(.*?)(?: at ([^:\s]+):(\d+)(?::(\d+))?)?(?: \[[^\]]*\])*$")
        .expect("valid regex")
});

pub async fn backtrace(
    session: &mut DebuggerSession,
    thread: Option<u32>,
    limit: Option<u32>,
) -> Result<StackResponse> {
    let command = backtrace_command(thread, limit);
    let output = session
        .execute_as(&command, CommandKind::StoppedOnly, None)
        .await?;
    session.ensure_complete(&output)?;

    Ok(StackResponse {
        frames: parse_backtrace(&output.output),
        raw: output.output,
        state: output.state,
    })
}

pub fn backtrace_command(thread: Option<u32>, limit: Option<u32>) -> String {
    let mut command = "thread backtrace".to_string();
    if let Some(count) = limit {
        command.push_str(&format!(" -c {count}"));
    }
    if let Some(thread) = thread {
        command.push_str(&format!(" {thread}"));
    }
    command
}

pub fn parse_backtrace(output: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    let mut thread = None;

    for line in output.lines() {
        if let Some(caps) = FRAME_LINE.captures(line) {
            let Ok(index) = caps[2].parse::<u32>() else {
                continue;
            };
            let rest = caps[4].trim();
            let location = FRAME_LOCATION.captures(rest);
            let group = |i: usize| {
                location
                    .as_ref()
                    .and_then(|c| c.get(i))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
            };

            frames.push(StackFrame {
                thread,
                index,
                address: caps[3].to_string(),
                module: group(1),
                function: group(2).unwrap_or_else(|| rest.to_string()),
                file: group(3),
                line: group(4).and_then(|v| v.parse().ok()),
                column: group(5).and_then(|v| v.parse().ok()),
                selected: caps.get(1).is_some(),
            });
        } else if let Some(caps) = THREAD_HEADER.captures(line) {
            thread = caps[1].parse::<u32>().ok();
        }
    }

    frames
}
