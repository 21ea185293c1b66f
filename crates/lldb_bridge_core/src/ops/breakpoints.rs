use crate::error::SessionError;
use crate::session::DebuggerSession;
use crate::state::CommandKind;
use crate::types::{BreakpointInfo, BreakpointSpec};
use crate::Result;
use regex::Regex;
use std::sync::LazyLock;

static BREAKPOINT_SET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Breakpoint (\d+): (.+)$").expect("valid regex"));
static BREAKPOINT_LISTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+): (.+)$").expect("valid regex"));
static LOCATION_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"locations = (\d+)|(\d+) locations?\b").expect("valid regex"));
static BREAKPOINTS_DELETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) breakpoints? deleted").expect("valid regex"));

pub async fn set_breakpoint(
    session: &mut DebuggerSession,
    spec: &BreakpointSpec,
) -> Result<BreakpointInfo> {
    let command = set_command(spec)?;
    let output = session.execute_as(&command, CommandKind::Plain, None).await?;
    session.ensure_complete(&output)?;

    parse_set_output(&output.output).ok_or_else(|| SessionError::Debugger {
        key: session.key().clone(),
        state: session.state().clone(),
        command,
        message: format!("unrecognized breakpoint output: {}", output.output.trim()),
    })
}

pub async fn remove_breakpoint(session: &mut DebuggerSession, id: u32) -> Result<u32> {
    let command = format!("breakpoint delete {id}");
    let output = session.execute_as(&command, CommandKind::Plain, None).await?;
    session.ensure_complete(&output)?;

    Ok(BREAKPOINTS_DELETED
        .captures(&output.output)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .unwrap_or(0))
}

pub async fn list_breakpoints(session: &mut DebuggerSession) -> Result<Vec<BreakpointInfo>> {
    let output = session
        .execute_as("breakpoint list --brief", CommandKind::Plain, None)
        .await?;
    session.ensure_complete(&output)?;
    Ok(parse_list_output(&output.output))
}

pub fn set_command(spec: &BreakpointSpec) -> Result<String> {
    let mut command = match (&spec.symbol, &spec.file, spec.line) {
        (Some(symbol), _, _) if !symbol.trim().is_empty() => {
            format!("breakpoint set --name {}", quote_arg(symbol.trim()))
        }
        (_, Some(file), Some(line)) if !file.trim().is_empty() => {
            format!("breakpoint set --file {} --line {line}", quote_arg(file.trim()))
        }
        _ => {
            return Err(SessionError::invalid_params(
                "breakpoint requires either symbol, or file and line",
            ))
        }
    };
    if let Some(condition) = spec.condition.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        command.push_str(&format!(" --condition {}", quote_arg(condition)));
    }
    Ok(command)
}

/// Double-quotes an argument for the debugger's command parser.
pub fn quote_arg(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn parse_set_output(output: &str) -> Option<BreakpointInfo> {
    output.lines().find_map(|line| {
        let caps = BREAKPOINT_SET.captures(line.trim())?;
        let description = caps[2].trim().to_string();
        Some(BreakpointInfo {
            id: caps[1].parse().ok()?,
            locations: location_count(&description),
            pending: description.contains("pending") || description.starts_with("no locations"),
            description,
        })
    })
}

pub fn parse_list_output(output: &str) -> Vec<BreakpointInfo> {
    output
        .lines()
        .filter_map(|line| {
            let caps = BREAKPOINT_LISTED.captures(line.trim())?;
            let description = caps[2].trim().to_string();
            Some(BreakpointInfo {
                id: caps[1].parse().ok()?,
                locations: location_count(&description),
                pending: description.contains("(pending)"),
                description,
            })
        })
        .collect()
}

fn location_count(description: &str) -> Option<u32> {
    if description.starts_with("no locations") {
        return Some(0);
    }
    if description.starts_with("where = ") {
        return Some(1);
    }
    LOCATION_COUNT.captures(description).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    })
}
