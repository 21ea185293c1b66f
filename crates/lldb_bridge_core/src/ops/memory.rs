use crate::error::SessionError;
use crate::session::DebuggerSession;
use crate::state::CommandKind;
use crate::types::MemoryRead;
use crate::Result;
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;

pub const READ_MEMORY_MAX_COUNT: usize = 64 * 1024;

static MEMORY_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*0x[0-9a-fA-F]+:\s+(.*)$").expect("valid regex"));

pub async fn read_memory(
    session: &mut DebuggerSession,
    address: &str,
    count: usize,
) -> Result<MemoryRead> {
    let address = normalize_address(address)?;
    if count == 0 || count > READ_MEMORY_MAX_COUNT {
        return Err(SessionError::invalid_params(format!(
            "memory read count {count} must be between 1 and {READ_MEMORY_MAX_COUNT} bytes"
        )));
    }

    let command = format!("memory read --force --size 1 --format x --count {count} {address}");
    let output = session
        .execute_as(&command, CommandKind::StoppedOnly, None)
        .await?;
    session.ensure_complete(&output)?;

    let bytes = parse_memory_bytes(&output.output);
    if bytes.is_empty() {
        return Err(SessionError::Debugger {
            key: session.key().clone(),
            state: session.state().clone(),
            command,
            message: format!("no bytes read at {address}"),
        });
    }

    Ok(MemoryRead {
        address,
        count: bytes.len(),
        data_base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        hex: bytes.iter().map(|b| format!("{b:02x}")).collect(),
    })
}

/// Accepts `0x`-prefixed hex or a decimal address and returns it as hex.
pub fn normalize_address(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let value = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => trimmed.parse::<u64>().ok(),
    };
    value
        .map(|v| format!("0x{v:x}"))
        .ok_or_else(|| SessionError::invalid_params(format!("invalid memory address '{input}'")))
}

/// Byte columns of `memory read --format x --size 1` rows; the ASCII column is ignored.
pub fn parse_memory_bytes(output: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    for line in output.lines() {
        let Some(caps) = MEMORY_ROW.captures(line) else {
            continue;
        };
        for token in caps[1].split_whitespace() {
            let Some(hex) = token.strip_prefix("0x") else {
                break;
            };
            match u8::from_str_radix(hex, 16) {
                Ok(byte) if hex.len() == 2 => bytes.push(byte),
                _ => break,
            }
        }
    }
    bytes
}
