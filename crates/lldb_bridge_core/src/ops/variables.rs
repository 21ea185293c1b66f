use crate::session::DebuggerSession;
use crate::state::CommandKind;
use crate::types::{Variable, VariablesResponse};
use crate::Result;
use regex::Regex;
use std::sync::LazyLock;

static TYPED_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((.+?)\) (.+?) = (.*)$").expect("valid regex"));
static UNTYPED_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_$][\w$.\[\]]*) = (.*)$").expect("valid regex"));

/// Lists the variables of the selected frame, or of `frame` when given.
pub async fn variables(
    session: &mut DebuggerSession,
    frame: Option<u32>,
    names: &[String],
) -> Result<VariablesResponse> {
    if let Some(index) = frame {
        let select = format!("frame select {index}");
        let output = session
            .execute_as(&select, CommandKind::StoppedOnly, None)
            .await?;
        session.ensure_complete(&output)?;
    }

    let command = variables_command(names);
    let output = session
        .execute_as(&command, CommandKind::StoppedOnly, None)
        .await?;
    session.ensure_complete(&output)?;

    Ok(VariablesResponse {
        variables: parse_variables(&output.output),
        raw: output.output,
    })
}

pub fn variables_command(names: &[String]) -> String {
    let mut command = "frame variable".to_string();
    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        command.push(' ');
        command.push_str(name);
    }
    command
}

/// Parses top-level `frame variable` rows; indented members become `detail`.
pub fn parse_variables(output: &str) -> Vec<Variable> {
    let mut variables: Vec<Variable> = Vec::new();
    let mut nested: Vec<&str> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let top_level = !line.starts_with(char::is_whitespace);

        if top_level {
            if let Some(caps) = TYPED_VARIABLE.captures(line) {
                flush(&mut variables, &mut nested);
                variables.push(Variable {
                    name: caps[2].to_string(),
                    type_name: Some(caps[1].to_string()),
                    value: caps[3].trim().to_string(),
                    detail: None,
                });
                continue;
            }
            if let Some(caps) = UNTYPED_VARIABLE.captures(line) {
                flush(&mut variables, &mut nested);
                variables.push(Variable {
                    name: caps[1].to_string(),
                    type_name: None,
                    value: caps[2].trim().to_string(),
                    detail: None,
                });
                continue;
            }
        }

        if !variables.is_empty() {
            nested.push(line);
        }
    }
    flush(&mut variables, &mut nested);

    variables
}

fn flush(variables: &mut [Variable], nested: &mut Vec<&str>) {
    if let Some(last) = variables.last_mut() {
        if !nested.is_empty() {
            last.detail = Some(nested.join("\n"));
        }
    }
    nested.clear();
}
