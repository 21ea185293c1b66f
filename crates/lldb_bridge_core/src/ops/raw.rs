use crate::session::DebuggerSession;
use crate::types::CommandOutput;
use crate::Result;
use std::time::Duration;

pub async fn raw(
    session: &mut DebuggerSession,
    command: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput> {
    session.execute(command, timeout).await
}
