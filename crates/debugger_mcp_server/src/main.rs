use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use lldb_bridge_core::{
    launch, ops,
    types::{BreakpointSpec, LaunchOptions, LaunchReport, SessionKey, StepKind},
    AppLauncher, CrashReportScanner, DebuggerSession, ProcessResolver, SessionConfig,
    SessionError, SessionHandle, SessionRegistry, SimulatorTools,
};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CRASH_REPORT_WINDOW_SECS: u64 = 600;
const MAX_POLL_WAIT_MS: u64 = 30_000;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerAttachParams {
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    bundle_id: Option<String>,
    /// Launch the app under the debugger instead of attaching to a running one.
    #[serde(default)]
    launch: bool,
    #[serde(default)]
    stop_at_entry: bool,
    #[serde(default = "default_true")]
    detect_early_crash: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SessionParams {
    /// Session key: a pid or a bundle identifier.
    key: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerCommandParams {
    key: String,
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerStackParams {
    key: String,
    #[serde(default)]
    thread: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerVariablesParams {
    key: String,
    #[serde(default)]
    frame: Option<u32>,
    #[serde(default)]
    names: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerSetBreakpointParams {
    key: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    condition: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerRemoveBreakpointParams {
    key: String,
    id: u32,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerContinueParams {
    key: String,
    /// Check for a crash shortly after resuming.
    #[serde(default)]
    detect_crash: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerStepParams {
    key: String,
    /// One of `over`, `into`, `out`.
    kind: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerReadMemoryParams {
    key: String,
    address: String,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerStateParams {
    key: String,
    /// How long to wait for pending output, in milliseconds.
    #[serde(default)]
    wait_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListSessionsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DebuggerCrashReportParams {
    /// Session whose crash to report. Its live signature is returned when one
    /// was observed; otherwise reports written since the session started are
    /// searched.
    #[serde(default)]
    key: Option<String>,
    /// Process name in the report; required without `key`.
    #[serde(default)]
    process_name: Option<String>,
    /// Search window without `key`, in seconds.
    #[serde(default)]
    since_secs: Option<u64>,
}

fn to_mcp_error(err: SessionError) -> McpError {
    let mut data = Map::new();
    if let Some(key) = err.key() {
        data.insert("key".to_string(), json!(key.to_string()));
    }
    if let Some(state) = err.state() {
        data.insert("state".to_string(), json!(state));
    }
    if let Some(partial) = err.partial_output() {
        data.insert("partial_output".to_string(), json!(partial));
    }
    let data = (!data.is_empty()).then_some(Value::Object(data));

    match err {
        SessionError::InvalidParams(_) | SessionError::SessionNotFound { .. } => {
            McpError::invalid_params(err.to_string(), data)
        }
        _ => McpError::internal_error(err.to_string(), data),
    }
}

fn parse_key(raw: &str) -> Result<SessionKey, McpError> {
    SessionKey::parse(raw).ok_or_else(|| {
        McpError::invalid_params("key must be a pid or a bundle identifier", None)
    })
}

fn parse_step_kind(raw: &str) -> Result<StepKind, McpError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "over" => Ok(StepKind::Over),
        "into" | "in" => Ok(StepKind::Into),
        "out" => Ok(StepKind::Out),
        other => Err(McpError::invalid_params(
            format!("unknown step kind '{other}'; expected over, into or out"),
            None,
        )),
    }
}

fn structured<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let value = serde_json::to_value(value)
        .map_err(|e| McpError::internal_error(format!("Failed to encode result: {e}"), None))?;
    Ok(CallToolResult::structured(value))
}

#[derive(Clone)]
struct DebuggerMcpServer {
    tool_router: ToolRouter<Self>,
    registry: Arc<SessionRegistry>,
    config: Arc<SessionConfig>,
    resolver: Arc<dyn ProcessResolver>,
    launcher: Arc<dyn AppLauncher>,
}

impl DebuggerMcpServer {
    async fn session(&self, key: &SessionKey) -> Result<SessionHandle, McpError> {
        self.registry.get(key).await.map_err(to_mcp_error)
    }

    /// Maps a session result, evicting the session on a fatal error.
    ///
    /// The session handle must already be dropped.
    async fn settle<T>(
        &self,
        key: &SessionKey,
        result: lldb_bridge_core::Result<T>,
    ) -> Result<T, McpError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    tracing::warn!(key = %key, error = %err, "Evicting session after fatal error");
                    if let Err(e) = self.registry.remove(key).await {
                        tracing::debug!(key = %key, error = %e, "Session already gone");
                    }
                }
                Err(to_mcp_error(err))
            }
        }
    }

    async fn attach_or_launch(
        &self,
        session: &mut DebuggerSession,
        key: &SessionKey,
        params: &DebuggerAttachParams,
    ) -> lldb_bridge_core::Result<LaunchReport> {
        match key {
            SessionKey::Pid(pid) => {
                let output = session.attach(*pid).await?;
                Ok(LaunchReport {
                    pid: *pid,
                    state: output.state,
                    attach_output: output.output,
                    early_crash: None,
                })
            }
            SessionKey::Bundle(bundle_id) if params.launch => {
                let options = LaunchOptions {
                    stop_at_entry: params.stop_at_entry,
                    detect_early_crash: params.detect_early_crash,
                };
                launch::launch_and_attach(session, self.launcher.as_ref(), bundle_id, &options)
                    .await
            }
            SessionKey::Bundle(bundle_id) => {
                launch::attach_bundle(session, self.resolver.as_ref(), bundle_id).await
            }
        }
    }
}

#[tool_router]
impl DebuggerMcpServer {
    fn new(config: SessionConfig) -> Self {
        let tools = Arc::new(SimulatorTools::new(config.simulator.clone()));
        Self {
            tool_router: Self::tool_router(),
            registry: Arc::new(SessionRegistry::new(config.idle_ttl)),
            config: Arc::new(config),
            resolver: tools.clone(),
            launcher: tools,
        }
    }

    #[tool(description = "Attach a debugger session to a process by pid or bundle id, optionally launching the app")]
    async fn debugger_attach(
        &self,
        params: Parameters<DebuggerAttachParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = SessionKey::from_parts(params.pid, params.bundle_id.as_deref())
            .ok_or_else(|| McpError::invalid_params("either pid or bundle_id is required", None))?;
        if params.launch && matches!(key, SessionKey::Pid(_)) {
            return Err(McpError::invalid_params("launch requires bundle_id, not pid", None));
        }

        // Attaching happens inside the factory, so a session is registered
        // only once attached. If this call is cancelled, the half-built
        // session is dropped and its debugger killed.
        let mut report = None;
        let summary = {
            let launched = &mut report;
            let (key_ref, params_ref) = (&key, &params);
            let handle = self
                .registry
                .get_or_create(&key, move || async move {
                    let mut session =
                        DebuggerSession::spawn(key_ref.clone(), self.config.clone()).await?;
                    match self.attach_or_launch(&mut session, key_ref, params_ref).await {
                        Ok(outcome) => {
                            *launched = Some(outcome);
                            Ok(session)
                        }
                        Err(e) => {
                            session.shutdown().await;
                            Err(e)
                        }
                    }
                })
                .await
                .map_err(to_mcp_error)?;
            handle.summary()
        };
        if report.is_none() {
            tracing::info!(key = %key, "Session already attached");
        }

        Ok(CallToolResult::structured(json!({
            "ok": true,
            "key": key.to_string(),
            "session": summary,
            "launch": report,
        })))
    }

    #[tool(description = "Detach from the target and tear the debugger session down")]
    async fn debugger_detach(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = parse_key(&params.0.key)?;
        self.registry.remove(&key).await.map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({
            "ok": true,
            "key": key.to_string(),
        })))
    }

    #[tool(description = "Execute a raw debugger console command")]
    async fn debugger_command(
        &self,
        params: Parameters<DebuggerCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        if params.command.trim().is_empty() {
            return Err(McpError::invalid_params("command must not be empty", None));
        }
        let result = {
            let mut session = self.session(&key).await?;
            ops::raw::raw(
                &mut session,
                &params.command,
                params.timeout_ms.map(Duration::from_millis),
            )
            .await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Backtrace of the stopped target as structured frames")]
    async fn debugger_stack(
        &self,
        params: Parameters<DebuggerStackParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            ops::stack::backtrace(&mut session, params.thread, params.limit).await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Variables of the selected (or given) frame")]
    async fn debugger_variables(
        &self,
        params: Parameters<DebuggerVariablesParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            ops::variables::variables(&mut session, params.frame, &params.names).await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Set a breakpoint by file and line or by symbol, with an optional condition")]
    async fn debugger_set_breakpoint(
        &self,
        params: Parameters<DebuggerSetBreakpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let spec = BreakpointSpec {
            file: params.file,
            line: params.line,
            symbol: params.symbol,
            condition: params.condition,
        };
        let result = {
            let mut session = self.session(&key).await?;
            ops::breakpoints::set_breakpoint(&mut session, &spec).await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Remove a breakpoint by id")]
    async fn debugger_remove_breakpoint(
        &self,
        params: Parameters<DebuggerRemoveBreakpointParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            ops::breakpoints::remove_breakpoint(&mut session, params.id).await
        };
        let removed = self.settle(&key, result).await?;
        Ok(CallToolResult::structured(json!({
            "ok": true,
            "id": params.id,
            "removed": removed,
        })))
    }

    #[tool(description = "List breakpoints")]
    async fn debugger_list_breakpoints(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = parse_key(&params.0.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            ops::breakpoints::list_breakpoints(&mut session).await
        };
        let breakpoints = self.settle(&key, result).await?;
        Ok(CallToolResult::structured(json!({
            "breakpoints": breakpoints,
        })))
    }

    #[tool(description = "Continue execution")]
    async fn debugger_continue(
        &self,
        params: Parameters<DebuggerContinueParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            match session.continue_execution().await {
                Ok(output) if params.detect_crash => session
                    .detect_early_crash()
                    .await
                    .map(|crash| (output, crash)),
                Ok(output) => Ok((output, None)),
                Err(e) => Err(e),
            }
        };
        let (output, early_crash) = self.settle(&key, result).await?;
        Ok(CallToolResult::structured(json!({
            "output": output,
            "early_crash": early_crash,
        })))
    }

    #[tool(description = "Interrupt the running target and wait for the stop to be confirmed")]
    async fn debugger_interrupt(
        &self,
        params: Parameters<SessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let key = parse_key(&params.0.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            session.interrupt().await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Single-step the stopped target: over, into or out")]
    async fn debugger_step(
        &self,
        params: Parameters<DebuggerStepParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let kind = parse_step_kind(&params.kind)?;
        let result = {
            let mut session = self.session(&key).await?;
            session.step(kind).await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Read target memory as bytes")]
    async fn debugger_read_memory(
        &self,
        params: Parameters<DebuggerReadMemoryParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let result = {
            let mut session = self.session(&key).await?;
            ops::memory::read_memory(&mut session, &params.address, params.count).await
        };
        structured(&self.settle(&key, result).await?)
    }

    #[tool(description = "Collect pending debugger output and report the target state")]
    async fn debugger_state(
        &self,
        params: Parameters<DebuggerStateParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let key = parse_key(&params.key)?;
        let wait = Duration::from_millis(params.wait_ms.min(MAX_POLL_WAIT_MS));
        let result = {
            let mut session = self.session(&key).await?;
            session
                .poll(wait)
                .await
                .map(|polled| (polled, session.summary()))
        };
        let (polled, summary) = self.settle(&key, result).await?;
        Ok(CallToolResult::structured(json!({
            "session": summary,
            "output": polled.output,
            "state": polled.state,
            "crash": polled.crash,
        })))
    }

    #[tool(description = "List debugger sessions")]
    async fn debugger_list_sessions(
        &self,
        _params: Parameters<ListSessionsParams>,
    ) -> Result<CallToolResult, McpError> {
        let pruned = self.registry.prune_stale().await;
        let keys: Vec<String> = self
            .registry
            .keys()
            .await
            .iter()
            .map(ToString::to_string)
            .collect();
        let sessions = self.registry.summaries().await;
        Ok(CallToolResult::structured(json!({
            "keys": keys,
            "sessions": sessions,
            "pruned": pruned.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })))
    }

    #[tool(description = "Find the newest system crash report for a process")]
    async fn debugger_crash_report(
        &self,
        params: Parameters<DebuggerCrashReportParams>,
    ) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let process_name = params
            .process_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let scanner = CrashReportScanner::new(&self.config.crash_report_dir, &self.config.dialect);

        if let Some(raw_key) = params.key.as_deref() {
            let key = parse_key(raw_key)?;
            let evidence = {
                let session = self.session(&key).await?;
                scanner.for_session(&session, process_name).await
            };
            return Ok(CallToolResult::structured(json!({
                "directory": scanner.dir(),
                "key": key.to_string(),
                "evidence": evidence.map_err(to_mcp_error)?,
            })));
        }

        let process_name = process_name.ok_or_else(|| {
            McpError::invalid_params("either key or process_name is required", None)
        })?;
        let window = params.since_secs.unwrap_or(DEFAULT_CRASH_REPORT_WINDOW_SECS);
        let since = SystemTime::now()
            .checked_sub(Duration::from_secs(window))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let report = scanner
            .latest_for(process_name, since)
            .await
            .map_err(to_mcp_error)?;
        Ok(CallToolResult::structured(json!({
            "directory": scanner.dir(),
            "report": report,
        })))
    }
}

#[tool_handler]
impl ServerHandler for DebuggerMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Debugger MCP Server driving LLDB sessions keyed by pid or bundle id, with crash detection".into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = SessionConfig::from_env();
    tracing::info!(
        debugger = %config.debugger_path,
        simulator = %config.simulator,
        idle_ttl_secs = config.idle_ttl.map(|ttl| ttl.as_secs()),
        "Loaded session config"
    );

    let server = DebuggerMcpServer::new(config);
    let registry = server.registry.clone();

    let pruner = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                ticker.tick().await;
                let pruned = registry.prune_stale().await;
                if !pruned.is_empty() {
                    tracing::info!(count = pruned.len(), "Pruned debugger sessions");
                }
            }
        })
    };

    let transport = transport::stdio();

    tracing::info!("Starting Debugger MCP Server on stdio...");

    server.serve(transport).await?.waiting().await?;

    pruner.abort();
    registry.shutdown_all().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lldb_bridge_core::TargetState;

    fn assert_no_bare_true(schema: &schemars::Schema, fields: &[&str]) {
        let json = serde_json::to_string(schema).expect("schema serialization must succeed");
        for field in fields {
            assert!(
                !json.contains(&format!("\"{field}\":true"))
                    && !json.contains(&format!("\"{field}\": true")),
                "Schema contains bare 'true' for {field} field:\n{}",
                serde_json::to_string_pretty(schema)
                    .expect("pretty schema serialization must succeed")
            );
        }
    }

    #[test]
    fn debugger_attach_params_schema_has_no_bare_true() {
        let schema = schemars::schema_for!(DebuggerAttachParams);
        assert_no_bare_true(&schema, &["pid", "bundle_id", "launch", "stop_at_entry"]);
    }

    #[test]
    fn debugger_variables_params_schema_has_no_bare_true_for_names() {
        let schema = schemars::schema_for!(DebuggerVariablesParams);
        assert_no_bare_true(&schema, &["names", "frame"]);
    }

    #[test]
    fn attach_params_default_to_attach_with_crash_detection() {
        let params: DebuggerAttachParams =
            serde_json::from_value(json!({"bundle_id": "com.example.App"}))
                .expect("params should deserialize");
        assert_eq!(params.pid, None);
        assert!(!params.launch);
        assert!(!params.stop_at_entry);
        assert!(params.detect_early_crash);
    }

    #[test]
    fn parse_key_accepts_pid_and_bundle() {
        assert_eq!(parse_key("1001").expect("pid key"), SessionKey::Pid(1001));
        assert_eq!(
            parse_key("com.example.App").expect("bundle key"),
            SessionKey::Bundle("com.example.App".into())
        );
        assert!(parse_key("  ").is_err());
    }

    #[test]
    fn parse_step_kind_accepts_known_kinds() {
        assert_eq!(parse_step_kind("over").expect("over"), StepKind::Over);
        assert_eq!(parse_step_kind("Into").expect("into"), StepKind::Into);
        assert_eq!(parse_step_kind("in").expect("in"), StepKind::Into);
        assert_eq!(parse_step_kind("out").expect("out"), StepKind::Out);
        assert!(parse_step_kind("sideways").is_err());
    }

    #[test]
    fn to_mcp_error_carries_key_state_and_partial_output() {
        let err = to_mcp_error(SessionError::Timeout {
            key: SessionKey::Pid(1001),
            state: TargetState::Running,
            command: "bt".into(),
            timeout: Duration::from_secs(2),
            partial: "frame #0".into(),
        });
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
        let data = err.data.expect("error data");
        assert_eq!(data["key"], "pid:1001");
        assert_eq!(data["state"]["state"], "running");
        assert_eq!(data["partial_output"], "frame #0");
    }

    #[test]
    fn to_mcp_error_maps_caller_mistakes_to_invalid_params() {
        let err = to_mcp_error(SessionError::invalid_params("count must be positive"));
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.data.is_none());

        let err = to_mcp_error(SessionError::SessionNotFound {
            key: SessionKey::Bundle("com.example.App".into()),
        });
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("bundle:com.example.App"));
    }

    #[tokio::test]
    async fn tools_on_unknown_session_report_not_found() {
        let server = DebuggerMcpServer::new(SessionConfig::default());
        let err = server
            .debugger_stack(Parameters(DebuggerStackParams {
                key: "4242".into(),
                thread: None,
                limit: None,
            }))
            .await
            .expect_err("no session registered");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = server
            .debugger_detach(Parameters(SessionParams {
                key: "4242".into(),
            }))
            .await
            .expect_err("no session registered");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    fn attach_pid(pid: u32) -> DebuggerAttachParams {
        DebuggerAttachParams {
            pid: Some(pid),
            bundle_id: None,
            launch: false,
            stop_at_entry: false,
            detect_early_crash: true,
        }
    }

    const ATTACH_STOPS: &str = r#"printf 'Process 4242 stopped\n* thread #1, stop reason = signal SIGSTOP\nExecutable module set to "/tmp/Demo.app/Demo".\n(lldb) '"#;

    /// Runs a prompt-driven shell loop standing in for lldb.
    fn scripted_config(on_attach: &str) -> SessionConfig {
        let script = format!(
            r#"printf '(lldb) '
while IFS= read -r line; do
  case "$line" in
    "process attach"*) {on_attach} ;;
    quit) exit 0 ;;
    *) printf '(lldb) ' ;;
  esac
done"#
        );
        SessionConfig {
            debugger_path: "/bin/sh".into(),
            debugger_args: vec!["-c".into(), script],
            command_timeout: Duration::from_secs(5),
            startup_timeout: Duration::from_secs(5),
            crash_report_dir: "/nonexistent/reports".into(),
            ..SessionConfig::default()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_attach_leaves_no_session() {
        let server = DebuggerMcpServer::new(scripted_config("exec sleep 30"));

        let attach = server.debugger_attach(Parameters(attach_pid(4242)));
        let outcome = tokio::time::timeout(Duration::from_secs(1), attach).await;
        assert!(outcome.is_err(), "attach never completes");

        assert!(server.registry.is_empty().await);
        assert!(server.registry.summaries().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crash_report_by_key_uses_the_session() {
        let server = DebuggerMcpServer::new(scripted_config(ATTACH_STOPS));
        server
            .debugger_attach(Parameters(attach_pid(4242)))
            .await
            .expect("attach should succeed");
        assert_eq!(server.registry.keys().await, vec![SessionKey::Pid(4242)]);

        let result = server
            .debugger_crash_report(Parameters(DebuggerCrashReportParams {
                key: Some("4242".into()),
                process_name: None,
                since_secs: None,
            }))
            .await
            .expect("crash report by key");
        let value = serde_json::to_value(&result).expect("result serializes");
        assert_eq!(value["structuredContent"]["key"], "pid:4242");
        assert_eq!(value["structuredContent"]["evidence"]["source"], "not_found");

        server.registry.shutdown_all().await;
        assert!(server.registry.is_empty().await);
    }

    #[tokio::test]
    async fn crash_report_needs_key_or_process_name() {
        let server = DebuggerMcpServer::new(SessionConfig::default());
        let err = server
            .debugger_crash_report(Parameters(DebuggerCrashReportParams {
                key: None,
                process_name: Some("  ".into()),
                since_secs: None,
            }))
            .await
            .expect_err("nothing to search for");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = server
            .debugger_crash_report(Parameters(DebuggerCrashReportParams {
                key: Some("4242".into()),
                process_name: Some("Demo".into()),
                since_secs: None,
            }))
            .await
            .expect_err("no session registered");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn attach_without_target_is_invalid() {
        let server = DebuggerMcpServer::new(SessionConfig::default());
        let err = server
            .debugger_attach(Parameters(DebuggerAttachParams {
                pid: None,
                bundle_id: None,
                launch: false,
                stop_at_entry: false,
                detect_early_crash: true,
            }))
            .await
            .expect_err("pid or bundle_id is required");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(server.registry.is_empty().await);
    }
}
