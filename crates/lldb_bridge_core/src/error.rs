use crate::channel::ChannelError;
use crate::state::TargetState;
use crate::types::SessionKey;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Channel error on session {key} (state: {state}): {source}")]
    Channel {
        key: SessionKey,
        state: TargetState,
        #[source]
        source: ChannelError,
    },

    #[error("Command '{command}' timed out after {timeout:?} on session {key} (state: {state})")]
    Timeout {
        key: SessionKey,
        state: TargetState,
        command: String,
        timeout: Duration,
        partial: String,
    },

    #[error("Session {key} target is running; '{operation}' requires a stopped process. Interrupt it first.")]
    ProcessRunning { key: SessionKey, operation: String },

    #[error("No debugger session for {key}")]
    SessionNotFound { key: SessionKey },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Failed to spawn debugger '{path}': {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to resolve '{bundle_id}' to a process id: {message}")]
    Resolve { bundle_id: String, message: String },

    #[error("Failed to launch '{bundle_id}': {message}")]
    Launch { bundle_id: String, message: String },

    #[error("Debugger rejected '{command}' on session {key} (state: {state}): {message}")]
    Debugger {
        key: SessionKey,
        state: TargetState,
        command: String,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// The session that produced this error must be evicted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Channel { .. })
    }

    pub fn key(&self) -> Option<&SessionKey> {
        match self {
            SessionError::Channel { key, .. }
            | SessionError::Timeout { key, .. }
            | SessionError::ProcessRunning { key, .. }
            | SessionError::SessionNotFound { key }
            | SessionError::Debugger { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<TargetState> {
        match self {
            SessionError::Channel { state, .. }
            | SessionError::Timeout { state, .. }
            | SessionError::Debugger { state, .. } => Some(state.clone()),
            SessionError::ProcessRunning { .. } => Some(TargetState::Running),
            _ => None,
        }
    }

    /// Transcript captured before a timeout.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            SessionError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}
