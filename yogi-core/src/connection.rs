//! Connection state machine, checked transitions only.

use std::fmt;

use crate::error::{Error, ErrorCode, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    ExchangingMetadata,
    Authenticating,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Forward one step, or to `Failed` from anywhere but `Failed`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, ExchangingMetadata)
                | (Connecting, ExchangingMetadata)
                | (ExchangingMetadata, Authenticating)
                | (Authenticating, Connected)
        ) || (next == Failed && self != Failed)
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Failed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::ExchangingMetadata => "exchanging metadata",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Whether a failed attempt may be retried on the next advertisement.
/// Protocol and policy failures are permanent for that remote branch.
pub fn is_transient(code: ErrorCode) -> bool {
    !matches!(
        code,
        ErrorCode::InvalidMagicPrefix
            | ErrorCode::IncompatibleVersion
            | ErrorCode::DeserializeMsgFailed
            | ErrorCode::MessageTooLarge
            | ErrorCode::PasswordMismatch
            | ErrorCode::NetNameMismatch
            | ErrorCode::DuplicateBranchName
            | ErrorCode::DuplicateBranchPath
            | ErrorCode::LoopbackConnection
    )
}

/// Tracks one connection's progress and the error that ended it.
#[derive(Debug, Clone)]
pub struct ConnectionProgress {
    state: ConnectionState,
    failure: Option<Error>,
}

impl Default for ConnectionProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionProgress {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            failure: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn advance(&mut self, next: ConnectionState) -> Result<()> {
        if !self.state.can_transition_to(next) || next == ConnectionState::Failed {
            return Err(Error::with_details(
                ErrorCode::Unknown,
                format!("invalid connection transition {} -> {}", self.state, next),
            ));
        }
        self.state = next;
        Ok(())
    }

    /// Enter `Failed`, keeping the first error.
    pub fn fail(&mut self, err: Error) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.state = ConnectionState::Failed;
    }
}
