//! Branch events: kinds as flags, payloads as a closed enum.

use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::identity::RemoteBranchInfo;

crate::bit_flags! {
    /// Event kinds a subscriber can wait for.
    pub struct BranchEvents: u32 {
        const BRANCH_DISCOVERED = 1 << 0;
        const BRANCH_QUERIED = 1 << 1;
        const CONNECT_FINISHED = 1 << 2;
        const CONNECTION_LOST = 1 << 3;
    }
}

/// A branch event with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchEvent {
    /// Advertising message from an unknown branch.
    BranchDiscovered {
        uuid: Uuid,
        tcp_server_address: String,
        tcp_server_port: u16,
    },
    /// Info received from a remote branch. On failure only the uuid is known.
    BranchQueried { uuid: Uuid, info: Option<RemoteBranchInfo> },
    ConnectFinished { uuid: Uuid },
    ConnectionLost { uuid: Uuid },
}

impl BranchEvent {
    pub fn kind(&self) -> BranchEvents {
        match self {
            BranchEvent::BranchDiscovered { .. } => BranchEvents::BRANCH_DISCOVERED,
            BranchEvent::BranchQueried { .. } => BranchEvents::BRANCH_QUERIED,
            BranchEvent::ConnectFinished { .. } => BranchEvents::CONNECT_FINISHED,
            BranchEvent::ConnectionLost { .. } => BranchEvents::CONNECTION_LOST,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            BranchEvent::BranchDiscovered { uuid, .. }
            | BranchEvent::BranchQueried { uuid, .. }
            | BranchEvent::ConnectFinished { uuid }
            | BranchEvent::ConnectionLost { uuid } => *uuid,
        }
    }

    /// JSON payload as handed to subscribers. Always carries `uuid`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BranchEvent::BranchDiscovered {
                uuid,
                tcp_server_address,
                tcp_server_port,
            } => json!({
                "uuid": uuid.to_string(),
                "tcp_server_address": tcp_server_address,
                "tcp_server_port": tcp_server_port,
            }),
            BranchEvent::BranchQueried {
                info: Some(info), ..
            } => info.to_json(),
            BranchEvent::BranchQueried { uuid, info: None }
            | BranchEvent::ConnectFinished { uuid }
            | BranchEvent::ConnectionLost { uuid } => json!({ "uuid": uuid.to_string() }),
        }
    }

    /// Serialized payload, failing with `BufferTooSmall` if it exceeds
    /// `buffer_size` bytes including a terminating NUL.
    pub fn serialize_into(&self, buffer_size: usize) -> Result<String> {
        fit_buffer(self.to_json().to_string(), buffer_size)
    }
}

/// Check that `s` plus a terminating NUL fits into `buffer_size` bytes.
pub fn fit_buffer(s: String, buffer_size: usize) -> Result<String> {
    if s.len() + 1 > buffer_size {
        return Err(Error::with_details(
            ErrorCode::BufferTooSmall,
            format!("{} bytes needed, {} supplied", s.len() + 1, buffer_size),
        ));
    }
    Ok(s)
}

/// What an event subscription resolves to. Exactly one per subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event and its own result (e.g. why a connection attempt failed).
    Event {
        event: BranchEvent,
        json: String,
        result: Result<()>,
    },
    /// An event fired but its payload did not fit the subscription's buffer.
    BufferTooSmall {
        kind: BranchEvents,
        result: Result<()>,
    },
    /// Replaced by a newer subscription, cancelled, or the branch went away.
    Canceled,
}

impl EventOutcome {
    /// Build the outcome for a subscription with `buffer_size`.
    pub fn deliver(event: BranchEvent, result: Result<()>, buffer_size: usize) -> Self {
        match event.serialize_into(buffer_size) {
            Ok(json) => EventOutcome::Event {
                event,
                json,
                result,
            },
            Err(_) => EventOutcome::BufferTooSmall {
                kind: event.kind(),
                result,
            },
        }
    }

    /// Overall result of the wait: `Canceled` or `BufferTooSmall` errors, else
    /// success.
    pub fn overall(&self) -> Result<()> {
        match self {
            EventOutcome::Event { .. } => Ok(()),
            EventOutcome::BufferTooSmall { .. } => Err(ErrorCode::BufferTooSmall.into()),
            EventOutcome::Canceled => Err(ErrorCode::Canceled.into()),
        }
    }
}
