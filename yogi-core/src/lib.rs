//! Yogi branch protocol core.
//! No I/O: identities, wire formats, authentication and bookkeeping that the
//! runtime drives from its sockets and timers.

pub mod flags;

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod identity;
pub mod protocol;
pub mod registry;
pub mod signals;
pub mod subscription;
pub mod time;
pub mod wire;

pub use config::{BranchConfig, BranchProperties, HostInfo};
pub use connection::{is_transient, ConnectionProgress, ConnectionState};
pub use error::{Error, ErrorCode, Result};
pub use events::{BranchEvent, BranchEvents, EventOutcome};
pub use identity::{BranchIdentity, BranchNetworkConfig, LocalBranchInfo, RemoteBranchInfo};
pub use protocol::{Message, VERSION_MAJOR, VERSION_MINOR};
pub use registry::{BranchRegistry, RemoteBranchRecord};
pub use signals::Signals;
pub use subscription::OneShotSlot;
pub use time::{Duration, Timestamp};
pub use wire::{encode_frame, FrameDecodeError, FrameEncodeError};
