//! Branch wire protocol: version, magic prefix, and the framed messages
//! exchanged after the info messages.

use serde::{Deserialize, Serialize};

/// Every advertising and info message starts with this prefix.
pub const MAGIC_PREFIX: [u8; 5] = *b"YOGI\0";

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 3;

/// Length of an authentication challenge in bytes.
pub const CHALLENGE_LEN: usize = 8;

/// Messages exchanged over an established TCP connection once both info
/// messages have been read. Encoding is bincode; framing is length-prefix (see
/// the wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Info message received and accepted.
    InfoAck,
    /// Random bytes the peer must answer with [`Message::Solution`].
    Challenge([u8; CHALLENGE_LEN]),
    /// SHA-256 over the peer's challenge and the hashed password.
    Solution([u8; 32]),
    /// Whether the peer's solution matched.
    AuthVerdict { accepted: bool },
    /// Result of validating the peer's identity against the local branch and
    /// registry. `code` is 0 for success or a negative error code.
    Verdict { code: i32 },
    /// Keeps an idle connection alive.
    Heartbeat,
}
