//! Wire formats.
//!
//! * Advertising message (UDP, 25 bytes): magic prefix, version major/minor,
//!   uuid, TCP server port (big endian).
//! * Info message (TCP, first bytes in each direction): the advertising
//!   message, a big-endian u32 body length and the JSON identity body.
//! * Frames (TCP, afterwards): length-prefix (4 bytes LE) + bincode payload.

use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::identity::BranchIdentity;
use crate::protocol::{Message, MAGIC_PREFIX, VERSION_MAJOR, VERSION_MINOR};

pub const ADVERTISING_MESSAGE_LEN: usize = 25;
pub const INFO_HEADER_LEN: usize = ADVERTISING_MESSAGE_LEN + 4;
/// Upper bound for info message bodies and frame payloads.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024;

const LEN_SIZE: usize = 4;
const MAX_FRAME_LEN: u32 = MAX_MESSAGE_SIZE as u32;

/// Contents of an advertising message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advertisement {
    pub uuid: Uuid,
    pub tcp_port: u16,
}

pub fn encode_advertising(adv: &Advertisement) -> [u8; ADVERTISING_MESSAGE_LEN] {
    let mut out = [0u8; ADVERTISING_MESSAGE_LEN];
    out[..5].copy_from_slice(&MAGIC_PREFIX);
    out[5] = VERSION_MAJOR;
    out[6] = VERSION_MINOR;
    out[7..23].copy_from_slice(adv.uuid.as_bytes());
    out[23..25].copy_from_slice(&adv.tcp_port.to_be_bytes());
    out
}

/// Checks size, magic prefix and version, in that order.
pub fn decode_advertising(bytes: &[u8]) -> Result<Advertisement> {
    if bytes.len() != ADVERTISING_MESSAGE_LEN {
        return Err(Error::with_details(
            ErrorCode::DeserializeMsgFailed,
            format!(
                "advertising message has {} bytes, expected {}",
                bytes.len(),
                ADVERTISING_MESSAGE_LEN
            ),
        ));
    }
    if bytes[..5] != MAGIC_PREFIX {
        return Err(ErrorCode::InvalidMagicPrefix.into());
    }
    if bytes[5] != VERSION_MAJOR || bytes[6] != VERSION_MINOR {
        return Err(Error::with_details(
            ErrorCode::IncompatibleVersion,
            format!(
                "remote version {}.{}, local {}.{}",
                bytes[5], bytes[6], VERSION_MAJOR, VERSION_MINOR
            ),
        ));
    }
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&bytes[7..23]);
    Ok(Advertisement {
        uuid: Uuid::from_bytes(uuid),
        tcp_port: u16::from_be_bytes([bytes[23], bytes[24]]),
    })
}

/// Header of an info message; the body follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoHeader {
    pub advertisement: Advertisement,
    pub body_len: usize,
}

pub fn encode_info(identity: &BranchIdentity) -> Result<Vec<u8>> {
    let body = identity.to_json_vec();
    if body.len() > MAX_MESSAGE_SIZE {
        return Err(ErrorCode::MessageTooLarge.into());
    }
    let adv = encode_advertising(&Advertisement {
        uuid: identity.uuid,
        tcp_port: identity.tcp_server_port,
    });
    let mut out = Vec::with_capacity(INFO_HEADER_LEN + body.len());
    out.extend_from_slice(&adv);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

pub fn decode_info_header(bytes: &[u8; INFO_HEADER_LEN]) -> Result<InfoHeader> {
    let advertisement = decode_advertising(&bytes[..ADVERTISING_MESSAGE_LEN])?;
    let body_len = u32::from_be_bytes([bytes[25], bytes[26], bytes[27], bytes[28]]) as usize;
    if body_len > MAX_MESSAGE_SIZE {
        return Err(Error::with_details(
            ErrorCode::MessageTooLarge,
            format!("info body of {} bytes", body_len),
        ));
    }
    Ok(InfoHeader {
        advertisement,
        body_len,
    })
}

/// Parse the body and check it agrees with the header.
pub fn decode_info_body(header: &InfoHeader, body: &[u8]) -> Result<BranchIdentity> {
    let identity = BranchIdentity::from_json_slice(body)?;
    if identity.uuid != header.advertisement.uuid
        || identity.tcp_server_port != header.advertisement.tcp_port
    {
        return Err(Error::with_details(
            ErrorCode::DeserializeMsgFailed,
            "info body does not match its header",
        ));
    }
    Ok(identity)
}

/// One session frame: the payload length as a little-endian u32, then the
/// bincode payload.
pub fn encode_frame(msg: &Message) -> std::result::Result<Vec<u8>, FrameEncodeError> {
    let mut out = vec![0u8; LEN_SIZE];
    bincode::serialize_into(&mut out, msg)?;
    let payload_len = out.len() - LEN_SIZE;
    if payload_len > MAX_MESSAGE_SIZE {
        return Err(FrameEncodeError::TooLarge(payload_len));
    }
    out[..LEN_SIZE].copy_from_slice(&(payload_len as u32).to_le_bytes());
    Ok(out)
}

/// A message that cannot be framed.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("bincode: {0}")]
    Encode(#[from] bincode::Error),
    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),
}

/// Length announced by a frame prefix, checked against the frame limit.
pub fn frame_len(prefix: [u8; LEN_SIZE]) -> std::result::Result<usize, FrameDecodeError> {
    match u32::from_le_bytes(prefix) {
        len if len > MAX_FRAME_LEN => Err(FrameDecodeError::TooLarge(len)),
        len => Ok(len as usize),
    }
}

/// Decode a frame payload whose length prefix has already been consumed.
pub fn decode_payload(payload: &[u8]) -> std::result::Result<Message, FrameDecodeError> {
    bincode::deserialize(payload).map_err(FrameDecodeError::Decode)
}

/// A frame that announces too many bytes or does not decode.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame announces {0} bytes")]
    TooLarge(u32),
    #[error("bincode: {0}")]
    Decode(#[from] bincode::Error),
}

impl From<FrameEncodeError> for Error {
    fn from(e: FrameEncodeError) -> Self {
        match e {
            e @ FrameEncodeError::TooLarge(_) => {
                Error::with_details(ErrorCode::MessageTooLarge, e.to_string())
            }
            FrameEncodeError::Encode(e) => Error::with_details(ErrorCode::Unknown, e.to_string()),
        }
    }
}

impl From<FrameDecodeError> for Error {
    fn from(e: FrameDecodeError) -> Self {
        match e {
            e @ FrameDecodeError::TooLarge(_) => {
                Error::with_details(ErrorCode::MessageTooLarge, e.to_string())
            }
            FrameDecodeError::Decode(e) => {
                Error::with_details(ErrorCode::DeserializeMsgFailed, e.to_string())
            }
        }
    }
}
