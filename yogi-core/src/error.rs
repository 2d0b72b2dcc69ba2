//! Error taxonomy: fixed negative error codes with fixed descriptions.

use std::fmt;

/// Error codes. The numeric values are part of the wire protocol (verdict
/// frames carry them), so they never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Unknown = -1,
    ObjectStillUsed = -2,
    BadAlloc = -3,
    InvalidParam = -4,
    InvalidHandle = -5,
    WrongObjectType = -6,
    Canceled = -7,
    Busy = -8,
    Timeout = -9,
    TimerExpired = -10,
    BufferTooSmall = -11,
    OpenSocketFailed = -12,
    BindSocketFailed = -13,
    ListenSocketFailed = -14,
    SetSocketOptionFailed = -15,
    InvalidRegex = -16,
    OpenFileFailed = -17,
    RwSocketFailed = -18,
    ConnectSocketFailed = -19,
    InvalidMagicPrefix = -20,
    IncompatibleVersion = -21,
    DeserializeMsgFailed = -22,
    AcceptSocketFailed = -23,
    LoopbackConnection = -24,
    PasswordMismatch = -25,
    NetNameMismatch = -26,
    DuplicateBranchName = -27,
    DuplicateBranchPath = -28,
    MessageTooLarge = -29,
    ParsingCmdlineFailed = -30,
    ParsingJsonFailed = -31,
    ParsingFileFailed = -32,
    ConfigNotValid = -33,
    HelpRequested = -34,
    WriteToFileFailed = -35,
    UndefinedVariables = -36,
    NoVariableSupport = -37,
    VariableUsedInKey = -38,
    InvalidTimeFormat = -39,
    ParsingTimeFailed = -40,
}

const ALL_CODES: [ErrorCode; 40] = [
    ErrorCode::Unknown,
    ErrorCode::ObjectStillUsed,
    ErrorCode::BadAlloc,
    ErrorCode::InvalidParam,
    ErrorCode::InvalidHandle,
    ErrorCode::WrongObjectType,
    ErrorCode::Canceled,
    ErrorCode::Busy,
    ErrorCode::Timeout,
    ErrorCode::TimerExpired,
    ErrorCode::BufferTooSmall,
    ErrorCode::OpenSocketFailed,
    ErrorCode::BindSocketFailed,
    ErrorCode::ListenSocketFailed,
    ErrorCode::SetSocketOptionFailed,
    ErrorCode::InvalidRegex,
    ErrorCode::OpenFileFailed,
    ErrorCode::RwSocketFailed,
    ErrorCode::ConnectSocketFailed,
    ErrorCode::InvalidMagicPrefix,
    ErrorCode::IncompatibleVersion,
    ErrorCode::DeserializeMsgFailed,
    ErrorCode::AcceptSocketFailed,
    ErrorCode::LoopbackConnection,
    ErrorCode::PasswordMismatch,
    ErrorCode::NetNameMismatch,
    ErrorCode::DuplicateBranchName,
    ErrorCode::DuplicateBranchPath,
    ErrorCode::MessageTooLarge,
    ErrorCode::ParsingCmdlineFailed,
    ErrorCode::ParsingJsonFailed,
    ErrorCode::ParsingFileFailed,
    ErrorCode::ConfigNotValid,
    ErrorCode::HelpRequested,
    ErrorCode::WriteToFileFailed,
    ErrorCode::UndefinedVariables,
    ErrorCode::NoVariableSupport,
    ErrorCode::VariableUsedInKey,
    ErrorCode::InvalidTimeFormat,
    ErrorCode::ParsingTimeFailed,
];

impl ErrorCode {
    /// Numeric value of the code (always negative).
    pub fn value(self) -> i32 {
        self as i32
    }

    /// Look up a code by its numeric value. Returns `None` for values that do
    /// not name an error (including success values >= 0).
    pub fn from_value(value: i32) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.value() == value)
    }

    /// All defined codes, in numeric order from -1 downwards.
    pub fn all() -> &'static [ErrorCode] {
        &ALL_CODES
    }

    /// Fixed human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::Unknown => "Unknown internal error",
            ErrorCode::ObjectStillUsed => "Object is still being used by another object",
            ErrorCode::BadAlloc => "Memory allocation failed",
            ErrorCode::InvalidParam => "Invalid parameter",
            ErrorCode::InvalidHandle => "Invalid handle",
            ErrorCode::WrongObjectType => "Wrong object type",
            ErrorCode::Canceled => "Operation has been canceled",
            ErrorCode::Busy => "Object is busy",
            ErrorCode::Timeout => "The operation timed out",
            ErrorCode::TimerExpired => "The timer has not been started or already expired",
            ErrorCode::BufferTooSmall => "The supplied buffer is too small",
            ErrorCode::OpenSocketFailed => "Could not open a socket",
            ErrorCode::BindSocketFailed => "Could not bind a socket",
            ErrorCode::ListenSocketFailed => "Could not listen on socket",
            ErrorCode::SetSocketOptionFailed => "Could not set a socket option",
            ErrorCode::InvalidRegex => "Invalid regular expression",
            ErrorCode::OpenFileFailed => "Could not open file",
            ErrorCode::RwSocketFailed => "Could not read from or write to socket",
            ErrorCode::ConnectSocketFailed => "Could not connect a socket",
            ErrorCode::InvalidMagicPrefix => {
                "The magic prefix sent when establishing a connection is wrong"
            }
            ErrorCode::IncompatibleVersion => {
                "The local and remote branches use incompatible Yogi versions"
            }
            ErrorCode::DeserializeMsgFailed => "Could not deserialize a message",
            ErrorCode::AcceptSocketFailed => "Could not accept a socket",
            ErrorCode::LoopbackConnection => "Attempting to connect branch to itself",
            ErrorCode::PasswordMismatch => "The passwords of the local and remote branch don't match",
            ErrorCode::NetNameMismatch => {
                "The network names of the local and remote branch don't match"
            }
            ErrorCode::DuplicateBranchName => {
                "A branch with the same name is already active in the network"
            }
            ErrorCode::DuplicateBranchPath => {
                "A branch with the same path is already active in the network"
            }
            ErrorCode::MessageTooLarge => "Message is too large",
            ErrorCode::ParsingCmdlineFailed => "Parsing the command line failed",
            ErrorCode::ParsingJsonFailed => "Parsing a JSON string failed",
            ErrorCode::ParsingFileFailed => "Parsing a configuration file failed",
            ErrorCode::ConfigNotValid => "The configuration is not valid",
            ErrorCode::HelpRequested => "Help/usage text requested",
            ErrorCode::WriteToFileFailed => "Could not write to file",
            ErrorCode::UndefinedVariables => "One or more configuration variables are undefined",
            ErrorCode::NoVariableSupport => "Support for configuration variables has been disabled",
            ErrorCode::VariableUsedInKey => "A configuration variable has been used in a key",
            ErrorCode::InvalidTimeFormat => "Invalid time format",
            ErrorCode::ParsingTimeFailed => "Could not parse time string",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A failed operation: an error code plus, for descriptive failures, a detail
/// string (e.g. the command line parser's message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    code: ErrorCode,
    details: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            details: None,
        }
    }

    /// Error carrying a human-readable detail string.
    pub fn with_details(code: ErrorCode, details: impl Into<String>) -> Self {
        Self {
            code,
            details: Some(details.into()),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Convenience for matching against a code without destructuring.
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(d) if !d.is_empty() => write!(f, "{}: {}", self.code.description(), d),
            _ => f.write_str(self.code.description()),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::new(code)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
