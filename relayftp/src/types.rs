//! # Types
//!
//! Errors, replies and the small value types shared by the session and the transfers

use std::fmt;
use std::string::FromUtf8Error;

use thiserror::Error;

use super::endpoint::TupleError;
use super::status::{ReplyClass, Status};

/// A shorthand for a Result whose error type is always an FtpError.
pub type FtpResult<T> = std::result::Result<T, FtpError>;

/// `FtpError` is a library-global error type to describe the different kinds of
/// errors that might occur while talking to the server.
#[derive(Debug, Error)]
pub enum FtpError {
    /// A connection could not be established or accepted
    #[error("Connection error: {0}")]
    ConnectionError(std::io::Error),
    /// The control channel was closed or became unreadable in the middle of a reply
    #[error("Protocol error: {0}")]
    ProtocolError(std::io::Error),
    /// The passive mode reply could not be parsed. The session remains usable.
    #[error("Malformed reply ({reason}): {response}")]
    MalformedReply {
        response: Response,
        reason: TupleError,
    },
    /// The data connection or the local file failed during a transfer
    #[error("Transfer error: {0}")]
    TransferError(std::io::Error),
    /// The server refused a step of a transfer. Contains the refusal.
    #[error("Invalid response: {0}")]
    UnexpectedResponse(Response),
    /// A transfer was requested before any PASV or PORT
    #[error("No data connection negotiated: use PASV or PORT first")]
    NotNegotiated,
    /// The transfer registry is full
    #[error("Too many transfers in flight (limit is {0})")]
    TooManyTransfers(usize),
}

/// A complete reply from the ftp server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    /// Three digit code of the terminal line
    pub code: u32,
    /// Every line of the reply, terminators included
    pub body: Vec<u8>,
}

/// File Type used in `TYPE` command. Transfers always move raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// Image (binary)
    Binary,
}

/// Connection mode for data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The server dials in to a listener opened by the client (PORT)
    Active,
    /// The client dials out to an endpoint announced by the server (PASV)
    Passive,
}

/// Which way the bytes of a transfer flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// RETR: remote file to local file
    Download,
    /// STOR: local file to remote file
    Upload,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}",
            self.code,
            self.as_string().ok().unwrap_or_default()
        )
    }
}

impl Response {
    /// Instantiates a new `Response`
    pub fn new(code: u32, body: Vec<u8>) -> Self {
        Self { code, body }
    }

    /// Known status for the reply code, [`Status::Unknown`] otherwise
    pub fn status(&self) -> Status {
        Status::from(self.code)
    }

    /// Reply class, given by the first digit of the code
    pub fn class(&self) -> ReplyClass {
        ReplyClass::of(self.code)
    }

    /// Whether the server will send another reply for the same command (1xx)
    pub fn is_preliminary(&self) -> bool {
        self.class() == ReplyClass::Preliminary
    }

    /// Whether the command completed successfully (2xx)
    pub fn is_completion(&self) -> bool {
        self.class() == ReplyClass::Completion
    }

    /// Get response as string, trailing line terminators removed
    pub fn as_string(&self) -> Result<String, FromUtf8Error> {
        String::from_utf8(self.body.clone()).map(|x| x.trim_end().to_string())
    }

    /// Raw reply text as sent by the server, invalid UTF-8 replaced
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Binary => write!(f, "I"),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Active => write!(f, "active"),
            Mode::Passive => write!(f, "passive"),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}
