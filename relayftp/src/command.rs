//! # Command
//!
//! The set of FTP commands sent on the control channel

use std::fmt;

use crate::types::FileType;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Ftp commands with their arguments.
///
/// Arguments are forwarded verbatim: the server is the one validating them.
pub enum Command {
    /// Remove file at specified path
    Dele(String),
    /// Make directory
    Mkd(String),
    /// Provide login password
    Pass(String),
    /// Passive mode
    Pasv,
    /// Specifies an address and port to which the server should connect (active mode)
    Port(String),
    /// Print working directory
    Pwd,
    /// Quit
    Quit,
    /// Resume the next transfer from offset
    Rest(String),
    /// Retrieve file
    Retr(String),
    /// Put file at specified path
    Store(String),
    /// Set transfer type
    Type(FileType),
    /// Provide user to login as
    User(String),
}

impl Command {
    /// Whether the server answers with a preliminary reply, then a final one
    pub fn is_transfer(&self) -> bool {
        matches!(self, Self::Retr(_) | Self::Store(_))
    }

    /// Command as it may appear in logs; passwords are masked
    pub fn redacted(&self) -> String {
        match self {
            Self::Pass(_) => "PASS ******".to_string(),
            cmd => cmd.to_string(),
        }
    }
}

/// Write `verb` followed by `arg`, or only `verb` when there is no argument
fn verb_with_arg(f: &mut fmt::Formatter<'_>, verb: &str, arg: &str) -> fmt::Result {
    if arg.is_empty() {
        write!(f, "{verb}")
    } else {
        write!(f, "{verb} {arg}")
    }
}

// -- stringify

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dele(p) => verb_with_arg(f, "DELE", p),
            Self::Mkd(p) => verb_with_arg(f, "MKD", p),
            Self::Pass(p) => verb_with_arg(f, "PASS", p),
            Self::Pasv => write!(f, "PASV"),
            Self::Port(p) => verb_with_arg(f, "PORT", p),
            Self::Pwd => write!(f, "PWD"),
            Self::Quit => write!(f, "QUIT"),
            Self::Rest(offset) => verb_with_arg(f, "REST", offset),
            Self::Retr(p) => verb_with_arg(f, "RETR", p),
            Self::Store(p) => verb_with_arg(f, "STOR", p),
            Self::Type(t) => write!(f, "TYPE {t}"),
            Self::User(u) => verb_with_arg(f, "USER", u),
        }
    }
}
