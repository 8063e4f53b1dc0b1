//! # Reply
//!
//! Assembles complete server replies out of the control connection byte stream

use std::io::{BufRead, ErrorKind};

use crate::types::{FtpError, FtpResult, Response};

/// How the end of a multi-line reply is recognized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplyFraming {
    /// A reply ends at the first line made of three digits followed by a space,
    /// whatever the digits are. A continuation line that happens to start like
    /// `200 ` ends the reply early.
    #[default]
    Lenient,
    /// A reply opened by `ddd-` only ends at a line starting with the same `ddd `.
    Strict,
}

/// Reads replies from a buffered control connection
#[derive(Debug)]
pub struct ReplyReader<R> {
    inner: R,
    framing: ReplyFraming,
}

impl<R> ReplyReader<R>
where
    R: BufRead,
{
    pub fn new(inner: R, framing: ReplyFraming) -> Self {
        Self { inner, framing }
    }

    pub fn set_framing(&mut self, framing: ReplyFraming) {
        self.framing = framing;
    }

    /// Read lines until the terminal line of a reply, returning all of them.
    ///
    /// Fails with [`FtpError::ProtocolError`] if the stream ends before the terminal
    /// line or if reading fails.
    pub fn read_reply(&mut self) -> FtpResult<Response> {
        let mut body: Vec<u8> = Vec::new();
        let mut opening: Option<[u8; 3]> = None;
        let mut first = true;
        loop {
            let start = body.len();
            if self.read_line(&mut body)? == 0 {
                return Err(FtpError::ProtocolError(
                    ErrorKind::UnexpectedEof.into(),
                ));
            }
            let line = &body[start..];
            trace!("CC IN: {:?}", String::from_utf8_lossy(line));
            if first {
                opening = continuation_code(line);
                first = false;
            }
            if let Some(code) = self.terminal_code(line, opening) {
                return Ok(Response::new(code, body));
            }
        }
    }

    /// Read one line, terminator included, appending it to `buf`
    fn read_line(&mut self, buf: &mut Vec<u8>) -> FtpResult<usize> {
        loop {
            match self.inner.read_until(b'\n', buf) {
                Ok(read) => return Ok(read),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FtpError::ProtocolError(err)),
            }
        }
    }

    /// Code of `line` if it ends the reply under the current framing
    fn terminal_code(&self, line: &[u8], opening: Option<[u8; 3]>) -> Option<u32> {
        let code = final_code(line)?;
        match (self.framing, opening) {
            (ReplyFraming::Strict, Some(open)) if line[..3] != open => None,
            _ => Some(code),
        }
    }
}

/// `ddd ` prefix: the code as a number
fn final_code(line: &[u8]) -> Option<u32> {
    if line.len() >= 4 && line[..3].iter().all(u8::is_ascii_digit) && line[3] == b' ' {
        Some(line[..3].iter().fold(0, |acc, d| acc * 10 + u32::from(d - b'0')))
    } else {
        None
    }
}

/// `ddd-` prefix: the digits opening a multi-line reply
fn continuation_code(line: &[u8]) -> Option<[u8; 3]> {
    if line.len() >= 4 && line[..3].iter().all(u8::is_ascii_digit) && line[3] == b'-' {
        Some([line[0], line[1], line[2]])
    } else {
        None
    }
}
