//! # Control
//!
//! The control connection, shared by the session and every running transfer.
//!
//! Exactly one "send command, await reply" exchange may be outstanding at a time, so every
//! access goes through one mutex. A transfer command answered with a 1xx reply leaves one
//! more reply owed by the server (226 once the data connection closes, or an error). Owed
//! replies arrive in the order their commands were sent: whoever reads the socket next
//! first settles the owed replies, then reads its own.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::command::Command;
use crate::reply::{ReplyFraming, ReplyReader};
use crate::types::{FtpError, FtpResult, Response};

/// Identifies the final reply owed to one transfer command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

#[derive(Debug)]
pub struct ControlChannel {
    inner: Mutex<ControlInner>,
    local_addr: SocketAddr,
}

#[derive(Debug)]
struct ControlInner {
    reader: ReplyReader<BufReader<TcpStream>>,
    writer: TcpStream,
    owed: VecDeque<Ticket>,
    settled: HashMap<Ticket, Response>,
    /// Owed replies nobody will redeem; dropped once read
    unclaimed: HashSet<Ticket>,
    next_ticket: u64,
    broken: bool,
}

impl ControlChannel {
    /// Wrap a connected control stream
    pub fn new(stream: TcpStream, framing: ReplyFraming) -> FtpResult<Self> {
        let local_addr = stream.local_addr().map_err(FtpError::ConnectionError)?;
        let writer = stream.try_clone().map_err(FtpError::ConnectionError)?;
        Ok(Self {
            inner: Mutex::new(ControlInner {
                reader: ReplyReader::new(BufReader::new(stream), framing),
                writer,
                owed: VecDeque::new(),
                settled: HashMap::new(),
                unclaimed: HashSet::new(),
                next_ticket: 0,
                broken: false,
            }),
            local_addr,
        })
    }

    /// Local address of the control connection; advertised by PORT
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether an I/O failure already made the connection unusable
    pub fn is_broken(&self) -> bool {
        self.lock().broken
    }

    pub fn set_framing(&self, framing: ReplyFraming) {
        self.lock().reader.set_framing(framing);
    }

    /// Read a reply the server sends without being asked (the greeting)
    pub fn read_unsolicited(&self) -> FtpResult<Response> {
        let mut inner = self.lock();
        inner.ensure_usable()?;
        inner.read_reply()
    }

    /// Send `command` and wait for its reply.
    ///
    /// A transfer command sent this way still owes its final reply when answered with 1xx;
    /// the next exchange reads and drops it.
    pub fn execute(&self, command: &Command) -> FtpResult<Response> {
        let mut inner = self.lock();
        let response = inner.exchange(command)?;
        if command.is_transfer() && response.is_preliminary() {
            let ticket = inner.owe();
            warn!("{command} sent without a transfer; its completion reply will be dropped");
            inner.unclaimed.insert(ticket);
        }
        Ok(response)
    }

    /// Send a transfer command. If the server answers with a preliminary reply the
    /// returned ticket redeems the final one through [`ControlChannel::await_completion`].
    pub fn execute_transfer(&self, command: &Command) -> FtpResult<(Response, Option<Ticket>)> {
        let mut inner = self.lock();
        let response = inner.exchange(command)?;
        if !response.is_preliminary() {
            return Ok((response, None));
        }
        Ok((response, Some(inner.owe())))
    }

    /// Get the final reply owed for `ticket`, reading the socket if nobody did yet
    pub fn await_completion(&self, ticket: Ticket) -> FtpResult<Response> {
        let mut inner = self.lock();
        loop {
            if let Some(response) = inner.settled.remove(&ticket) {
                return Ok(response);
            }
            if !inner.owed.contains(&ticket) {
                return Err(FtpError::ProtocolError(std::io::Error::new(
                    ErrorKind::NotFound,
                    "completion reply is not owed",
                )));
            }
            inner.ensure_usable()?;
            inner.settle_next()?;
        }
    }

    /// Number of final replies still owed by the server
    #[cfg(test)]
    pub fn owed(&self) -> usize {
        self.lock().owed.len()
    }

    /// A transfer thread that panicked must not wedge the session
    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ControlInner {
    fn ensure_usable(&self) -> FtpResult<()> {
        if self.broken {
            Err(FtpError::ProtocolError(ErrorKind::NotConnected.into()))
        } else {
            Ok(())
        }
    }

    /// Record that the server owes one more final reply
    fn owe(&mut self) -> Ticket {
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.owed.push_back(ticket);
        trace!("{:?} owes a completion reply", ticket);
        ticket
    }

    fn exchange(&mut self, command: &Command) -> FtpResult<Response> {
        self.ensure_usable()?;
        self.send(command)?;
        while !self.owed.is_empty() {
            self.settle_next()?;
        }
        self.read_reply()
    }

    /// Write data to stream with command to perform
    fn send(&mut self, command: &Command) -> FtpResult<()> {
        trace!("CC OUT: {}", command.redacted());
        let line = format!("{command}\r\n");
        let result = self
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.flush());
        if let Err(err) = result {
            error!("failed to write on control connection: {err}");
            self.broken = true;
            return Err(FtpError::ProtocolError(err));
        }
        Ok(())
    }

    /// Read the reply owed to the oldest outstanding ticket and park it
    fn settle_next(&mut self) -> FtpResult<()> {
        if let Some(ticket) = self.owed.pop_front() {
            let response = self.read_reply()?;
            if self.unclaimed.remove(&ticket) {
                debug!("{:?} settled with {}; nobody claims it", ticket, response.code);
            } else {
                debug!("{:?} settled with {}", ticket, response.code);
                self.settled.insert(ticket, response);
            }
        }
        Ok(())
    }

    fn read_reply(&mut self) -> FtpResult<Response> {
        match self.reader.read_reply() {
            Ok(response) => Ok(response),
            Err(err) => {
                error!("control connection failed: {err}");
                self.broken = true;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod test {

    use std::io::{BufRead, Write};
    use std::net::TcpListener;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    /// Connect a control channel to a peer served by `script`
    fn pair<F>(script: F) -> (ControlChannel, thread::JoinHandle<()>)
    where
        F: FnOnce(BufReader<TcpStream>, TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let writer = stream.try_clone().unwrap();
            script(BufReader::new(stream), writer);
        });
        let stream = TcpStream::connect(addr).unwrap();
        (
            ControlChannel::new(stream, ReplyFraming::Lenient).unwrap(),
            handle,
        )
    }

    fn expect_line(reader: &mut BufReader<TcpStream>, expected: &str) {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line.as_str(), expected);
    }

    #[test]
    fn should_exchange_in_lockstep() {
        crate::log_init();
        let (control, handle) = pair(|mut reader, mut writer| {
            expect_line(&mut reader, "USER anonymous\r\n");
            writer.write_all(b"331-Guest login ok\r\n331 send password\r\n").unwrap();
            expect_line(&mut reader, "PASS ******\r\n");
            writer.write_all(b"230 Logged in\r\n").unwrap();
        });
        let reply = control
            .execute(&Command::User("anonymous".to_string()))
            .unwrap();
        assert_eq!(reply.code, 331);
        assert_eq!(reply.raw_text(), "331-Guest login ok\r\n331 send password\r\n");
        let reply = control
            .execute(&Command::Pass("******".to_string()))
            .unwrap();
        assert_eq!(reply.code, 230);
        handle.join().unwrap();
    }

    #[test]
    fn should_route_owed_reply_to_its_ticket() {
        crate::log_init();
        let (control, handle) = pair(|mut reader, mut writer| {
            expect_line(&mut reader, "RETR a.txt\r\n");
            writer.write_all(b"150 Opening\r\n").unwrap();
            expect_line(&mut reader, "PWD\r\n");
            // a serial server finishes the transfer before answering
            writer.write_all(b"226 Transfer complete\r\n").unwrap();
            writer.write_all(b"257 \"/\"\r\n").unwrap();
        });
        let (reply, ticket) = control
            .execute_transfer(&Command::Retr("a.txt".to_string()))
            .unwrap();
        assert_eq!(reply.code, 150);
        let ticket = ticket.unwrap();
        assert_eq!(control.owed(), 1);
        let pwd = control.execute(&Command::Pwd).unwrap();
        assert_eq!(pwd.code, 257);
        assert_eq!(control.owed(), 0);
        let completion = control.await_completion(ticket).unwrap();
        assert_eq!(completion.code, 226);
        handle.join().unwrap();
    }

    #[test]
    fn should_read_completion_when_nobody_settled_it() {
        let (control, handle) = pair(|mut reader, mut writer| {
            expect_line(&mut reader, "STOR b.txt\r\n");
            writer.write_all(b"150 Ok to send data\r\n").unwrap();
            writer.write_all(b"226 Transfer complete\r\n").unwrap();
        });
        let (_, ticket) = control
            .execute_transfer(&Command::Store("b.txt".to_string()))
            .unwrap();
        let completion = control.await_completion(ticket.unwrap()).unwrap();
        assert_eq!(completion.code, 226);
        handle.join().unwrap();
    }

    #[test]
    fn should_not_issue_ticket_for_refused_transfer() {
        let (control, handle) = pair(|mut reader, mut writer| {
            expect_line(&mut reader, "RETR missing.txt\r\n");
            writer.write_all(b"550 No such file\r\n").unwrap();
        });
        let (reply, ticket) = control
            .execute_transfer(&Command::Retr("missing.txt".to_string()))
            .unwrap();
        assert_eq!(reply.code, 550);
        assert!(ticket.is_none());
        assert_eq!(control.owed(), 0);
        handle.join().unwrap();
    }

    #[test]
    fn should_keep_lockstep_when_transfer_command_is_executed_directly() {
        crate::log_init();
        let (control, handle) = pair(|mut reader, mut writer| {
            expect_line(&mut reader, "RETR x\r\n");
            writer.write_all(b"150 Opening\r\n").unwrap();
            expect_line(&mut reader, "PWD\r\n");
            writer.write_all(b"226 Transfer complete\r\n").unwrap();
            writer.write_all(b"257 \"/\"\r\n").unwrap();
            expect_line(&mut reader, "PWD\r\n");
            writer.write_all(b"257 \"/\"\r\n").unwrap();
        });
        let reply = control.execute(&Command::Retr("x".to_string())).unwrap();
        assert_eq!(reply.code, 150);
        assert_eq!(control.owed(), 1);
        // the completion of RETR is not mistaken for the reply to PWD
        assert_eq!(control.execute(&Command::Pwd).unwrap().code, 257);
        assert_eq!(control.owed(), 0);
        assert_eq!(control.execute(&Command::Pwd).unwrap().code, 257);
        handle.join().unwrap();
    }

    #[test]
    fn should_break_when_server_hangs_up() {
        let (control, handle) = pair(|mut reader, _writer| {
            expect_line(&mut reader, "PWD\r\n");
        });
        assert!(matches!(
            control.execute(&Command::Pwd),
            Err(FtpError::ProtocolError(_))
        ));
        assert!(control.is_broken());
        assert!(matches!(
            control.execute(&Command::Pwd),
            Err(FtpError::ProtocolError(err)) if err.kind() == ErrorKind::NotConnected
        ));
        handle.join().unwrap();
    }
}
