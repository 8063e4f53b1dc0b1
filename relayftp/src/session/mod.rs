//! # Session
//!
//! The control session: one control connection for its whole lifetime, plus the data
//! connection negotiation the next transfer will consume.

mod control;
mod negotiation;

use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use control::{ControlChannel, Ticket};
pub use negotiation::{DataSource, Negotiation};

use crate::command::Command;
use crate::endpoint::Endpoint;
use crate::reply::ReplyFraming;
use crate::status::Status;
use crate::transfer::Transfer;
use crate::types::{Direction, FtpError, FtpResult, Mode, Response};

/// Default time the server is given to dial in after an active mode transfer command
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Stream to interface with the FTP server. This interface is only for the command stream.
#[derive(Debug)]
pub struct Session {
    control: Arc<ControlChannel>,
    negotiation: Negotiation,
    restart: Option<u64>,
    accept_timeout: Duration,
    local_dir: PathBuf,
    welcome: Option<Response>,
}

impl Session {
    /// Try to connect to the remote server
    pub fn connect<A: ToSocketAddrs>(addr: A) -> FtpResult<Self> {
        debug!("Connecting to server");
        TcpStream::connect(addr)
            .map_err(FtpError::ConnectionError)
            .and_then(Self::connect_with_stream)
    }

    /// Connect using provided configured tcp stream
    pub fn connect_with_stream(stream: TcpStream) -> FtpResult<Self> {
        debug!("Established connection with server");
        let control = ControlChannel::new(stream, ReplyFraming::default())?;
        debug!("Reading server greeting...");
        let welcome = control.read_unsolicited()?;
        if !welcome.is_completion() {
            return Err(FtpError::UnexpectedResponse(welcome));
        }
        debug!("Server READY; greeting: {:?}", welcome.as_string().ok());
        Ok(Self {
            control: Arc::new(control),
            negotiation: Negotiation::None,
            restart: None,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            local_dir: PathBuf::from("."),
            welcome: Some(welcome),
        })
    }

    /// Set how long active mode transfers wait for the server to connect
    pub fn accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }

    /// Set how multi-line replies are framed
    pub fn reply_framing(self, framing: ReplyFraming) -> Self {
        self.control.set_framing(framing);
        self
    }

    /// Set the directory local files of transfers are resolved against
    pub fn local_dir<P: Into<PathBuf>>(mut self, local_dir: P) -> Self {
        self.local_dir = local_dir.into();
        self
    }

    /// Get the greeting the server sent upon connection
    pub fn get_welcome_msg(&self) -> Option<&Response> {
        self.welcome.as_ref()
    }

    /// Whether the control connection failed; the session can't be used anymore
    pub fn is_broken(&self) -> bool {
        self.control.is_broken()
    }

    /// Mode of the negotiation the next transfer would use, if any
    pub fn mode(&self) -> Option<Mode> {
        self.negotiation.mode()
    }

    /// Offset the next transfer resumes from, recorded by an accepted REST
    pub fn restart_offset(&self) -> Option<u64> {
        self.restart
    }

    pub fn get_local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// Send any command and return the raw reply, whatever its code
    pub fn execute(&self, command: Command) -> FtpResult<Response> {
        self.control.execute(&command)
    }

    pub fn user<S: AsRef<str>>(&self, user: S) -> FtpResult<Response> {
        debug!("Signin in with user '{}'", user.as_ref());
        self.execute(Command::User(user.as_ref().to_string()))
    }

    pub fn pass<S: AsRef<str>>(&self, password: S) -> FtpResult<Response> {
        self.execute(Command::Pass(password.as_ref().to_string()))
    }

    pub fn mkdir<S: AsRef<str>>(&self, pathname: S) -> FtpResult<Response> {
        debug!("Creating directory at {}", pathname.as_ref());
        self.execute(Command::Mkd(pathname.as_ref().to_string()))
    }

    pub fn pwd(&self) -> FtpResult<Response> {
        self.execute(Command::Pwd)
    }

    pub fn rm<S: AsRef<str>>(&self, filename: S) -> FtpResult<Response> {
        debug!("Removing file {}", filename.as_ref());
        self.execute(Command::Dele(filename.as_ref().to_string()))
    }

    /// Quits the current FTP session.
    pub fn quit(&mut self) -> FtpResult<Response> {
        debug!("Quitting session");
        self.negotiation = Negotiation::None;
        self.execute(Command::Quit)
    }

    /// Forward `REST offset`. When the server accepts it and `offset` is a number, the
    /// next transfer resumes from there; any other reply cancels a pending offset.
    pub fn resume_transfer<S: AsRef<str>>(&mut self, offset: S) -> FtpResult<Response> {
        debug!("Requesting to resume transfer at offset {}", offset.as_ref());
        let response = self.execute(Command::Rest(offset.as_ref().to_string()))?;
        self.restart = match response.status() {
            Status::RequestFilePending => offset.as_ref().trim().parse::<u64>().ok(),
            _ => None,
        };
        trace!("restart offset is now {:?}", self.restart);
        Ok(response)
    }

    /// Runs the PASV command to enter passive mode. The announced endpoint replaces any
    /// previous negotiation; if the reply can't be used the negotiation is cleared.
    pub fn enter_passive(&mut self) -> FtpResult<Response> {
        debug!("PASV command");
        let response = self.execute(Command::Pasv)?;
        self.negotiation = Negotiation::None;
        if response.status() != Status::PassiveMode {
            return Err(FtpError::UnexpectedResponse(response));
        }
        match Endpoint::from_pasv_reply(&response.raw_text()) {
            Ok(endpoint) => {
                debug!("Passive endpoint is {endpoint}");
                self.negotiation = Negotiation::Passive(endpoint);
                Ok(response)
            }
            Err(reason) => {
                error!("Unusable PASV reply: {reason}");
                Err(FtpError::MalformedReply { response, reason })
            }
        }
    }

    /// Create a new tcp listener and send a PORT command for it.
    ///
    /// The listener replaces (and closes) any previous negotiation before PORT is sent, and
    /// stays current even if the server refuses PORT.
    pub fn enter_active(&mut self) -> FtpResult<Response> {
        debug!("Starting local tcp listener...");
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .map_err(FtpError::ConnectionError)?;
        let port = listener
            .local_addr()
            .map_err(FtpError::ConnectionError)?
            .port();
        let local = Endpoint::from_socket_addr(self.control.local_addr()).ok_or_else(|| {
            FtpError::ConnectionError(std::io::Error::new(
                ErrorKind::AddrNotAvailable,
                "PORT needs an IPv4 control connection",
            ))
        })?;
        let endpoint = Endpoint::new(local.ip(), port);
        debug!("Active mode, listening on {endpoint}");
        self.negotiation = Negotiation::Active(listener);
        self.execute(Command::Port(endpoint.to_port_arg()))
    }

    /// Prepare a transfer of `filename`, consuming the current negotiation and restart
    /// offset. The returned [`Transfer`] runs on its own through a
    /// [`crate::TransferRegistry`].
    pub fn begin_transfer<S: AsRef<str>>(
        &mut self,
        direction: Direction,
        filename: S,
    ) -> FtpResult<Transfer> {
        let negotiation = std::mem::take(&mut self.negotiation);
        let source = DataSource::from_negotiation(negotiation, self.accept_timeout)
            .ok_or(FtpError::NotNegotiated)?;
        let filename = filename.as_ref().to_string();
        debug!(
            "Preparing {direction} of '{filename}' in {} mode",
            source.mode()
        );
        Ok(Transfer::new(
            Arc::clone(&self.control),
            direction,
            self.local_dir.join(&filename),
            filename,
            source,
            self.restart.take(),
        ))
    }
}
