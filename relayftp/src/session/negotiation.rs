//! # Negotiation
//!
//! The data connection prepared by the last PASV or PORT, and the way a transfer turns it
//! into a connected socket.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;
use crate::types::{FtpError, FtpResult, Mode};

/// Poll interval while waiting for the server to dial in
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Pending data connection negotiation of a session
#[derive(Debug, Default)]
pub enum Negotiation {
    #[default]
    None,
    /// PASV succeeded: the server listens at this endpoint
    Passive(Endpoint),
    /// PORT was sent for this listener
    Active(TcpListener),
}

impl Negotiation {
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Self::None => None,
            Self::Passive(_) => Some(Mode::Passive),
            Self::Active(_) => Some(Mode::Active),
        }
    }
}

/// A negotiation consumed by one transfer
#[derive(Debug)]
pub enum DataSource {
    Passive(Endpoint),
    Active {
        listener: TcpListener,
        accept_timeout: Duration,
    },
}

impl DataSource {
    /// Take the data source out of a negotiation; `None` if nothing was negotiated
    pub fn from_negotiation(negotiation: Negotiation, accept_timeout: Duration) -> Option<Self> {
        match negotiation {
            Negotiation::None => None,
            Negotiation::Passive(endpoint) => Some(Self::Passive(endpoint)),
            Negotiation::Active(listener) => Some(Self::Active {
                listener,
                accept_timeout,
            }),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Self::Passive(_) => Mode::Passive,
            Self::Active { .. } => Mode::Active,
        }
    }

    /// Dial the passive endpoint
    pub fn dial(endpoint: Endpoint) -> FtpResult<TcpStream> {
        debug!("Connecting to passive endpoint {endpoint}");
        TcpStream::connect(SocketAddr::from(endpoint)).map_err(FtpError::ConnectionError)
    }

    /// Accept exactly one inbound connection on `listener`, giving up after `timeout`
    /// or as soon as `cancel` is raised
    pub fn accept(
        listener: &TcpListener,
        timeout: Duration,
        cancel: &AtomicBool,
    ) -> FtpResult<TcpStream> {
        debug!(
            "Waiting for the server to connect on {:?}",
            listener.local_addr().ok()
        );
        listener
            .set_nonblocking(true)
            .map_err(FtpError::ConnectionError)?;
        let start = Instant::now();
        let stream = loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    trace!("Accepted data connection from {peer}");
                    break stream;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(FtpError::ConnectionError(ErrorKind::Interrupted.into()));
                    }
                    if start.elapsed() > timeout {
                        return Err(FtpError::ConnectionError(ErrorKind::TimedOut.into()));
                    }
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(FtpError::ConnectionError(e)),
            }
        };
        // accepted sockets inherit the listener's flag on some platforms
        stream
            .set_nonblocking(false)
            .map_err(FtpError::ConnectionError)?;
        Ok(stream)
    }
}
