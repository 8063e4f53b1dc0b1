//! # Endpoint
//!
//! Data connection endpoints and the `h1,h2,h3,h4,p1,p2` tuple format shared by the
//! PASV reply and the PORT command.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use thiserror::Error;

use crate::regex::PASV_GROUP_RE;

/// Number of fields in an address tuple
const TUPLE_FIELDS: usize = 6;

/// Reason an address tuple was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleError {
    #[error("no parenthesized address group")]
    MissingGroup,
    #[error("expected 6 comma-separated fields, found {0}")]
    WrongArity(usize),
    #[error("field `{0}` is not a number in 0..=255")]
    InvalidField(String),
}

/// IPv4 address and port of a data connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: Ipv4Addr,
    port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Extract the endpoint from the first parenthesized group of a passive mode reply,
    /// e.g. `227 Entering Passive Mode (127,0,0,1,200,5)`.
    pub fn from_pasv_reply(reply: &str) -> Result<Self, TupleError> {
        let caps = PASV_GROUP_RE
            .captures(reply)
            .ok_or(TupleError::MissingGroup)?;
        caps[1].parse()
    }

    /// Endpoint for a local socket address; PORT can only carry IPv4
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(Self::new(*v4.ip(), v4.port())),
            SocketAddr::V6(v6) => v6.ip().to_ipv4_mapped().map(|ip| Self::new(ip, v6.port())),
        }
    }

    /// Format as the argument of a PORT command
    pub fn to_port_arg(&self) -> String {
        let [h1, h2, h3, h4] = self.ip.octets();
        let [p1, p2] = self.port.to_be_bytes();
        format!("{h1},{h2},{h3},{h4},{p1},{p2}")
    }
}

impl FromStr for Endpoint {
    type Err = TupleError;

    /// Parse a bare `h1,h2,h3,h4,p1,p2` tuple. Every field must be a decimal byte.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if fields.len() != TUPLE_FIELDS {
            return Err(TupleError::WrongArity(fields.len()));
        }
        let mut bytes = [0u8; TUPLE_FIELDS];
        for (byte, field) in bytes.iter_mut().zip(fields) {
            if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(TupleError::InvalidField(field.to_string()));
            }
            *byte = field
                .parse::<u8>()
                .map_err(|_| TupleError::InvalidField(field.to_string()))?;
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = u16::from_be_bytes([bytes[4], bytes[5]]);
        Ok(Self::new(ip, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::V4(SocketAddrV4::new(endpoint.ip, endpoint.port))
    }
}
