#![crate_name = "relayftp"]
#![crate_type = "lib"]

//! # relayftp
//!
//! relayftp is a plain FTP client library which keeps one control connection open for the
//! whole session while file transfers run concurrently on their own data connections.
//!
//! The library coordinates the two channels:
//!
//! - every "send command, await reply" exchange on the control connection happens in
//!   lockstep, whoever issues it (the session or a running transfer)
//! - a data connection negotiated with PASV or PORT is consumed by exactly one transfer
//! - transfers report back through a [`TransferRegistry`], which is polled without blocking
//!
//! ## Usage
//!
//! ```rust,no_run
//! use relayftp::{Direction, Session, TransferRegistry};
//!
//! let mut session = Session::connect("127.0.0.1:21").unwrap();
//! session.user("anonymous").unwrap();
//! session.pass("guest@").unwrap();
//!
//! let mut transfers = TransferRegistry::default();
//! session.enter_passive().unwrap();
//! let transfer = session.begin_transfer(Direction::Download, "a.txt").unwrap();
//! transfers.spawn(transfer).unwrap();
//!
//! // the control connection is free again: commands can go on meanwhile
//! println!("{}", session.pwd().unwrap());
//!
//! for report in transfers.shutdown(false) {
//!     println!("{report}");
//! }
//! assert!(session.quit().is_ok());
//! ```
//!
//! ## Caveats
//!
//! Only plain FTP is supported: there's no TLS, and only IPv4 endpoints can be negotiated.
//! Transfers always use binary representation.

#![doc(html_playground_url = "https://play.rust-lang.org")]

// -- common deps
#[macro_use]
extern crate lazy_regex;
#[macro_use]
extern crate log;

// -- private
pub(crate) mod command;
mod regex;
mod status;
#[cfg(test)]
mod test_server;

// -- public
pub mod endpoint;
pub mod reply;
pub mod session;
pub mod transfer;
pub mod types;

// -- export
pub use command::Command;
pub use endpoint::{Endpoint, TupleError};
pub use reply::{ReplyFraming, ReplyReader};
pub use session::{Session, DEFAULT_ACCEPT_TIMEOUT};
pub use status::{ReplyClass, Status};
pub use transfer::{
    Transfer, TransferId, TransferInfo, TransferRegistry, TransferReport, TransferState,
    DEFAULT_MAX_TRANSFERS, TRANSFER_BUFFER_SIZE,
};
pub use types::{Direction, FileType, FtpError, FtpResult, Mode, Response};

// -- test logging
#[cfg(test)]
pub fn log_init() {
    let _ = env_logger::builder().is_test(true).try_init();
}
