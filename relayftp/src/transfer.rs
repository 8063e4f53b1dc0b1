//! # Transfer
//!
//! File transfers running on their own threads, and the registry the dispatcher uses to
//! launch them, collect their outcome and tear them down.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::command::Command;
use crate::session::{ControlChannel, DataSource, Ticket};
use crate::status::Status;
use crate::types::{Direction, FileType, FtpError, FtpResult, Mode, Response};

/// Size of the buffer bytes are moved through
pub const TRANSFER_BUFFER_SIZE: usize = 8 * 1024;

/// Default bound on concurrently running transfers
pub const DEFAULT_MAX_TRANSFERS: usize = 8;

pub type TransferId = u64;

/// Steps a transfer goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Start,
    TypeSet,
    Connecting,
    Copying,
    /// Bytes moved, waiting for the final reply
    Completing,
    Done,
    Failed,
}

/// One RETR or STOR, bound to the negotiation it consumed
#[derive(Debug)]
pub struct Transfer {
    control: Arc<ControlChannel>,
    direction: Direction,
    local_path: PathBuf,
    filename: String,
    source: DataSource,
    restart: Option<u64>,
}

/// Outcome of a transfer, delivered to the dispatcher
#[derive(Debug)]
pub struct TransferReport {
    pub id: TransferId,
    pub direction: Direction,
    pub filename: String,
    pub mode: Mode,
    /// `Done` or `Failed`
    pub state: TransferState,
    /// State the transfer was in when it failed
    pub failed_in: Option<TransferState>,
    /// Bytes copied
    pub result: FtpResult<u64>,
    /// Final reply of the transfer command, if the server got that far
    pub completion: Option<Response>,
}

/// Summary of a transfer still running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub id: TransferId,
    pub direction: Direction,
    pub filename: String,
    pub mode: Mode,
}

struct Progress {
    id: TransferId,
    state: TransferState,
    ticket: Option<Ticket>,
}

impl Progress {
    fn enter(&mut self, state: TransferState) {
        trace!("transfer #{}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}

impl Transfer {
    pub(crate) fn new(
        control: Arc<ControlChannel>,
        direction: Direction,
        local_path: PathBuf,
        filename: String,
        source: DataSource,
        restart: Option<u64>,
    ) -> Self {
        Self {
            control,
            direction,
            local_path,
            filename,
            source,
            restart,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Remote file name, as given by the user
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn mode(&self) -> Mode {
        self.source.mode()
    }

    pub fn restart(&self) -> Option<u64> {
        self.restart
    }

    /// Run the transfer to completion. `handshake` is dropped once the transfer command got
    /// its preliminary reply, or as soon as the transfer fails before that.
    pub(crate) fn run(
        self,
        id: TransferId,
        cancel: &AtomicBool,
        handshake: SyncSender<()>,
    ) -> TransferReport {
        let mut progress = Progress {
            id,
            state: TransferState::Start,
            ticket: None,
        };
        let mut result = self.execute(&mut progress, cancel, handshake);
        let Transfer {
            control,
            direction,
            filename,
            source,
            ..
        } = self;
        let mode = source.mode();
        // an active listener nobody accepted on makes the server give up with 425
        drop(source);

        let mut completion = None;
        if let Some(ticket) = progress.ticket {
            if result.is_ok() {
                progress.enter(TransferState::Completing);
            }
            match control.await_completion(ticket) {
                Ok(response) => {
                    debug!("transfer #{id}: completion reply {}", response.code);
                    if result.is_ok() && !response.is_completion() {
                        result = Err(FtpError::UnexpectedResponse(response.clone()));
                    }
                    completion = Some(response);
                }
                Err(err) if result.is_ok() => result = Err(err),
                Err(err) => error!("transfer #{id}: lost completion reply: {err}"),
            }
        }

        let (state, failed_in) = match result {
            Ok(bytes) => {
                info!("transfer #{id}: {direction} of '{filename}' done ({bytes} bytes)");
                (TransferState::Done, None)
            }
            Err(ref err) => {
                error!(
                    "transfer #{id}: {direction} of '{filename}' failed in {:?}: {err}",
                    progress.state
                );
                (TransferState::Failed, Some(progress.state))
            }
        };
        TransferReport {
            id,
            direction,
            filename,
            mode,
            state,
            failed_in,
            result,
            completion,
        }
    }

    fn execute(
        &self,
        progress: &mut Progress,
        cancel: &AtomicBool,
        handshake: SyncSender<()>,
    ) -> FtpResult<u64> {
        let reply = self.control.execute(&Command::Type(FileType::Binary))?;
        if !reply.is_completion() {
            return Err(FtpError::UnexpectedResponse(reply));
        }
        progress.enter(TransferState::TypeSet);
        // REST must come right before the transfer command
        if let Some(offset) = self.restart {
            let reply = self.control.execute(&Command::Rest(offset.to_string()))?;
            if reply.status() != Status::RequestFilePending {
                return Err(FtpError::UnexpectedResponse(reply));
            }
        }
        // a missing source must not leave an empty file on the server
        let mut local = match self.direction {
            Direction::Upload => Some(self.open_local()?),
            Direction::Download => None,
        };

        progress.enter(TransferState::Connecting);
        let command = match self.direction {
            Direction::Download => Command::Retr(self.filename.clone()),
            Direction::Upload => Command::Store(self.filename.clone()),
        };
        let mut data = match &self.source {
            DataSource::Passive(endpoint) => {
                let stream = DataSource::dial(*endpoint)?;
                self.send_transfer_command(&command, progress)?;
                drop(handshake);
                stream
            }
            DataSource::Active {
                listener,
                accept_timeout,
            } => {
                self.send_transfer_command(&command, progress)?;
                drop(handshake);
                DataSource::accept(listener, *accept_timeout, cancel)?
            }
        };
        let mut local = match local.take() {
            Some(file) => file,
            None => self.open_local()?,
        };

        progress.enter(TransferState::Copying);
        let bytes = match self.direction {
            Direction::Download => copy_chunks(&mut data, &mut local, cancel),
            Direction::Upload => copy_chunks(&mut local, &mut data, cancel),
        }
        .map_err(FtpError::TransferError)?;
        trace!("transfer #{}: copied {bytes} bytes", progress.id);
        Ok(bytes)
    }

    fn send_transfer_command(&self, command: &Command, progress: &mut Progress) -> FtpResult<()> {
        let (reply, ticket) = self.control.execute_transfer(command)?;
        progress.ticket = ticket;
        match ticket {
            Some(_) => Ok(()),
            None => Err(FtpError::UnexpectedResponse(reply)),
        }
    }

    /// Download targets are created or truncated, upload sources opened read-only; both
    /// positioned at the restart offset
    fn open_local(&self) -> FtpResult<File> {
        let offset = self.restart.unwrap_or(0);
        let path = &self.local_path;
        debug!("Opening local file {}", path.display());
        let file = match self.direction {
            Direction::Download if offset > 0 => OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .and_then(|mut file| {
                    file.set_len(offset)?;
                    file.seek(SeekFrom::Start(offset))?;
                    Ok(file)
                }),
            Direction::Download => File::create(path),
            Direction::Upload => File::open(path).and_then(|mut file| {
                file.seek(SeekFrom::Start(offset))?;
                Ok(file)
            }),
        };
        file.map_err(FtpError::TransferError)
    }
}

/// Copy `reader` into `writer` through a [`TRANSFER_BUFFER_SIZE`] buffer until end of stream
fn copy_chunks<R, W>(reader: &mut R, writer: &mut W, cancel: &AtomicBool) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = [0u8; TRANSFER_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(io::Error::new(ErrorKind::Interrupted, "transfer cancelled"));
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }
    writer.flush()?;
    Ok(total)
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Done
    }

    /// Report for a transfer thread that died without reporting
    fn lost(info: &TransferInfo) -> Self {
        Self {
            id: info.id,
            direction: info.direction,
            filename: info.filename.clone(),
            mode: info.mode,
            state: TransferState::Failed,
            failed_in: None,
            result: Err(FtpError::TransferError(io::Error::other(
                "transfer thread panicked",
            ))),
            completion: None,
        }
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transfer #{} ({} of {}, {} mode) ",
            self.id, self.direction, self.filename, self.mode
        )?;
        match (&self.result, self.failed_in) {
            (Ok(bytes), _) => write!(f, "completed: {bytes} bytes"),
            (Err(err), Some(state)) => write!(f, "failed while {state:?}: {err}"),
            (Err(err), None) => write!(f, "failed: {err}"),
        }
    }
}

struct TransferHandle {
    info: TransferInfo,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// Every transfer launched by a session, with its join and cancel handles.
///
/// Outcomes come back through a channel; nothing here blocks except
/// [`TransferRegistry::spawn`] (until the transfer's handshake is over) and
/// [`TransferRegistry::shutdown`].
pub struct TransferRegistry {
    transfers: HashMap<TransferId, TransferHandle>,
    reports_tx: Sender<TransferReport>,
    reports_rx: Receiver<TransferReport>,
    capacity: usize,
    next_id: TransferId,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSFERS)
    }
}

impl TransferRegistry {
    /// Registry running at most `capacity` transfers at once
    pub fn new(capacity: usize) -> Self {
        let (reports_tx, reports_rx) = mpsc::channel();
        Self {
            transfers: HashMap::new(),
            reports_tx,
            reports_rx,
            capacity: capacity.max(1),
            next_id: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.transfers.len() < self.capacity
    }

    /// Transfers not reaped yet, oldest first
    pub fn in_flight(&self) -> Vec<TransferInfo> {
        let mut infos: Vec<TransferInfo> =
            self.transfers.values().map(|h| h.info.clone()).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Start `transfer` on a new thread.
    ///
    /// Returns once the transfer finished its control channel handshake, so the caller may
    /// negotiate again without disturbing it.
    pub fn spawn(&mut self, transfer: Transfer) -> FtpResult<TransferId> {
        if !self.has_capacity() {
            return Err(FtpError::TooManyTransfers(self.capacity));
        }
        let id = self.next_id;
        self.next_id += 1;
        let info = TransferInfo {
            id,
            direction: transfer.direction(),
            filename: transfer.filename().to_string(),
            mode: transfer.mode(),
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let reports = self.reports_tx.clone();
        let (handshake_tx, handshake_rx) = mpsc::sync_channel::<()>(1);
        debug!("spawning transfer #{id}");
        let join = thread::Builder::new()
            .name(format!("transfer-{id}"))
            .spawn(move || {
                let report = transfer.run(id, &thread_cancel, handshake_tx);
                let _ = reports.send(report);
            })
            .map_err(FtpError::TransferError)?;
        // disconnected as soon as the handshake is over, whichever way it went
        let _ = handshake_rx.recv();
        self.transfers.insert(id, TransferHandle { info, cancel, join });
        Ok(id)
    }

    /// Raise the cancel flag of a running transfer
    pub fn cancel(&self, id: TransferId) -> bool {
        match self.transfers.get(&id) {
            Some(handle) => {
                handle.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Collect the reports of finished transfers without blocking
    pub fn reap(&mut self) -> Vec<TransferReport> {
        // finished before draining: their report, if any, is already queued
        let finished: Vec<TransferId> = self
            .transfers
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(id, _)| *id)
            .collect();
        let mut reports = self.drain_reports();
        for id in finished {
            if let Some(handle) = self.transfers.remove(&id) {
                reports.push(TransferReport::lost(&handle.info));
                Self::join(id, handle);
            }
        }
        reports.sort_by_key(|report| report.id);
        reports
    }

    /// Wait for every transfer, cancelling them first if `cancel` is set
    pub fn shutdown(&mut self, cancel: bool) -> Vec<TransferReport> {
        if cancel {
            for handle in self.transfers.values() {
                handle.cancel.store(true, Ordering::Relaxed);
            }
        }
        let pending: Vec<(TransferId, TransferHandle)> = self.transfers.drain().collect();
        let mut joined = Vec::with_capacity(pending.len());
        for (id, handle) in pending {
            joined.push(handle.info.clone());
            Self::join(id, handle);
        }
        let mut reports = self.drain_reports();
        for info in joined {
            if !reports.iter().any(|report| report.id == info.id) {
                reports.push(TransferReport::lost(&info));
            }
        }
        reports.sort_by_key(|report| report.id);
        reports
    }

    fn drain_reports(&mut self) -> Vec<TransferReport> {
        let mut reports = Vec::new();
        while let Ok(report) = self.reports_rx.try_recv() {
            if let Some(handle) = self.transfers.remove(&report.id) {
                Self::join(report.id, handle);
            }
            reports.push(report);
        }
        reports
    }

    fn join(id: TransferId, handle: TransferHandle) {
        if handle.join.join().is_err() {
            error!("transfer #{id} panicked");
        }
    }
}
