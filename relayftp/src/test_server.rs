#![allow(dead_code)]

//! A serial FTP server on the loopback interface, serving an in-memory file system to one
//! control connection. Like most real servers it doesn't read the control channel while
//! a transfer is running.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::endpoint::Endpoint;
use crate::types::Mode;

/// How long the server waits for the client to dial a passive endpoint
const PASSIVE_ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct ServerState {
    files: HashMap<String, Vec<u8>>,
    commands: Vec<String>,
    data_modes: Vec<Mode>,
}

pub struct TestServerBuilder {
    files: HashMap<String, Vec<u8>>,
    greeting: String,
    pasv_reply: Option<String>,
    passive_port: u16,
    refuse_port: bool,
    hang_up_on: Option<String>,
    chunk_delay: Option<Duration>,
    abort_after: Option<usize>,
}

pub struct TestServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

enum DataSetup {
    None,
    Passive(TcpListener),
    Active(Endpoint),
}

impl TestServerBuilder {
    /// Serve `data` as `name`
    pub fn file(mut self, name: &str, data: Vec<u8>) -> Self {
        self.files.insert(name.to_string(), data);
        self
    }

    /// Raw greeting, CRLF included
    pub fn greeting(mut self, greeting: &str) -> Self {
        self.greeting = greeting.to_string();
        self
    }

    /// Answer PASV with `reply` instead of opening a listener
    pub fn pasv_reply(mut self, reply: &str) -> Self {
        self.pasv_reply = Some(reply.to_string());
        self
    }

    /// Bind passive listeners on this port
    pub fn passive_port(mut self, port: u16) -> Self {
        self.passive_port = port;
        self
    }

    /// Answer PORT with 500
    pub fn refuse_port(mut self) -> Self {
        self.refuse_port = true;
        self
    }

    /// Close the control connection upon receiving this verb
    pub fn hang_up_on(mut self, verb: &str) -> Self {
        self.hang_up_on = Some(verb.to_string());
        self
    }

    /// Stop downloads after `bytes` bytes, closing the data connection and replying 426
    pub fn abort_after(mut self, bytes: usize) -> Self {
        self.abort_after = Some(bytes);
        self
    }

    /// Send downloads in 1 KiB chunks, sleeping `delay` between them
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn start(self) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind test server");
        let addr = listener.local_addr().expect("no local address");
        let state = Arc::new(Mutex::new(ServerState {
            files: self.files.clone(),
            ..Default::default()
        }));
        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                ServerSession::new(self, thread_state, stream).serve();
            }
        });
        TestServer {
            addr,
            state,
            handle: Mutex::new(Some(handle)),
        }
    }
}

impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder {
            files: HashMap::new(),
            greeting: "220 Ready\r\n".to_string(),
            pasv_reply: None,
            passive_port: 0,
            refuse_port: false,
            hang_up_on: None,
            chunk_delay: None,
            abort_after: None,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Content of a remote file
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(name).cloned()
    }

    /// Every command received, without CRLF
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// How each data connection was opened
    pub fn data_modes(&self) -> Vec<Mode> {
        self.state.lock().unwrap().data_modes.clone()
    }

    /// Wait for the control connection to be closed
    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.join().expect("test server panicked");
        }
    }
}

struct ServerSession {
    config: TestServerBuilder,
    state: Arc<Mutex<ServerState>>,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    data: DataSetup,
    restart: u64,
}

impl ServerSession {
    fn new(config: TestServerBuilder, state: Arc<Mutex<ServerState>>, stream: TcpStream) -> Self {
        let writer = stream.try_clone().expect("failed to clone control stream");
        Self {
            config,
            state,
            reader: BufReader::new(stream),
            writer,
            data: DataSetup::None,
            restart: 0,
        }
    }

    fn reply(&mut self, text: &str) {
        let _ = self.writer.write_all(text.as_bytes());
    }

    fn serve(mut self) {
        let greeting = self.config.greeting.clone();
        self.reply(&greeting);
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            self.state.lock().unwrap().commands.push(line.clone());
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.to_string()),
                None => (line.to_ascii_uppercase(), String::new()),
            };
            if self.config.hang_up_on.as_deref() == Some(verb.as_str()) {
                break;
            }
            if !self.dispatch(&verb, &arg) {
                break;
            }
        }
    }

    /// Handle one command; false once the session is over
    fn dispatch(&mut self, verb: &str, arg: &str) -> bool {
        match verb {
            "USER" => self.reply("331 Guest login ok, send any password\r\n"),
            "PASS" => self.reply("230 Logged in\r\n"),
            "PWD" => self.reply("257 \"/\" is the current directory\r\n"),
            "MKD" => self.reply(&format!("257 \"/{arg}\" created\r\n")),
            "DELE" => {
                let removed = self.state.lock().unwrap().files.remove(arg).is_some();
                if removed {
                    self.reply("250 File deleted\r\n");
                } else {
                    self.reply("550 No such file\r\n");
                }
            }
            "TYPE" if arg == "I" => self.reply("200 Switching to Binary mode\r\n"),
            "TYPE" => self.reply("504 Unsupported type\r\n"),
            "REST" => match arg.parse::<u64>() {
                Ok(offset) => {
                    self.restart = offset;
                    self.reply(&format!("350 Restarting at {offset}\r\n"));
                }
                Err(_) => self.reply("501 Bad offset\r\n"),
            },
            "PASV" => self.pasv(),
            "PORT" => self.port(arg),
            "RETR" => self.retr(arg),
            "STOR" => self.stor(arg),
            "QUIT" => {
                self.reply("221 Goodbye\r\n");
                return false;
            }
            _ => self.reply("502 Command not implemented\r\n"),
        }
        true
    }

    fn pasv(&mut self) {
        self.data = DataSetup::None;
        if let Some(reply) = self.config.pasv_reply.clone() {
            self.reply(&reply);
            return;
        }
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.config.passive_port))
            .expect("failed to bind passive listener");
        let port = listener.local_addr().unwrap().port();
        let endpoint = Endpoint::new(Ipv4Addr::LOCALHOST, port);
        self.data = DataSetup::Passive(listener);
        self.reply(&format!(
            "227 Entering Passive Mode ({})\r\n",
            endpoint.to_port_arg()
        ));
    }

    fn port(&mut self, arg: &str) {
        self.data = DataSetup::None;
        if self.config.refuse_port {
            self.reply("500 PORT not allowed\r\n");
            return;
        }
        match arg.parse::<Endpoint>() {
            Ok(endpoint) => {
                self.data = DataSetup::Active(endpoint);
                self.reply("200 PORT command successful\r\n");
            }
            Err(_) => self.reply("501 Bad PORT argument\r\n"),
        }
    }

    fn open_data(&mut self) -> Option<TcpStream> {
        let stream = match std::mem::replace(&mut self.data, DataSetup::None) {
            DataSetup::None => None,
            DataSetup::Passive(listener) => {
                listener.set_nonblocking(true).ok()?;
                let start = Instant::now();
                let accepted = loop {
                    match listener.accept() {
                        Ok((stream, _)) => break Some(stream),
                        Err(e) if e.kind() == ErrorKind::WouldBlock => {
                            if start.elapsed() > PASSIVE_ACCEPT_TIMEOUT {
                                break None;
                            }
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(_) => break None,
                    }
                };
                accepted.map(|stream| (stream, Mode::Passive))
            }
            DataSetup::Active(endpoint) => TcpStream::connect(SocketAddr::from(endpoint))
                .ok()
                .map(|stream| (stream, Mode::Active)),
        };
        let (stream, mode) = stream?;
        stream.set_nonblocking(false).ok()?;
        self.state.lock().unwrap().data_modes.push(mode);
        Some(stream)
    }

    fn retr(&mut self, name: &str) {
        let restart = std::mem::take(&mut self.restart) as usize;
        let content = self.state.lock().unwrap().files.get(name).cloned();
        let Some(content) = content else {
            self.data = DataSetup::None;
            self.reply("550 No such file\r\n");
            return;
        };
        if matches!(self.data, DataSetup::None) {
            self.reply("425 Use PORT or PASV first\r\n");
            return;
        }
        self.reply("150 Opening BINARY mode data connection\r\n");
        let Some(mut stream) = self.open_data() else {
            self.reply("425 Can't open data connection\r\n");
            return;
        };
        let mut payload = content.get(restart..).unwrap_or_default();
        if let Some(limit) = self.config.abort_after {
            payload = &payload[..limit.min(payload.len())];
            let _ = stream.write_all(payload);
            drop(stream);
            self.reply("426 Connection closed; transfer aborted\r\n");
            return;
        }
        let result = match self.config.chunk_delay {
            Some(delay) => payload.chunks(1024).try_for_each(|chunk| {
                thread::sleep(delay);
                stream.write_all(chunk)
            }),
            None => stream.write_all(payload),
        };
        drop(stream);
        match result {
            Ok(()) => self.reply("226 Transfer complete\r\n"),
            Err(_) => self.reply("426 Connection closed; transfer aborted\r\n"),
        }
    }

    fn stor(&mut self, name: &str) {
        let restart = std::mem::take(&mut self.restart) as usize;
        if matches!(self.data, DataSetup::None) {
            self.reply("425 Use PORT or PASV first\r\n");
            return;
        }
        self.reply("150 Ok to send data\r\n");
        let Some(mut stream) = self.open_data() else {
            self.reply("425 Can't open data connection\r\n");
            return;
        };
        let mut received = Vec::new();
        if stream.read_to_end(&mut received).is_err() {
            self.reply("426 Connection closed; transfer aborted\r\n");
            return;
        }
        let mut state = self.state.lock().unwrap();
        let mut content = state.files.get(name).cloned().unwrap_or_default();
        content.truncate(restart);
        content.extend_from_slice(&received);
        state.files.insert(name.to_string(), content);
        drop(state);
        self.reply("226 Transfer complete\r\n");
    }
}
